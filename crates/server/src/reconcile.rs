//! Offline sync: push, pull, and conflict resolution.
//!
//! Every syncable row carries a `revision` that the server bumps on each
//! write. A client mutation states the revision it last saw; a mismatch is a
//! conflict, which is recorded in `sync_operations` and never applied until
//! the client resolves it.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use budgetsync_api::db::records::META_COLUMNS;
use budgetsync_api::records::{FieldKind, FieldValue, SyncField, differing_fields, extract_fields};
use budgetsync_api::service::{PageCut, cleanup_cutoff, cut_page, format_timestamp, parse_timestamp};
use budgetsync_api::{
    ConflictResolution, PermissionLevel, PushOutcome, ResolveConflictRequest,
    ResolveConflictResponse, ServiceError, SyncCleanupResponse, SyncOperationInput,
    SyncOperationKind, SyncOperationRecord, SyncOperationResult, SyncPullResponse,
    SyncPushResponse, SyncStatus, SyncStatusResponse, SyncTable, db,
};

use crate::permissions::require_minimum;
use crate::storage::{
    db_err, execute, is_constraint_violation, operation_from_row, query_all, query_one,
};

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A syncable row as the server currently has it.
#[derive(Debug, Clone)]
struct StoredRecord {
    table: SyncTable,
    id: String,
    user_id: Option<String>,
    revision: i64,
    updated_at: String,
    deleted_at: Option<String>,
    /// camelCase JSON snapshot, bookkeeping fields included.
    data: Value,
}

impl StoredRecord {
    fn owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

fn record_from_row(table: SyncTable, row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let id: String = row.get(0)?;
    let user_id: Option<String> = row.get(1)?;
    let revision: i64 = row.get(2)?;
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    let deleted_at: Option<String> = row.get(5)?;

    let mut data = Map::new();
    data.insert("id".into(), Value::from(id.clone()));
    data.insert("userId".into(), user_id.clone().map_or(Value::Null, Value::from));
    data.insert("revision".into(), Value::from(revision));
    data.insert("createdAt".into(), Value::from(created_at));
    data.insert("updatedAt".into(), Value::from(updated_at.clone()));
    data.insert("deletedAt".into(), deleted_at.clone().map_or(Value::Null, Value::from));

    for (offset, field) in table.fields().iter().enumerate() {
        data.insert(field.name.into(), field_json(field, row, META_COLUMNS.len() + offset)?);
    }

    Ok(StoredRecord {
        table,
        id,
        user_id,
        revision,
        updated_at,
        deleted_at,
        data: Value::Object(data),
    })
}

fn field_json(field: &SyncField, row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    Ok(match field.kind {
        FieldKind::Amount | FieldKind::Real => row.get::<_, Option<f64>>(idx)?.map_or(Value::Null, Value::from),
        FieldKind::Bool => row.get::<_, Option<bool>>(idx)?.map_or(Value::Null, Value::from),
        FieldKind::Json => match row.get::<_, Option<String>>(idx)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            None => Value::Null,
        },
        FieldKind::Text | FieldKind::Month | FieldKind::Date | FieldKind::OneOf(_) => {
            row.get::<_, Option<String>>(idx)?.map_or(Value::Null, Value::from)
        }
    })
}

fn load_record(conn: &Connection, table: SyncTable, id: &str) -> rusqlite::Result<Option<StoredRecord>> {
    query_one(conn, &db::records::select(table, id), |row| record_from_row(table, row))
}

// ---------------------------------------------------------------------------
// Applying mutations
// ---------------------------------------------------------------------------

/// Why a mutation was not applied.
enum ApplyError {
    /// The mutation itself is unacceptable (validation, ownership, constraint).
    Rejected(String),
    Store(ServiceError),
}

impl From<ServiceError> for ApplyError {
    fn from(e: ServiceError) -> Self {
        Self::Store(e)
    }
}

fn classify_write(e: rusqlite::Error, context: &str) -> ApplyError {
    if is_constraint_violation(&e) {
        ApplyError::Rejected(format!("rejected by the database: {e}"))
    } else {
        ApplyError::Store(db_err(context)(e))
    }
}

/// Transactions may only point at budgets the caller can edit, categories
/// they can use, and their own payment methods.
fn check_references(
    conn: &Connection,
    user_id: &str,
    table: SyncTable,
    fields: &[(&'static SyncField, FieldValue)],
) -> Result<(), ApplyError> {
    if table != SyncTable::Transactions {
        return Ok(());
    }
    for (field, value) in fields {
        let FieldValue::Text(id) = value else {
            continue;
        };
        match field.name {
            "budgetId" => match require_minimum(conn, PermissionLevel::Edit, user_id, id) {
                Ok(_) => {}
                Err(ServiceError::Forbidden(msg) | ServiceError::NotFound(msg)) => {
                    return Err(ApplyError::Rejected(msg));
                }
                Err(e) => return Err(ApplyError::Store(e)),
            },
            "categoryId" => {
                let usable = query_one(conn, &db::categories::get_usable(id, user_id), |_| Ok(()))
                    .map_err(db_err("load category"))?;
                if usable.is_none() {
                    return Err(ApplyError::Rejected("category not found".into()));
                }
            }
            "paymentMethodId" | "transferToId" => {
                let owner: Option<String> =
                    query_one(conn, &db::payment_methods::get(id), |row| row.get(1))
                        .map_err(db_err("load payment method"))?;
                if owner.as_deref() != Some(user_id) {
                    return Err(ApplyError::Rejected("payment method not found".into()));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn validated_fields(
    conn: &Connection,
    user_id: &str,
    table: SyncTable,
    data: &Value,
    creating: bool,
) -> Result<Vec<(&'static SyncField, FieldValue)>, ApplyError> {
    let fields = extract_fields(table, data, creating).map_err(ApplyError::Rejected)?;
    check_references(conn, user_id, table, &fields)?;
    Ok(fields)
}

/// Write `data` regardless of revisions: update (and revive) the caller's
/// row if it exists, otherwise insert it.
fn force_upsert(
    conn: &Connection,
    user_id: &str,
    table: SyncTable,
    id: &str,
    data: &Value,
    now: &str,
) -> Result<(), ApplyError> {
    let current = load_record(conn, table, id).map_err(db_err("load sync record"))?;
    match current {
        Some(cur) if !cur.owned_by(user_id) => {
            Err(ApplyError::Rejected("record belongs to another user".into()))
        }
        Some(_) => {
            let fields = validated_fields(conn, user_id, table, data, false)?;
            execute(conn, &db::records::update(table, id, fields, now))
                .map_err(|e| classify_write(e, "force update"))?;
            Ok(())
        }
        None => {
            let fields = validated_fields(conn, user_id, table, data, true)?;
            execute(conn, &db::records::insert(table, id, user_id, fields, now))
                .map_err(|e| classify_write(e, "force insert"))?;
            Ok(())
        }
    }
}

fn force_delete(conn: &Connection, user_id: &str, table: SyncTable, id: &str, now: &str) -> Result<(), ApplyError> {
    let current = load_record(conn, table, id).map_err(db_err("load sync record"))?;
    match current {
        Some(cur) if !cur.owned_by(user_id) => {
            Err(ApplyError::Rejected("record belongs to another user".into()))
        }
        Some(cur) if cur.deleted_at.is_none() => {
            execute(conn, &db::records::tombstone(table, id, now))
                .map_err(|e| classify_write(e, "force delete"))?;
            Ok(())
        }
        // Already gone.
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

enum PushStep {
    Applied(i64),
    Conflict(Option<StoredRecord>),
    /// Not persisted.
    Invalid(String),
    /// Persisted with status `error` so it can be retried.
    Failed(String),
}

fn expected_revision(op: &SyncOperationInput) -> Option<i64> {
    op.base_revision.or_else(|| {
        op.server_data
            .as_ref()
            .and_then(|seen| seen.get("revision"))
            .and_then(Value::as_i64)
    })
}

/// Whether the client's last-seen copy disagrees with the current record on
/// any data field it mentions.
fn copy_is_stale(table: SyncTable, seen: &Map<String, Value>, current: &Value) -> bool {
    let mentioned: Map<String, Value> = table
        .fields()
        .iter()
        .filter_map(|f| seen.get(f.name).map(|v| (f.name.to_string(), v.clone())))
        .collect();
    !differing_fields(&Value::Object(mentioned), current).is_empty()
}

fn push_step(conn: &Connection, user_id: &str, op: &SyncOperationInput, now: &str) -> Result<PushStep, ServiceError> {
    let Some(table) = SyncTable::parse(op.table.trim()) else {
        return Ok(PushStep::Invalid(format!("unknown table: {}", op.table)));
    };
    let Some(kind) = SyncOperationKind::parse(op.operation.trim()) else {
        return Ok(PushStep::Invalid(format!("unknown operation: {}", op.operation)));
    };
    if Uuid::parse_str(&op.record_id).is_err() {
        return Ok(PushStep::Invalid("recordId must be a UUID".into()));
    }

    let fields = match kind {
        SyncOperationKind::Delete => Vec::new(),
        _ => match validated_fields(conn, user_id, table, &op.local_data, kind == SyncOperationKind::Create) {
            Ok(fields) => fields,
            Err(ApplyError::Rejected(msg)) => return Ok(PushStep::Invalid(msg)),
            Err(ApplyError::Store(e)) => return Err(e),
        },
    };

    let current = load_record(conn, table, &op.record_id).map_err(db_err("load sync record"))?;

    let write = match kind {
        SyncOperationKind::Create => {
            if current.is_some() {
                return Ok(PushStep::Conflict(current));
            }
            db::records::insert(table, &op.record_id, user_id, fields, now)
        }
        SyncOperationKind::Update | SyncOperationKind::Delete => {
            let Some(current) = current.filter(|r| r.owned_by(user_id) && r.deleted_at.is_none()) else {
                return Ok(PushStep::Invalid("record not found".into()));
            };
            match (expected_revision(op), &op.server_data) {
                (Some(expected), _) if expected != current.revision => {
                    return Ok(PushStep::Conflict(Some(current)));
                }
                (Some(_), _) => {}
                (None, Some(seen)) => {
                    let Some(seen) = seen.as_object() else {
                        return Ok(PushStep::Invalid("serverData must be an object".into()));
                    };
                    if copy_is_stale(table, seen, &current.data) {
                        return Ok(PushStep::Conflict(Some(current)));
                    }
                }
                (None, None) => {
                    return Ok(PushStep::Invalid("baseRevision or serverData required".into()));
                }
            }
            let next = current.revision + 1;
            let built = if kind == SyncOperationKind::Update {
                db::records::update(table, &op.record_id, fields, now)
            } else {
                db::records::tombstone(table, &op.record_id, now)
            };
            return match execute(conn, &built) {
                Ok(_) => Ok(PushStep::Applied(next)),
                Err(e) => match classify_write(e, "apply sync write") {
                    ApplyError::Rejected(msg) => Ok(PushStep::Failed(msg)),
                    ApplyError::Store(e) => Err(e),
                },
            };
        }
    };

    match execute(conn, &write) {
        Ok(_) => Ok(PushStep::Applied(1)),
        Err(e) => match classify_write(e, "apply sync insert") {
            ApplyError::Rejected(msg) => Ok(PushStep::Failed(msg)),
            ApplyError::Store(e) => Err(e),
        },
    }
}

fn record_operation(
    conn: &Connection,
    user_id: &str,
    op: &SyncOperationInput,
    server_data: Option<&Value>,
    status: SyncStatus,
    error: Option<&str>,
    now: &str,
) -> Result<String, ServiceError> {
    let id = Uuid::new_v4().to_string();
    let local = op.local_data.to_string();
    let server = server_data.map(Value::to_string);
    execute(
        conn,
        &db::sync::insert_operation(
            &db::sync::NewOperation {
                id: &id,
                user_id,
                table: op.table.trim(),
                record_id: &op.record_id,
                operation: op.operation.trim(),
                local_payload: &local,
                server_payload: server.as_deref(),
                status: status.as_str(),
                error,
            },
            now,
        ),
    )
    .map_err(db_err("record sync operation"))?;
    Ok(id)
}

fn push_one(conn: &Connection, user_id: &str, op: &SyncOperationInput, now: &str) -> SyncOperationResult {
    let mut result = SyncOperationResult {
        table: op.table.clone(),
        record_id: op.record_id.clone(),
        operation: op.operation.clone(),
        status: PushOutcome::Success,
        revision: None,
        operation_id: None,
        server_data: None,
        error: None,
    };

    let step = push_step(conn, user_id, op, now).and_then(|step| match step {
        PushStep::Conflict(current) => {
            // Only the caller's own rows are shown back to them.
            let current = current.filter(|r| r.owned_by(user_id));
            let id = record_operation(
                conn,
                user_id,
                op,
                current.as_ref().map(|r| &r.data),
                SyncStatus::Conflict,
                None,
                now,
            )?;
            result.status = PushOutcome::Conflict;
            result.operation_id = Some(id);
            result.revision = current.as_ref().map(|r| r.revision);
            result.server_data = current.map(|r| r.data);
            Ok(())
        }
        PushStep::Failed(msg) => {
            let id = record_operation(conn, user_id, op, None, SyncStatus::Error, Some(&msg), now)?;
            result.status = PushOutcome::Error;
            result.operation_id = Some(id);
            result.error = Some(msg);
            Ok(())
        }
        PushStep::Invalid(msg) => {
            result.status = PushOutcome::Error;
            result.error = Some(msg);
            Ok(())
        }
        PushStep::Applied(revision) => {
            result.revision = Some(revision);
            Ok(())
        }
    });

    if let Err(e) = step {
        tracing::error!(table = %op.table, record_id = %op.record_id, "sync push failed: {e}");
        result.status = PushOutcome::Error;
        result.operation_id = None;
        result.error = Some(match e {
            ServiceError::Unavailable(msg) => msg,
            _ => "internal server error".into(),
        });
    }
    result
}

/// Apply a batch of client mutations in order. Each operation succeeds,
/// conflicts, or fails on its own; the batch is never rolled back as a whole.
pub fn push(
    conn: &Connection,
    user_id: &str,
    operations: &[SyncOperationInput],
    max_operations: usize,
    now: DateTime<Utc>,
) -> Result<SyncPushResponse, ServiceError> {
    if operations.len() > max_operations {
        return Err(ServiceError::BadRequest(format!(
            "at most {max_operations} operations per push"
        )));
    }
    let stamp = format_timestamp(now);
    let results: Vec<SyncOperationResult> = operations
        .iter()
        .map(|op| push_one(conn, user_id, op, &stamp))
        .collect();

    execute(conn, &db::sync::set_last_sync(user_id, &stamp)).map_err(db_err("record last sync"))?;

    let conflicts = results.iter().filter(|r| r.status == PushOutcome::Conflict).count();
    let errors = results.iter().filter(|r| r.status == PushOutcome::Error).count();
    tracing::info!(user_id, total = results.len(), conflicts, errors, "sync push");

    Ok(SyncPushResponse {
        results,
        synced_at: stamp,
    })
}

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

fn load_operation(conn: &Connection, user_id: &str, id: &str) -> Result<SyncOperationRecord, ServiceError> {
    query_one(conn, &db::sync::get_operation(id), operation_from_row)
        .map_err(db_err("load sync operation"))?
        .filter(|(_, owner)| owner == user_id)
        .map(|(op, _)| op)
        .ok_or_else(|| ServiceError::NotFound("sync operation not found".into()))
}

/// Settle a recorded conflict (or failed operation).
///
/// `local` force-applies the stored client payload, `merge` force-applies
/// `mergedData`, `server` keeps the server copy untouched. The write and the
/// status change commit together; a rejected write leaves the operation in
/// `error` with a message.
pub fn resolve_conflict(
    conn: &mut Connection,
    user_id: &str,
    req: &ResolveConflictRequest,
    now: DateTime<Utc>,
) -> Result<ResolveConflictResponse, ServiceError> {
    let resolution = ConflictResolution::parse(req.resolution.trim()).ok_or_else(|| {
        ServiceError::BadRequest("resolution must be one of: local, server, merge".into())
    })?;
    let merged = match (resolution, &req.merged_data) {
        (ConflictResolution::Merge, None | Some(Value::Null)) => {
            return Err(ServiceError::BadRequest("mergedData is required for merge".into()));
        }
        (ConflictResolution::Merge, Some(data)) => Some(data),
        _ => None,
    };

    let op = load_operation(conn, user_id, &req.operation_id)?;
    if !op.status.is_resolvable() {
        return Err(ServiceError::Conflict(format!("operation is already {}", op.status)));
    }
    let table = SyncTable::parse(&op.table)
        .ok_or_else(|| ServiceError::Internal(format!("stored operation has table {:?}", op.table)))?;
    let kind = SyncOperationKind::parse(&op.operation).ok_or_else(|| {
        ServiceError::Internal(format!("stored operation has kind {:?}", op.operation))
    })?;

    let stamp = format_timestamp(now);
    let mut tx = conn.transaction().map_err(db_err("begin resolve"))?;

    let outcome = {
        let sp = tx.savepoint().map_err(db_err("savepoint resolve"))?;
        let applied = match (resolution, merged) {
            (ConflictResolution::Server, _) => Ok(()),
            (ConflictResolution::Merge, Some(data)) => force_upsert(&sp, user_id, table, &op.record_id, data, &stamp),
            (_, _) if kind == SyncOperationKind::Delete => force_delete(&sp, user_id, table, &op.record_id, &stamp),
            (_, _) => force_upsert(&sp, user_id, table, &op.record_id, &op.local_data, &stamp),
        };
        match applied {
            Ok(()) => {
                sp.commit().map_err(db_err("commit resolve savepoint"))?;
                None
            }
            // Dropping the savepoint rolls the partial write back.
            Err(ApplyError::Rejected(msg)) => Some(msg),
            Err(ApplyError::Store(e)) => return Err(e),
        }
    };

    let (status, resolved_at) = match outcome {
        None => (SyncStatus::Resolved, Some(stamp.as_str())),
        Some(_) => (SyncStatus::Error, None),
    };
    execute(
        &tx,
        &db::sync::settle_operation(
            &op.id,
            status.as_str(),
            resolution.as_str(),
            outcome.as_deref(),
            resolved_at,
        ),
    )
    .map_err(db_err("settle sync operation"))?;
    tx.commit().map_err(db_err("commit resolve"))?;

    tracing::info!(operation_id = %op.id, %resolution, %status, "sync conflict resolved");
    Ok(ResolveConflictResponse {
        operation_id: op.id,
        status,
        error: outcome,
    })
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

fn sort_changes(records: &mut [StoredRecord]) {
    records.sort_by(|a, b| {
        (a.updated_at.as_str(), a.table.as_str(), a.id.as_str())
            .cmp(&(b.updated_at.as_str(), b.table.as_str(), b.id.as_str()))
    });
}

/// Records the caller owns that changed after `last_sync_time`, oldest
/// first, at most `limit` rows. A group of rows sharing one `updated_at` is
/// never split across pages.
///
/// Rows stamped in the current millisecond are left for the next pull, and
/// a complete pull answers with the millisecond before `now`. Writes stamp
/// `updated_at` while holding the connection, so anything committed after
/// this pull sorts strictly after the returned watermark.
pub fn pull(
    conn: &Connection,
    user_id: &str,
    last_sync_time: Option<&str>,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<SyncPullResponse, ServiceError> {
    let limit = limit.max(1);
    let since = match last_sync_time.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(format_timestamp(parse_timestamp(raw).map_err(|_| {
            ServiceError::BadRequest("lastSyncTime must be an RFC 3339 timestamp".into())
        })?)),
        None => None,
    };
    let server_time = format_timestamp(now);
    let settled_until = format_timestamp(now - chrono::Duration::milliseconds(1));

    let mut changed = Vec::new();
    for table in SyncTable::ALL {
        let built = db::records::changed_since(
            table,
            user_id,
            since.as_deref(),
            &server_time,
            limit as u64 + 1,
        );
        changed.extend(
            query_all(conn, &built, |row| record_from_row(table, row))
                .map_err(db_err("pull changes"))?,
        );
    }
    sort_changes(&mut changed);

    let (page, has_more, last_sync_time) = match cut_page(changed, limit, |r| r.updated_at.as_str()) {
        PageCut::Complete(items) => (items, false, settled_until),
        PageCut::Partial { items, watermark } => (items, true, watermark),
        PageCut::Overflow { boundary } => {
            let mut group = Vec::new();
            for table in SyncTable::ALL {
                let built = db::records::changed_at(table, user_id, &boundary);
                group.extend(
                    query_all(conn, &built, |row| record_from_row(table, row))
                        .map_err(db_err("pull change group"))?,
                );
            }
            sort_changes(&mut group);
            (group, true, boundary)
        }
    };

    let mut changes: BTreeMap<String, Vec<Value>> = SyncTable::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), Vec::new()))
        .collect();
    let returned = page.len();
    for record in page {
        changes
            .entry(record.table.as_str().to_string())
            .or_default()
            .push(record.data);
    }

    execute(conn, &db::sync::set_last_sync(user_id, &server_time)).map_err(db_err("record last sync"))?;
    tracing::debug!(user_id, returned, has_more, "sync pull");

    Ok(SyncPullResponse {
        has_more,
        last_sync_time,
        changes,
    })
}

// ---------------------------------------------------------------------------
// Status & housekeeping
// ---------------------------------------------------------------------------

pub fn status(conn: &Connection, user_id: &str) -> Result<SyncStatusResponse, ServiceError> {
    let counts: Vec<(String, i64)> = query_all(conn, &db::sync::count_by_status(user_id), |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
    .map_err(db_err("count sync operations"))?;

    let count_of = |wanted: SyncStatus| {
        counts
            .iter()
            .filter(|(s, _)| s == wanted.as_str())
            .map(|(_, n)| n)
            .sum::<i64>()
    };
    let last_sync_time: Option<String> =
        query_one(conn, &db::sync::get_last_sync(user_id), |row| row.get(0))
            .map_err(db_err("load last sync"))?;

    Ok(SyncStatusResponse {
        pending_operations: count_of(SyncStatus::Pending)
            + count_of(SyncStatus::Conflict)
            + count_of(SyncStatus::Error),
        conflicts: count_of(SyncStatus::Conflict),
        last_sync_time,
    })
}

pub fn list_operations(
    conn: &Connection,
    user_id: &str,
    status: Option<&str>,
) -> Result<Vec<SyncOperationRecord>, ServiceError> {
    let status = match status.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            SyncStatus::parse(raw)
                .ok_or_else(|| ServiceError::BadRequest(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };
    let rows = query_all(
        conn,
        &db::sync::list_operations(user_id, status.as_ref().map(SyncStatus::as_str)),
        operation_from_row,
    )
    .map_err(db_err("list sync operations"))?;
    Ok(rows.into_iter().map(|(op, _)| op).collect())
}

/// Delete the caller's settled operations older than the cutoff.
pub fn cleanup(
    conn: &Connection,
    user_id: &str,
    older_than_days: Option<i64>,
    now: DateTime<Utc>,
) -> Result<SyncCleanupResponse, ServiceError> {
    let cutoff = cleanup_cutoff(now, older_than_days)?;
    let deleted = execute(conn, &db::sync::delete_settled(user_id, &cutoff))
        .map_err(db_err("cleanup sync operations"))?;
    tracing::info!(user_id, deleted, "sync operations cleaned up");
    Ok(SyncCleanupResponse {
        deleted: deleted as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Db;
    use crate::test_support::{grant, seed_budget, seed_user};
    use chrono::Duration;
    use serde_json::json;

    fn t(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn op(table: &str, id: &str, operation: &str, local: Value) -> SyncOperationInput {
        SyncOperationInput {
            table: table.into(),
            record_id: id.into(),
            operation: operation.into(),
            local_data: local,
            server_data: None,
            base_revision: None,
        }
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn live_rows(conn: &Connection, table: SyncTable, user_id: &str) -> i64 {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE user_id = ?1 AND deleted_at IS NULL",
            table.as_str()
        );
        conn.query_row(&sql, [user_id], |row| row.get(0)).unwrap()
    }

    fn push_all(conn: &Connection, user: &str, ops: Vec<SyncOperationInput>) -> Vec<SyncOperationResult> {
        push(conn, user, &ops, 500, t("2025-02-01T10:00:00.000Z")).unwrap().results
    }

    fn operations(conn: &Connection, user: &str) -> Vec<SyncOperationRecord> {
        list_operations(conn, user, None).unwrap()
    }

    #[test]
    fn replayed_create_conflicts_instead_of_duplicating() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let id = new_id();
        let create = op("budgets", &id, "create", json!({"month": "2025-01", "totalLimit": 5000}));

        let first = push_all(&conn, &alice, vec![create.clone()]);
        assert_eq!(first[0].status, PushOutcome::Success);
        assert_eq!(first[0].revision, Some(1));

        let replay = push_all(&conn, &alice, vec![create]);
        assert_eq!(replay[0].status, PushOutcome::Conflict);
        assert!(replay[0].operation_id.is_some());
        assert_eq!(replay[0].server_data.as_ref().unwrap()["totalLimit"], json!(5000.0));
        assert_eq!(live_rows(&conn, SyncTable::Budgets, &alice), 1);

        let ops = operations(&conn, &alice);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, SyncStatus::Conflict);
        assert_eq!(ops[0].record_id, id);
        assert!(ops[0].server_data.is_some());
    }

    #[test]
    fn create_over_tombstone_conflicts() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let id = new_id();
        push_all(&conn, &alice, vec![op("categories", &id, "create", json!({"name": "Pets"}))]);
        let mut delete = op("categories", &id, "delete", json!({}));
        delete.base_revision = Some(1);
        assert_eq!(push_all(&conn, &alice, vec![delete])[0].status, PushOutcome::Success);

        let again = push_all(&conn, &alice, vec![op("categories", &id, "create", json!({"name": "Pets"}))]);
        assert_eq!(again[0].status, PushOutcome::Conflict);
        assert!(again[0].server_data.as_ref().unwrap()["deletedAt"].is_string());
    }

    #[test]
    fn update_checks_revision_then_server_copy() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let id = new_id();
        push_all(&conn, &alice, vec![op("categories", &id, "create", json!({"name": "Food"}))]);

        let mut stale = op("categories", &id, "update", json!({"name": "Groceries"}));
        stale.base_revision = Some(7);
        let res = push_all(&conn, &alice, vec![stale]);
        assert_eq!(res[0].status, PushOutcome::Conflict);
        assert_eq!(res[0].revision, Some(1));

        let mut fresh = op("categories", &id, "update", json!({"name": "Groceries"}));
        fresh.server_data = Some(json!({"revision": 1, "name": "Food"}));
        let res = push_all(&conn, &alice, vec![fresh]);
        assert_eq!(res[0].status, PushOutcome::Success);
        assert_eq!(res[0].revision, Some(2));

        let mut by_fields = op("categories", &id, "update", json!({"name": "Dining"}));
        by_fields.server_data = Some(json!({"name": "Food"}));
        assert_eq!(push_all(&conn, &alice, vec![by_fields])[0].status, PushOutcome::Conflict);

        let mut matching = op("categories", &id, "update", json!({"name": "Dining"}));
        matching.server_data = Some(json!({"name": "Groceries", "syncedLocally": true}));
        assert_eq!(push_all(&conn, &alice, vec![matching])[0].status, PushOutcome::Success);

        let bare = push_all(&conn, &alice, vec![op("categories", &id, "update", json!({"name": "X"}))]);
        assert_eq!(bare[0].status, PushOutcome::Error);
        assert_eq!(bare[0].error.as_deref(), Some("baseRevision or serverData required"));
    }

    #[test]
    fn invalid_operations_error_without_being_recorded() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let id = new_id();
        let results = push_all(
            &conn,
            &alice,
            vec![
                op("users", &id, "create", json!({})),
                op("budgets", &id, "upsert", json!({})),
                op("budgets", "not-a-uuid", "create", json!({"month": "2025-01", "totalLimit": 1})),
                op("budgets", &id, "create", json!({"month": "2025-01-15", "totalLimit": 1})),
                op("transactions", &id, "create", json!({"amount": 5, "type": "transfer", "transactionDate": "2025-01-02"})),
                op("budgets", &new_id(), "update", json!({"totalLimit": 1})),
            ],
        );
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.status == PushOutcome::Error && r.operation_id.is_none()));
        assert_eq!(results[2].record_id, "not-a-uuid");
        assert!(operations(&conn, &alice).is_empty());
    }

    #[test]
    fn constraint_failures_are_recorded_as_errors() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        seed_budget(&conn, &alice, "2025-01-01");
        let res = push_all(
            &conn,
            &alice,
            vec![op("budgets", &new_id(), "create", json!({"month": "2025-01", "totalLimit": 10}))],
        );
        assert_eq!(res[0].status, PushOutcome::Error);
        assert!(res[0].operation_id.is_some());
        let ops = list_operations(&conn, &alice, Some("error")).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].error.is_some());
    }

    #[test]
    fn other_users_rows_are_not_found() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let id = new_id();
        push_all(&conn, &alice, vec![op("categories", &id, "create", json!({"name": "Mine"}))]);

        let mut steal = op("categories", &id, "update", json!({"name": "Yours"}));
        steal.base_revision = Some(1);
        let res = push_all(&conn, &bob, vec![steal]);
        assert_eq!(res[0].status, PushOutcome::Error);
        assert_eq!(res[0].error.as_deref(), Some("record not found"));

        let res = push_all(&conn, &bob, vec![op("categories", &id, "create", json!({"name": "Yours"}))]);
        assert_eq!(res[0].status, PushOutcome::Conflict);
        assert!(res[0].server_data.is_none());
    }

    #[test]
    fn shared_budget_transactions_need_edit() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let carol = seed_user(&conn, "carol@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        grant(&conn, &budget, &alice, &bob, "edit");
        grant(&conn, &budget, &alice, &carol, "view");
        let tx = |id: &str| {
            op("transactions", id, "create", json!({
                "budgetId": budget, "amount": 12.5, "type": "expense", "transactionDate": "2025-01-05"
            }))
        };
        assert_eq!(push_all(&conn, &bob, vec![tx(&new_id())])[0].status, PushOutcome::Success);
        let denied = push_all(&conn, &carol, vec![tx(&new_id())]);
        assert_eq!(denied[0].status, PushOutcome::Error);
        assert!(operations(&conn, &carol).is_empty());
    }

    #[test]
    fn transactions_only_reference_usable_categories_and_own_methods() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let private = new_id();
        let card = new_id();
        push_all(&conn, &alice, vec![
            op("categories", &private, "create", json!({"name": "Alice only"})),
            op("payment_methods", &card, "create", json!({"name": "Visa", "type": "credit"})),
        ]);
        let system: String = conn
            .query_row("SELECT id FROM categories WHERE is_system = 1 LIMIT 1", [], |row| row.get(0))
            .unwrap();
        let tx = |extra: Value| {
            let mut data = json!({"amount": 3, "type": "expense", "transactionDate": "2025-01-05"});
            data.as_object_mut().unwrap().extend(extra.as_object().unwrap().clone());
            op("transactions", &new_id(), "create", data)
        };

        let res = push_all(&conn, &bob, vec![
            tx(json!({"categoryId": private})),
            tx(json!({"paymentMethodId": card})),
            tx(json!({"categoryId": system})),
        ]);
        assert_eq!(res[0].status, PushOutcome::Error);
        assert_eq!(res[0].error.as_deref(), Some("category not found"));
        assert_eq!(res[1].status, PushOutcome::Error);
        assert_eq!(res[1].error.as_deref(), Some("payment method not found"));
        assert_eq!(res[2].status, PushOutcome::Success);
        assert!(operations(&conn, &bob).is_empty());
        assert_eq!(live_rows(&conn, SyncTable::Transactions, &bob), 1);

        let own = push_all(&conn, &alice, vec![tx(json!({"categoryId": private, "paymentMethodId": card}))]);
        assert_eq!(own[0].status, PushOutcome::Success);
    }

    #[test]
    fn push_rejects_oversized_batches() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let ops = vec![op("categories", &new_id(), "create", json!({"name": "A"})); 3];
        let res = push(&conn, &alice, &ops, 2, Utc::now());
        assert!(matches!(res, Err(ServiceError::BadRequest(_))));
    }

    fn conflicted(conn: &Connection, user: &str) -> (String, String) {
        let id = new_id();
        push_all(conn, user, vec![op("categories", &id, "create", json!({"name": "Server"}))]);
        let mut stale = op("categories", &id, "update", json!({"name": "Local", "color": "#112233"}));
        stale.base_revision = Some(0);
        let res = push_all(conn, user, vec![stale]);
        (id, res[0].operation_id.clone().unwrap())
    }

    fn category_name(conn: &Connection, id: &str) -> String {
        conn.query_row("SELECT name FROM categories WHERE id = ?1", [id], |row| row.get(0))
            .unwrap()
    }

    fn resolve_req(operation_id: &str, resolution: &str, merged: Option<Value>) -> ResolveConflictRequest {
        ResolveConflictRequest {
            operation_id: operation_id.into(),
            resolution: resolution.into(),
            merged_data: merged,
        }
    }

    #[test]
    fn merge_without_data_is_rejected_before_lookup() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let res = resolve_conflict(&mut conn, &alice, &resolve_req("missing", "merge", None), Utc::now());
        assert!(matches!(res, Err(ServiceError::BadRequest(_))));
        let res = resolve_conflict(&mut conn, &alice, &resolve_req("missing", "theirs", None), Utc::now());
        assert!(matches!(res, Err(ServiceError::BadRequest(_))));
        let res = resolve_conflict(&mut conn, &alice, &resolve_req("missing", "server", None), Utc::now());
        assert!(matches!(res, Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn local_resolution_force_applies_client_payload() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let (id, op_id) = conflicted(&conn, &alice);

        let res = resolve_conflict(&mut conn, &alice, &resolve_req(&op_id, "local", None), Utc::now()).unwrap();
        assert_eq!(res.status, SyncStatus::Resolved);
        assert!(res.error.is_none());
        assert_eq!(category_name(&conn, &id), "Local");

        let again = resolve_conflict(&mut conn, &alice, &resolve_req(&op_id, "server", None), Utc::now());
        assert!(matches!(again, Err(ServiceError::Conflict(_))));
        let status = status(&conn, &alice).unwrap();
        assert_eq!(status.conflicts, 0);
        assert_eq!(status.pending_operations, 0);
    }

    #[test]
    fn server_and_merge_resolutions() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");

        let (id, op_id) = conflicted(&conn, &alice);
        let foreign = resolve_conflict(&mut conn, &bob, &resolve_req(&op_id, "server", None), Utc::now());
        assert!(matches!(foreign, Err(ServiceError::NotFound(_))));
        resolve_conflict(&mut conn, &alice, &resolve_req(&op_id, "server", None), Utc::now()).unwrap();
        assert_eq!(category_name(&conn, &id), "Server");

        let (id, op_id) = conflicted(&conn, &alice);
        let merged = json!({"name": "Merged", "color": "#112233"});
        let res = resolve_conflict(&mut conn, &alice, &resolve_req(&op_id, "merge", Some(merged)), Utc::now()).unwrap();
        assert_eq!(res.status, SyncStatus::Resolved);
        assert_eq!(category_name(&conn, &id), "Merged");
        let revision: i64 = conn
            .query_row("SELECT revision FROM categories WHERE id = ?1", [&id], |row| row.get(0))
            .unwrap();
        assert_eq!(revision, 2);
    }

    #[test]
    fn failed_reapplication_leaves_operation_in_error() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let (id, op_id) = conflicted(&conn, &alice);

        let bad = json!({"name": "", "color": 42});
        let res = resolve_conflict(&mut conn, &alice, &resolve_req(&op_id, "merge", Some(bad)), Utc::now()).unwrap();
        assert_eq!(res.status, SyncStatus::Error);
        assert!(res.error.is_some());
        assert_eq!(category_name(&conn, &id), "Server");
        assert_eq!(status(&conn, &alice).unwrap().pending_operations, 1);

        // An operation in error may be retried.
        let retry = resolve_conflict(&mut conn, &alice, &resolve_req(&op_id, "local", None), Utc::now()).unwrap();
        assert_eq!(retry.status, SyncStatus::Resolved);
    }

    #[test]
    fn pull_pages_never_split_a_timestamp_group() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let insert = |stamp: &str| {
            let fields = extract_fields(SyncTable::Categories, &json!({"name": "c"}), true).unwrap();
            execute(&conn, &db::records::insert(SyncTable::Categories, &new_id(), &alice, fields, stamp)).unwrap();
        };
        insert("2025-03-01T00:00:01.000Z");
        insert("2025-03-01T00:00:02.000Z");
        insert("2025-03-01T00:00:02.000Z");
        insert("2025-03-01T00:00:02.000Z");
        insert("2025-03-01T00:00:03.000Z");
        let now = t("2025-03-02T00:00:00.000Z");
        let total = |r: &SyncPullResponse| r.changes.values().map(Vec::len).sum::<usize>();

        let first = pull(&conn, &alice, None, 2, now).unwrap();
        assert!(first.has_more);
        assert_eq!(total(&first), 1);
        assert_eq!(first.last_sync_time, "2025-03-01T00:00:01.000Z");
        assert_eq!(first.changes.len(), SyncTable::ALL.len());

        let second = pull(&conn, &alice, Some(&first.last_sync_time), 2, now).unwrap();
        assert!(second.has_more);
        assert_eq!(total(&second), 3);
        assert_eq!(second.last_sync_time, "2025-03-01T00:00:02.000Z");

        let third = pull(&conn, &alice, Some(&second.last_sync_time), 2, now).unwrap();
        assert!(!third.has_more);
        assert_eq!(total(&third), 1);
        assert_eq!(third.last_sync_time, "2025-03-01T23:59:59.999Z");

        let done = pull(&conn, &alice, Some(&third.last_sync_time), 2, now).unwrap();
        assert_eq!(total(&done), 0);
        assert!(!done.has_more);
    }

    #[test]
    fn write_in_the_pull_millisecond_reaches_the_next_pull() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let at = t("2025-03-01T10:00:00.000Z");
        let count = |r: &SyncPullResponse| r.changes["categories"].len();

        let early = new_id();
        push(&conn, &alice, &[op("categories", &early, "create", json!({"name": "Early"}))], 500, at).unwrap();
        let first = pull(&conn, &alice, None, 100, at).unwrap();
        assert_eq!(count(&first), 0);
        assert!(!first.has_more);
        assert_eq!(first.last_sync_time, "2025-03-01T09:59:59.999Z");

        let late = new_id();
        let pushed = push(&conn, &alice, &[op("categories", &late, "create", json!({"name": "Late"}))], 500, at).unwrap();
        assert_eq!(pushed.results[0].status, PushOutcome::Success);

        let next = pull(&conn, &alice, Some(&first.last_sync_time), 100, at + Duration::milliseconds(1)).unwrap();
        let ids: Vec<&str> = next.changes["categories"]
            .iter()
            .filter_map(|c| c["id"].as_str())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&early.as_str()) && ids.contains(&late.as_str()));
        assert_eq!(next.last_sync_time, "2025-03-01T10:00:00.000Z");
    }

    #[test]
    fn pull_includes_tombstones_and_only_own_rows() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let id = new_id();
        push_all(&conn, &alice, vec![op("payment_methods", &id, "create", json!({"name": "Visa", "type": "credit"}))]);
        let mut delete = op("payment_methods", &id, "delete", json!({}));
        delete.base_revision = Some(1);
        push_all(&conn, &alice, vec![delete]);
        push_all(&conn, &bob, vec![op("categories", &new_id(), "create", json!({"name": "Bob's"}))]);

        let res = pull(&conn, &alice, None, 100, Utc::now()).unwrap();
        let methods = &res.changes["payment_methods"];
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0]["revision"], json!(2));
        assert!(methods[0]["deletedAt"].is_string());
        assert!(res.changes["categories"].is_empty());
        assert!(status(&conn, &alice).unwrap().last_sync_time.is_some());

        assert!(matches!(
            pull(&conn, &alice, Some("yesterday"), 100, Utc::now()),
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[test]
    fn cleanup_removes_old_settled_operations_only() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let (_, resolved) = conflicted(&conn, &alice);
        let (_, open) = conflicted(&conn, &alice);
        let long_ago = t("2024-01-01T00:00:00.000Z");
        resolve_conflict(&mut conn, &alice, &resolve_req(&resolved, "server", None), long_ago).unwrap();

        let kept = cleanup(&conn, &alice, Some(400), long_ago + Duration::days(30)).unwrap();
        assert_eq!(kept.deleted, 0);
        let swept = cleanup(&conn, &alice, None, Utc::now()).unwrap();
        assert_eq!(swept.deleted, 1);
        let left = operations(&conn, &alice);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, open);
        assert!(matches!(cleanup(&conn, &alice, Some(-1), Utc::now()), Err(ServiceError::BadRequest(_))));
    }
}
