//! Field layout of the syncable tables.
//!
//! Sync payloads are loose JSON objects keyed by camelCase field names. This
//! module maps them onto columns and validates each value, so the sync core
//! can read and write any syncable table generically.

use serde_json::Value;

use crate::{PaymentMethodType, SyncTable, TransactionType, service};

/// How a field is stored and validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Text,
    /// Non-negative REAL.
    Amount,
    /// Any finite REAL (balances may go negative).
    Real,
    Bool,
    /// Arbitrary JSON, stored as serialized TEXT.
    Json,
    /// Budget month, normalized to `YYYY-MM-01`.
    Month,
    /// Calendar date, normalized to `YYYY-MM-DD`.
    Date,
    /// TEXT restricted to a fixed set of values.
    OneOf(&'static [&'static str]),
}

#[derive(Debug)]
pub struct SyncField {
    /// camelCase key in sync payloads.
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    /// Must be present (and non-null) when creating a record.
    pub required: bool,
}

const fn field(name: &'static str, column: &'static str, kind: FieldKind, required: bool) -> SyncField {
    SyncField {
        name,
        column,
        kind,
        required,
    }
}

const TRANSACTION_TYPES: &[&str] = &["expense", "income", "transfer"];

const CATEGORY_FIELDS: &[SyncField] = &[
    field("name", "name", FieldKind::Text, true),
    field("icon", "icon", FieldKind::Text, false),
    field("color", "color", FieldKind::Text, false),
    field("defaultLimit", "default_limit", FieldKind::Amount, false),
];

const BUDGET_FIELDS: &[SyncField] = &[
    field("name", "name", FieldKind::Text, false),
    field("month", "month", FieldKind::Month, true),
    field("totalLimit", "total_limit", FieldKind::Amount, true),
];

const TRANSACTION_FIELDS: &[SyncField] = &[
    field("budgetId", "budget_id", FieldKind::Text, false),
    field("categoryId", "category_id", FieldKind::Text, false),
    field("paymentMethodId", "payment_method_id", FieldKind::Text, false),
    field("amount", "amount", FieldKind::Amount, true),
    field("type", "transaction_type", FieldKind::OneOf(TRANSACTION_TYPES), true),
    field("isTransfer", "is_transfer", FieldKind::Bool, false),
    field("transferToId", "transfer_to_id", FieldKind::Text, false),
    field("description", "description", FieldKind::Text, false),
    field("transactionDate", "transaction_date", FieldKind::Date, true),
    field("isRecurring", "is_recurring", FieldKind::Bool, false),
    field("recurrencePattern", "recurrence_pattern", FieldKind::Json, false),
];

const PAYMENT_METHOD_FIELDS: &[SyncField] = &[
    field("name", "name", FieldKind::Text, true),
    field("type", "method_type", FieldKind::OneOf(PaymentMethodType::NAMES), true),
    field("lastFour", "last_four", FieldKind::Text, false),
    field("brand", "brand", FieldKind::Text, false),
    field("isDefault", "is_default", FieldKind::Bool, false),
    field("isActive", "is_active", FieldKind::Bool, false),
    field("creditLimit", "credit_limit", FieldKind::Amount, false),
    field("currentBalance", "current_balance", FieldKind::Real, false),
];

impl SyncTable {
    /// Data fields of the table, excluding the bookkeeping columns
    /// (`id`, `user_id`, `revision`, timestamps).
    pub fn fields(&self) -> &'static [SyncField] {
        match self {
            Self::Categories => CATEGORY_FIELDS,
            Self::Budgets => BUDGET_FIELDS,
            Self::Transactions => TRANSACTION_FIELDS,
            Self::PaymentMethods => PAYMENT_METHOD_FIELDS,
        }
    }
}

/// A validated column value, independent of any SQL library.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Real(f64),
    Bool(bool),
}

/// Validate `data` against the table layout and return the column values it
/// sets, in layout order. With `creating`, required fields must be present.
/// Unknown keys are ignored.
pub fn extract_fields(
    table: SyncTable,
    data: &Value,
    creating: bool,
) -> Result<Vec<(&'static SyncField, FieldValue)>, String> {
    let obj = data
        .as_object()
        .ok_or_else(|| format!("{table} payload must be a JSON object"))?;

    let mut out = Vec::new();
    for f in table.fields() {
        match obj.get(f.name) {
            None | Some(Value::Null) if f.required && creating => {
                return Err(format!("{} is required", f.name));
            }
            Some(Value::Null) if f.required => {
                return Err(format!("{} cannot be null", f.name));
            }
            None => {}
            Some(Value::Null) => out.push((f, FieldValue::Null)),
            Some(v) => out.push((f, convert(f, v)?)),
        }
    }

    if table == SyncTable::Transactions {
        check_transfer(&out)?;
    }
    Ok(out)
}

fn convert(f: &SyncField, v: &Value) -> Result<FieldValue, String> {
    let type_err = |expected: &str| format!("{} must be {expected}", f.name);
    match f.kind {
        FieldKind::Text => v
            .as_str()
            .map(|s| FieldValue::Text(s.to_string()))
            .ok_or_else(|| type_err("a string")),
        FieldKind::Amount => {
            let n = v.as_f64().ok_or_else(|| type_err("a number"))?;
            service::validate_amount(f.name, n)
                .map(FieldValue::Real)
                .map_err(|e| e.to_string())
        }
        FieldKind::Real => match v.as_f64() {
            Some(n) if n.is_finite() => Ok(FieldValue::Real(n)),
            _ => Err(type_err("a number")),
        },
        FieldKind::Bool => v
            .as_bool()
            .map(FieldValue::Bool)
            .ok_or_else(|| type_err("a boolean")),
        FieldKind::Json => Ok(FieldValue::Text(v.to_string())),
        FieldKind::Month => {
            let s = v.as_str().ok_or_else(|| type_err("a string"))?;
            service::parse_budget_month(s)
                .map(|m| FieldValue::Text(service::format_month(m)))
                .map_err(|e| e.to_string())
        }
        FieldKind::Date => {
            let s = v.as_str().ok_or_else(|| type_err("a string"))?;
            service::parse_date(f.name, s)
                .map(|d| FieldValue::Text(d.format("%Y-%m-%d").to_string()))
                .map_err(|e| e.to_string())
        }
        FieldKind::OneOf(allowed) => match v.as_str() {
            Some(s) if allowed.contains(&s) => Ok(FieldValue::Text(s.to_string())),
            _ => Err(format!("{} must be one of: {}", f.name, allowed.join(", "))),
        },
    }
}

/// A transfer transaction must name its target account.
fn check_transfer(values: &[(&'static SyncField, FieldValue)]) -> Result<(), String> {
    let is_transfer = values.iter().any(|(f, v)| {
        f.name == "type" && *v == FieldValue::Text(TransactionType::Transfer.as_str().to_string())
    });
    let has_target = values
        .iter()
        .any(|(f, v)| f.name == "transferToId" && matches!(v, FieldValue::Text(_)));
    if is_transfer && !has_target {
        return Err("transferToId is required for transfers".into());
    }
    Ok(())
}

/// Field-wise equality used when comparing a client's last-seen copy with the
/// server record. Numbers compare by value, so `5000` equals `5000.0`.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Keys of `expected` whose values differ from `actual`. Keys absent from
/// `actual` count as differing.
pub fn differing_fields(expected: &Value, actual: &Value) -> Vec<String> {
    let (Some(expected), Some(actual)) = (expected.as_object(), actual.as_object()) else {
        return vec!["*".to_string()];
    };
    expected
        .iter()
        .filter(|(k, v)| actual.get(k.as_str()).is_none_or(|cur| !same_value(v, cur)))
        .map(|(k, _)| k.clone())
        .collect()
}
