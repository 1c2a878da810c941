//! Shared business logic: pure functions with no framework types.
//!
//! Route handlers and the sharing / sync cores call these, keeping the
//! validation rules in one place.

use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, Utc};

use crate::{PermissionLevel, ServiceError};

// ─── Validation ─────────────────────────────────────────────────────────────

/// Validate and normalize an email address. Returns the lowercased, trimmed email.
pub fn validate_email(email: &str) -> Result<String, ServiceError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !valid || email.len() > 254 {
        return Err(ServiceError::BadRequest("invalid email address".into()));
    }
    Ok(email)
}

/// Validate a display name (1-100 characters). Returns the trimmed name.
pub fn validate_name(field: &str, name: &str) -> Result<String, ServiceError> {
    let trimmed = name.trim().to_string();
    if trimmed.is_empty() || trimmed.chars().count() > 100 {
        return Err(ServiceError::BadRequest(format!(
            "{field} must be 1-100 characters"
        )));
    }
    Ok(trimmed)
}

/// Validate an ISO 4217-style currency code. Returns it uppercased.
pub fn validate_currency(currency: &str) -> Result<String, ServiceError> {
    let code = currency.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ServiceError::BadRequest(
            "currency must be a 3-letter code".into(),
        ));
    }
    Ok(code)
}

/// Validate a non-negative monetary amount.
pub fn validate_amount(field: &str, amount: f64) -> Result<f64, ServiceError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ServiceError::BadRequest(format!(
            "{field} must be a non-negative number"
        )));
    }
    Ok(amount)
}

/// Validate a transaction amount, which must be strictly positive.
pub fn validate_transaction_amount(amount: f64) -> Result<f64, ServiceError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ServiceError::BadRequest(
            "amount must be greater than zero".into(),
        ));
    }
    Ok(amount)
}

pub const DEFAULT_COLOR: &str = "#6B7280";

/// Validate a `#RRGGBB` color, falling back to the default gray.
pub fn validate_color(color: Option<&str>) -> Result<String, ServiceError> {
    let Some(color) = color.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(DEFAULT_COLOR.to_string());
    };
    let hex = color.strip_prefix('#').unwrap_or_default();
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ServiceError::BadRequest(
            "color must be a #RRGGBB hex value".into(),
        ));
    }
    Ok(color.to_uppercase())
}

/// Validate a reflection rating (1-5).
pub fn validate_rating(rating: Option<i64>) -> Result<Option<i64>, ServiceError> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => Err(ServiceError::BadRequest(
            "overallRating must be between 1 and 5".into(),
        )),
        other => Ok(other),
    }
}

/// Validate a client-supplied record id, or mint a fresh one.
pub fn record_id(id: Option<&str>) -> Result<String, ServiceError> {
    match id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => uuid::Uuid::parse_str(id)
            .map(|u| u.to_string())
            .map_err(|_| ServiceError::BadRequest("id must be a UUID".into())),
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

// ─── Dates & months ─────────────────────────────────────────────────────────

/// Parse a budget month. Accepts `YYYY-MM` or a first-of-month `YYYY-MM-01`.
pub fn parse_budget_month(month: &str) -> Result<NaiveDate, ServiceError> {
    let month = month.trim();
    let parsed = NaiveDate::parse_from_str(month, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d"))
        .map_err(|_| ServiceError::BadRequest("month must be YYYY-MM or YYYY-MM-01".into()))?;
    if parsed.day() != 1 {
        return Err(ServiceError::BadRequest(
            "month must be the first day of a month".into(),
        ));
    }
    Ok(parsed)
}

/// Storage form of a budget month: `YYYY-MM-01`.
pub fn format_month(month: NaiveDate) -> String {
    month.format("%Y-%m-%d").to_string()
}

/// Half-open date range `[first day, first day of next month)` as
/// `YYYY-MM-DD` strings, for filtering `transaction_date`.
pub fn month_range(month: NaiveDate) -> (String, String) {
    let next = next_month(month);
    (format_month(month), format_month(next))
}

fn next_month(month: NaiveDate) -> NaiveDate {
    let (y, m) = if month.month() == 12 {
        (month.year() + 1, 1)
    } else {
        (month.year(), month.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(month)
}

fn previous_month(month: NaiveDate) -> NaiveDate {
    let (y, m) = if month.month() == 1 {
        (month.year() - 1, 12)
    } else {
        (month.year(), month.month() - 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(month)
}

/// The `count` months ending at `latest`, oldest first.
pub fn trailing_months(latest: NaiveDate, count: u32) -> Vec<NaiveDate> {
    let mut months = Vec::with_capacity(count as usize);
    let mut cursor = latest.with_day(1).unwrap_or(latest);
    for _ in 0..count {
        months.push(cursor);
        cursor = previous_month(cursor);
    }
    months.reverse();
    months
}

/// Parse a calendar date. Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp
/// (the date part is kept).
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ServiceError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc).date_naive()))
        .map_err(|_| ServiceError::BadRequest(format!("{field} must be a YYYY-MM-DD date")))
}

/// Number of trailing months for the trends report (1-24, default 6).
pub fn trend_months(months: Option<u32>) -> Result<u32, ServiceError> {
    match months.unwrap_or(6) {
        n @ 1..=24 => Ok(n),
        _ => Err(ServiceError::BadRequest(
            "months must be between 1 and 24".into(),
        )),
    }
}

// ─── Timestamps ─────────────────────────────────────────────────────────────

/// Canonical storage form of an instant: RFC 3339, UTC, millisecond precision.
/// Strings in this form sort chronologically.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse any RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ServiceError::BadRequest(format!("invalid timestamp: {value}")))
}

// ─── Permissions ────────────────────────────────────────────────────────────

/// Whether `actual` access satisfies a `required` minimum.
pub fn has_sufficient_permission(actual: PermissionLevel, required: PermissionLevel) -> bool {
    actual >= required
}

// ─── Invitations ────────────────────────────────────────────────────────────

/// Invitations stay answerable for this many days after creation.
pub const INVITATION_TTL_DAYS: i64 = 7;

/// Expiry instant for an invitation created at `now`.
pub fn invitation_expires_at(now: DateTime<Utc>) -> String {
    format_timestamp(now + Duration::days(INVITATION_TTL_DAYS))
}

/// An invitation is expired once `now` reaches its expiry. Unparseable
/// expiries count as expired.
pub fn is_expired(expires_at: &str, now: DateTime<Utc>) -> bool {
    parse_timestamp(expires_at)
        .map(|exp| exp <= now)
        .unwrap_or(true)
}

// ─── Pagination ─────────────────────────────────────────────────────────────

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Clamp a list `limit` query parameter.
pub fn page_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Result of cutting a chronologically sorted change list to a page.
#[derive(Debug, PartialEq)]
pub enum PageCut<T> {
    /// Everything fit.
    Complete(Vec<T>),
    /// More rows remain after `watermark`, the stamp of the last row kept.
    Partial { items: Vec<T>, watermark: String },
    /// A single group of rows sharing `boundary` is larger than the page;
    /// the caller must return that whole group.
    Overflow { boundary: String },
}

/// Cut `items` (sorted by `stamp`) to at most `limit` rows without splitting
/// a group of rows that share one stamp across two pages.
pub fn cut_page<T>(mut items: Vec<T>, limit: usize, stamp: impl Fn(&T) -> &str) -> PageCut<T> {
    if items.len() <= limit {
        return PageCut::Complete(items);
    }
    let boundary = stamp(&items[limit]).to_string();
    items.truncate(limit);
    while items.last().is_some_and(|last| stamp(last) == boundary) {
        items.pop();
    }
    match items.last() {
        Some(last) => {
            let watermark = stamp(last).to_string();
            PageCut::Partial { items, watermark }
        }
        None => PageCut::Overflow { boundary },
    }
}

// ─── Sync housekeeping ──────────────────────────────────────────────────────

pub const DEFAULT_CLEANUP_DAYS: i64 = 30;

/// Cutoff timestamp for deleting settled sync operations.
pub fn cleanup_cutoff(now: DateTime<Utc>, older_than_days: Option<i64>) -> Result<String, ServiceError> {
    let days = older_than_days.unwrap_or(DEFAULT_CLEANUP_DAYS);
    if !(0..=3650).contains(&days) {
        return Err(ServiceError::BadRequest(
            "olderThanDays must be between 0 and 3650".into(),
        ));
    }
    Ok(format_timestamp(now - Duration::days(days)))
}
