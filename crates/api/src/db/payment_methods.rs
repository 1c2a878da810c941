//! Payment method query builders.

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::PaymentMethods;

const PAYMENT_METHOD_COLUMNS: [PaymentMethods; 13] = [
    PaymentMethods::Id,
    PaymentMethods::UserId,
    PaymentMethods::Name,
    PaymentMethods::MethodType,
    PaymentMethods::LastFour,
    PaymentMethods::Brand,
    PaymentMethods::IsDefault,
    PaymentMethods::IsActive,
    PaymentMethods::CreditLimit,
    PaymentMethods::CurrentBalance,
    PaymentMethods::Revision,
    PaymentMethods::CreatedAt,
    PaymentMethods::UpdatedAt,
];

/// The user's live payment methods, default first.
pub fn list(user_id: &str) -> Built {
    Query::select()
        .columns(PAYMENT_METHOD_COLUMNS)
        .from(PaymentMethods::Table)
        .and_where(Expr::col(PaymentMethods::UserId).eq(user_id))
        .and_where(Expr::col(PaymentMethods::DeletedAt).is_null())
        .order_by(PaymentMethods::IsDefault, Order::Desc)
        .order_by(PaymentMethods::Name, Order::Asc)
        .build(SqliteQueryBuilder)
}

pub fn get(id: &str) -> Built {
    Query::select()
        .columns(PAYMENT_METHOD_COLUMNS)
        .from(PaymentMethods::Table)
        .and_where(Expr::col(PaymentMethods::Id).eq(id))
        .and_where(Expr::col(PaymentMethods::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

#[derive(Debug)]
pub struct NewPaymentMethod<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub name: &'a str,
    pub method_type: &'a str,
    pub last_four: Option<&'a str>,
    pub brand: Option<&'a str>,
    pub is_default: bool,
    pub credit_limit: Option<f64>,
    pub current_balance: Option<f64>,
}

pub fn insert(m: &NewPaymentMethod<'_>, now: &str) -> Built {
    Query::insert()
        .into_table(PaymentMethods::Table)
        .columns([
            PaymentMethods::Id,
            PaymentMethods::UserId,
            PaymentMethods::Name,
            PaymentMethods::MethodType,
            PaymentMethods::LastFour,
            PaymentMethods::Brand,
            PaymentMethods::IsDefault,
            PaymentMethods::CreditLimit,
            PaymentMethods::CurrentBalance,
            PaymentMethods::CreatedAt,
            PaymentMethods::UpdatedAt,
        ])
        .values_panic([
            m.id.into(),
            m.user_id.into(),
            m.name.into(),
            m.method_type.into(),
            m.last_four.map(str::to_string).into(),
            m.brand.map(str::to_string).into(),
            m.is_default.into(),
            m.credit_limit.into(),
            m.current_balance.into(),
            now.into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

#[derive(Debug, Default)]
pub struct PaymentMethodChanges<'a> {
    pub name: Option<&'a str>,
    pub last_four: Option<&'a str>,
    pub brand: Option<&'a str>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
    pub credit_limit: Option<f64>,
    pub current_balance: Option<f64>,
}

pub fn update(id: &str, c: &PaymentMethodChanges<'_>, now: &str) -> Built {
    let mut q = Query::update();
    q.table(PaymentMethods::Table)
        .value(PaymentMethods::UpdatedAt, now)
        .value(PaymentMethods::Revision, Expr::col(PaymentMethods::Revision).add(1));
    if let Some(v) = c.name {
        q.value(PaymentMethods::Name, v);
    }
    if let Some(v) = c.last_four {
        q.value(PaymentMethods::LastFour, v);
    }
    if let Some(v) = c.brand {
        q.value(PaymentMethods::Brand, v);
    }
    if let Some(v) = c.is_default {
        q.value(PaymentMethods::IsDefault, v);
    }
    if let Some(v) = c.is_active {
        q.value(PaymentMethods::IsActive, v);
    }
    if let Some(v) = c.credit_limit {
        q.value(PaymentMethods::CreditLimit, v);
    }
    if let Some(v) = c.current_balance {
        q.value(PaymentMethods::CurrentBalance, v);
    }
    q.and_where(Expr::col(PaymentMethods::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// Clear the default flag on the user's other methods. Touched rows get a
/// new revision so sync clients pick up the change.
pub fn clear_default(user_id: &str, keep_id: &str, now: &str) -> Built {
    Query::update()
        .table(PaymentMethods::Table)
        .value(PaymentMethods::IsDefault, false)
        .value(PaymentMethods::UpdatedAt, now)
        .value(PaymentMethods::Revision, Expr::col(PaymentMethods::Revision).add(1))
        .and_where(Expr::col(PaymentMethods::UserId).eq(user_id))
        .and_where(Expr::col(PaymentMethods::Id).ne(keep_id))
        .and_where(Expr::col(PaymentMethods::IsDefault).eq(true))
        .and_where(Expr::col(PaymentMethods::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

pub fn soft_delete(id: &str, now: &str) -> Built {
    Query::update()
        .table(PaymentMethods::Table)
        .value(PaymentMethods::DeletedAt, now)
        .value(PaymentMethods::UpdatedAt, now)
        .value(PaymentMethods::IsDefault, false)
        .value(PaymentMethods::Revision, Expr::col(PaymentMethods::Revision).add(1))
        .and_where(Expr::col(PaymentMethods::Id).eq(id))
        .build(SqliteQueryBuilder)
}
