//! Shared database schema, migrations, and query builders.
//!
//! Every builder returns `(sql, values)` rendered for SQLite; the server
//! binds the values to its rusqlite connection.

pub mod budgets;
pub mod categories;
pub mod migrations;
pub mod payment_methods;
pub mod records;
pub mod reflections;
pub mod sharing;
pub mod sync;
pub mod tables;
pub mod transactions;
pub mod users;

// Re-export tables for convenience
pub use tables::*;

/// A rendered query: SQL text plus positional values.
pub type Built = (String, sea_query::Values);

impl From<crate::records::FieldValue> for sea_query::Value {
    fn from(v: crate::records::FieldValue) -> Self {
        use crate::records::FieldValue;
        match v {
            FieldValue::Null => sea_query::Value::String(None),
            FieldValue::Text(s) => s.into(),
            FieldValue::Real(n) => n.into(),
            FieldValue::Bool(b) => b.into(),
        }
    }
}
