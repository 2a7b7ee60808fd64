//! Dynamically typed statement parameters.
//!
//! Write operations travel through the processor queue as data; parameters
//! are carried as [`SqlValue`]s and bound positionally when the statement
//! executes.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::Postgres;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Bool(bool),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Date(Option<NaiveDate>),
    Time(Option<NaiveTime>),
    Timestamp(Option<NaiveDateTime>),
    Json(Option<JsonValue>),
    JsonArray(Vec<JsonValue>),
    TextArray(Vec<String>),
}

impl SqlValue {
    pub fn bind<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            Self::Text(value) => query.bind(value),
            Self::Bool(value) => query.bind(value),
            Self::Int(value) => query.bind(value),
            Self::BigInt(value) => query.bind(value),
            Self::Date(value) => query.bind(value),
            Self::Time(value) => query.bind(value),
            Self::Timestamp(value) => query.bind(value),
            Self::Json(value) => query.bind(value.map(Json)),
            Self::JsonArray(values) => {
                query.bind(values.into_iter().map(Json).collect::<Vec<_>>())
            }
            Self::TextArray(values) => query.bind(values),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(Some(value.to_owned()))
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(Some(value))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(Some(value))
    }
}

impl From<Option<i32>> for SqlValue {
    fn from(value: Option<i32>) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::BigInt(Some(value))
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(Some(value))
    }
}

impl From<Option<NaiveDate>> for SqlValue {
    fn from(value: Option<NaiveDate>) -> Self {
        Self::Date(value)
    }
}

impl From<Option<NaiveTime>> for SqlValue {
    fn from(value: Option<NaiveTime>) -> Self {
        Self::Time(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(Some(value))
    }
}

impl From<Option<NaiveDateTime>> for SqlValue {
    fn from(value: Option<NaiveDateTime>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        Self::Json(Some(value))
    }
}

impl From<Vec<JsonValue>> for SqlValue {
    fn from(values: Vec<JsonValue>) -> Self {
        Self::JsonArray(values)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(values: Vec<String>) -> Self {
        Self::TextArray(values)
    }
}
