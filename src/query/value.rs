//! The dynamic scalar type that flows from JSON input, through SQL
//! binding, through row scanning, and into the operator registry.
//!
//! Every component in `query::*` that touches a value the driver or the
//! client controls uses `DynValue` rather than a concrete Rust type,
//! because the formula pipeline is shaped entirely at request time —
//! there is no compile-time schema to hang a stronger type off of.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type};

/// A column value, a formula parameter, or an operator input/output.
#[derive(Debug, Clone, PartialEq)]
pub enum DynValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Bytes),
    Timestamp(DateTime<Utc>),
    /// Escape hatch for JSON/JSONB columns and for operators (like
    /// `contacts`, `additionalData`) that produce or consume a nested
    /// document rather than a scalar.
    Json(JsonValue),
}

impl DynValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DynValue::Null)
    }

    /// Universal numeric coercion: any integer width, float, or numeric
    /// string becomes an `i64`. Anything else is not a number.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            DynValue::Int(i) => Some(*i),
            DynValue::Float(f) => Some(*f as i64),
            DynValue::Decimal(d) => d.to_string().parse().ok().or_else(|| {
                use rust_decimal::prelude::ToPrimitive;
                d.to_i64()
            }),
            DynValue::Bool(b) => Some(if *b { 1 } else { 0 }),
            DynValue::Text(s) => s.trim().parse::<i64>().ok().or_else(|| {
                s.trim().parse::<f64>().ok().map(|f| f as i64)
            }),
            DynValue::Timestamp(ts) => Some(ts.timestamp()),
            DynValue::Null | DynValue::Bytes(_) | DynValue::Json(_) => None,
        }
    }

    pub fn to_float(&self) -> Option<f64> {
        match self {
            DynValue::Float(f) => Some(*f),
            DynValue::Int(i) => Some(*i as f64),
            DynValue::Decimal(d) => {
                use rust_decimal::prelude::ToPrimitive;
                d.to_f64()
            }
            DynValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Null-safe stringification: `Null` becomes `None`, everything else
    /// becomes its natural textual representation.
    pub fn to_string_opt(&self) -> Option<String> {
        match self {
            DynValue::Null => None,
            DynValue::Bool(b) => Some(b.to_string()),
            DynValue::Int(i) => Some(i.to_string()),
            DynValue::Float(f) => Some(f.to_string()),
            DynValue::Decimal(d) => Some(d.to_string()),
            DynValue::Text(s) => Some(s.clone()),
            DynValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            DynValue::Timestamp(ts) => Some(ts.to_rfc3339()),
            DynValue::Json(v) => Some(
                serde_json::to_string(v).unwrap_or_else(|_| v.to_string()),
            ),
        }
    }

    /// As above but never `None` — callers that need a plain string for
    /// concatenation use this instead of threading an `Option` through.
    pub fn to_display_string(&self) -> String {
        self.to_string_opt().unwrap_or_default()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => DynValue::Null,
            JsonValue::Bool(b) => DynValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DynValue::Int(i)
                } else {
                    DynValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => DynValue::Text(s),
            other => DynValue::Json(other),
        }
    }

    /// Converts into a `serde_json::Value` for output serialization.
    pub fn into_json(self) -> JsonValue {
        match self {
            DynValue::Null => JsonValue::Null,
            DynValue::Bool(b) => JsonValue::Bool(b),
            DynValue::Int(i) => JsonValue::from(i),
            DynValue::Float(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DynValue::Decimal(d) => {
                serde_json::Number::from_f64({
                    use rust_decimal::prelude::ToPrimitive;
                    d.to_f64().unwrap_or_default()
                })
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(d.to_string()))
            }
            DynValue::Text(s) => JsonValue::String(s),
            DynValue::Bytes(b) => JsonValue::String(BASE64.encode(b)),
            DynValue::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
            DynValue::Json(v) => v,
        }
    }

    /// Scans one cell of a `tokio_postgres` row into a `DynValue`,
    /// dispatching on the driver-reported column type. Unrecognized
    /// types fall back to a text cast rather than panicking — the row
    /// mapper must tolerate whatever the driver reports.
    pub fn from_row(row: &tokio_postgres::Row, idx: usize) -> Result<Self, tokio_postgres::Error> {
        let column_type = row.columns()[idx].type_();
        match *column_type {
            Type::BOOL => Ok(row
                .try_get::<_, Option<bool>>(idx)?
                .map(DynValue::Bool)
                .unwrap_or(DynValue::Null)),
            Type::INT2 => Ok(row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| DynValue::Int(v as i64))
                .unwrap_or(DynValue::Null)),
            Type::INT4 => Ok(row
                .try_get::<_, Option<i32>>(idx)?
                .map(|v| DynValue::Int(v as i64))
                .unwrap_or(DynValue::Null)),
            Type::INT8 => Ok(row
                .try_get::<_, Option<i64>>(idx)?
                .map(DynValue::Int)
                .unwrap_or(DynValue::Null)),
            Type::FLOAT4 => Ok(row
                .try_get::<_, Option<f32>>(idx)?
                .map(|v| DynValue::Float(v as f64))
                .unwrap_or(DynValue::Null)),
            Type::FLOAT8 => Ok(row
                .try_get::<_, Option<f64>>(idx)?
                .map(DynValue::Float)
                .unwrap_or(DynValue::Null)),
            Type::NUMERIC => Ok(row
                .try_get::<_, Option<Decimal>>(idx)?
                .map(DynValue::Decimal)
                .unwrap_or(DynValue::Null)),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Ok(row
                .try_get::<_, Option<String>>(idx)?
                .map(DynValue::Text)
                .unwrap_or(DynValue::Null)),
            Type::BYTEA => Ok(row
                .try_get::<_, Option<Vec<u8>>>(idx)?
                .map(|v| DynValue::Bytes(Bytes::from(v)))
                .unwrap_or(DynValue::Null)),
            Type::TIMESTAMP => Ok(row
                .try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(|v| DynValue::Timestamp(DateTime::from_naive_utc_and_offset(v, Utc)))
                .unwrap_or(DynValue::Null)),
            Type::TIMESTAMPTZ => Ok(row
                .try_get::<_, Option<DateTime<Utc>>>(idx)?
                .map(DynValue::Timestamp)
                .unwrap_or(DynValue::Null)),
            Type::DATE => Ok(row
                .try_get::<_, Option<NaiveDate>>(idx)?
                .map(|d| {
                    DynValue::Timestamp(DateTime::from_naive_utc_and_offset(
                        d.and_hms_opt(0, 0, 0).unwrap_or_default(),
                        Utc,
                    ))
                })
                .unwrap_or(DynValue::Null)),
            Type::JSON | Type::JSONB => Ok(row
                .try_get::<_, Option<JsonValue>>(idx)?
                .map(DynValue::Json)
                .unwrap_or(DynValue::Null)),
            _ => Ok(row
                .try_get::<_, Option<String>>(idx)
                .unwrap_or(None)
                .map(DynValue::Text)
                .unwrap_or(DynValue::Null)),
        }
    }
}

impl fmt::Display for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Lets a `Vec<DynValue>` be passed straight to `tokio_postgres` as
/// positional bind parameters.
impl ToSql for DynValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            DynValue::Null => Ok(IsNull::Yes),
            DynValue::Bool(b) => b.to_sql(ty, out),
            DynValue::Int(i) => i.to_sql(ty, out),
            DynValue::Float(f) => f.to_sql(ty, out),
            DynValue::Decimal(d) => d.to_sql(ty, out),
            DynValue::Text(s) => s.to_sql(ty, out),
            DynValue::Bytes(b) => b.as_ref().to_sql(ty, out),
            DynValue::Timestamp(ts) => ts.to_sql(ty, out),
            DynValue::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

/// Not used for decoding (scanning goes through `from_row`'s explicit
/// type dispatch), but required so `DynValue` satisfies trait bounds
/// some `tokio-postgres` helpers ask for.
impl<'a> FromSql<'a> for DynValue {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        String::from_sql(ty, raw).map(DynValue::Text)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_int_coerces_numeric_string() {
        assert_eq!(DynValue::Text("42".to_string()).to_int(), Some(42));
        assert_eq!(DynValue::Int(7).to_int(), Some(7));
        assert_eq!(DynValue::Float(7.9).to_int(), Some(7));
    }

    #[test]
    fn null_is_null_safe() {
        assert_eq!(DynValue::Null.to_string_opt(), None);
        assert_eq!(DynValue::Null.to_int(), None);
    }

    #[test]
    fn display_matches_formatted_value() {
        assert_eq!(DynValue::Int(5).to_display_string(), "5");
        assert_eq!(DynValue::Text("hi".into()).to_display_string(), "hi");
    }
}
