//! SQL value types shared by snapshots, transforms and stores.
//!
//! Values are owned: a snapshot outlives the connection it was read from and
//! transforms rewrite cells in place.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Type hint for NULL values and for parsing textual values from configuration.
///
/// Every column of a snapshot maps to one of these, so a NULL still knows
/// which parameter type it must be bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    Date,
}

impl SqlNullType {
    /// Map a catalog type name (PostgreSQL or SQL Server spelling) to a value type.
    ///
    /// Unknown types fall back to text, which both engines can cast from.
    pub fn from_type_name(data_type: &str) -> Self {
        let dt = data_type.to_lowercase();
        let base = dt.split('(').next().unwrap_or("").trim();
        match base {
            "bool" | "boolean" | "bit" => SqlNullType::Bool,
            "int2" | "smallint" | "tinyint" => SqlNullType::I16,
            "int4" | "integer" | "int" | "serial" => SqlNullType::I32,
            "int8" | "bigint" | "bigserial" => SqlNullType::I64,
            "float4" | "float8" | "real" | "float" | "double precision" => SqlNullType::F64,
            "numeric" | "decimal" => SqlNullType::Decimal,
            "uuid" | "uniqueidentifier" => SqlNullType::Uuid,
            "bytea" | "binary" | "varbinary" | "image" => SqlNullType::Bytes,
            "timestamp"
            | "timestamp without time zone"
            | "datetime"
            | "datetime2"
            | "smalldatetime" => SqlNullType::DateTime,
            "date" => SqlNullType::Date,
            _ => SqlNullType::String,
        }
    }

    /// Whether values of this type are whole numbers.
    pub fn is_integer(&self) -> bool {
        matches!(self, SqlNullType::I16 | SqlNullType::I32 | SqlNullType::I64)
    }
}

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with type hint for correct parameter binding.
    Null(SqlNullType),

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 64-bit floating point.
    F64(f64),

    /// Text/string data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Date without time component.
    Date(NaiveDate),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Get the SqlNullType for this value.
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I16(_) => SqlNullType::I16,
            SqlValue::I32(_) => SqlNullType::I32,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Bytes(_) => SqlNullType::Bytes,
            SqlValue::Uuid(_) => SqlNullType::Uuid,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::DateTime(_) => SqlNullType::DateTime,
            SqlValue::Date(_) => SqlNullType::Date,
        }
    }

    /// Borrow the text of a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read an integral value regardless of its width.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(*v as i64),
            SqlValue::I32(v) => Some(*v as i64),
            SqlValue::I64(v) => Some(*v),
            SqlValue::Decimal(d) if d.fract().is_zero() => i64::try_from(*d).ok(),
            _ => None,
        }
    }

    /// Build a value of the given type from an integer.
    ///
    /// Used when a transform generates sequence numbers for a column.
    pub fn from_i64(value: i64, ty: SqlNullType) -> std::result::Result<Self, String> {
        let out_of_range = || format!("{} does not fit in a {:?} column", value, ty);
        match ty {
            SqlNullType::I16 => i16::try_from(value)
                .map(SqlValue::I16)
                .map_err(|_| out_of_range()),
            SqlNullType::I32 => i32::try_from(value)
                .map(SqlValue::I32)
                .map_err(|_| out_of_range()),
            SqlNullType::I64 => Ok(SqlValue::I64(value)),
            SqlNullType::Decimal => Ok(SqlValue::Decimal(Decimal::from(value))),
            SqlNullType::F64 => Ok(SqlValue::F64(value as f64)),
            SqlNullType::String => Ok(SqlValue::Text(value.to_string())),
            other => Err(format!("cannot store a number in a {:?} column", other)),
        }
    }

    /// Parse configuration text as a value of the given type.
    pub fn parse_as(text: &str, ty: SqlNullType) -> std::result::Result<Self, String> {
        let bad = |what: &str| format!("'{}' is not a valid {}", text, what);
        let trimmed = text.trim();
        match ty {
            SqlNullType::String => Ok(SqlValue::Text(text.to_string())),
            SqlNullType::Bool => match trimmed.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Ok(SqlValue::Bool(true)),
                "false" | "f" | "no" | "n" | "0" => Ok(SqlValue::Bool(false)),
                _ => Err(bad("boolean")),
            },
            SqlNullType::I16 => trimmed
                .parse::<i16>()
                .map(SqlValue::I16)
                .map_err(|_| bad("smallint")),
            SqlNullType::I32 => trimmed
                .parse::<i32>()
                .map(SqlValue::I32)
                .map_err(|_| bad("integer")),
            SqlNullType::I64 => trimmed
                .parse::<i64>()
                .map(SqlValue::I64)
                .map_err(|_| bad("bigint")),
            SqlNullType::F64 => trimmed
                .parse::<f64>()
                .map(SqlValue::F64)
                .map_err(|_| bad("float")),
            SqlNullType::Decimal => Decimal::from_str(trimmed)
                .map(SqlValue::Decimal)
                .map_err(|_| bad("decimal")),
            SqlNullType::Uuid => Uuid::parse_str(trimmed)
                .map(SqlValue::Uuid)
                .map_err(|_| bad("uuid")),
            SqlNullType::Bytes => hex::decode(trimmed)
                .map(SqlValue::Bytes)
                .map_err(|_| bad("hex string")),
            SqlNullType::DateTime => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
                .map(SqlValue::DateTime)
                .map_err(|_| bad("timestamp")),
            SqlNullType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(SqlValue::Date)
                .map_err(|_| bad("date")),
        }
    }

    /// Textual form used for text-cast parameters and logs. `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null(_) => None,
            SqlValue::Bool(b) => Some(if *b { "t" } else { "f" }.to_string()),
            SqlValue::I16(n) => Some(n.to_string()),
            SqlValue::I32(n) => Some(n.to_string()),
            SqlValue::I64(n) => Some(n.to_string()),
            SqlValue::F64(n) => Some(n.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Bytes(b) => Some(format!("\\x{}", hex::encode(b))),
            SqlValue::Uuid(u) => Some(u.to_string()),
            SqlValue::Decimal(d) => Some(d.to_string()),
            SqlValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            SqlValue::Date(d) => Some(d.to_string()),
        }
    }

    /// Convert to a JSON value for snapshot dumps.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            SqlValue::Null(_) => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::I16(n) => Value::from(*n),
            SqlValue::I32(n) => Value::from(*n),
            SqlValue::I64(n) => Value::from(*n),
            SqlValue::F64(n) => Value::from(*n),
            other => Value::String(other.to_text().unwrap_or_default()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null(_) => write!(f, "NULL"),
            SqlValue::Text(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.to_text().unwrap_or_default()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_map_across_dialects() {
        assert_eq!(SqlNullType::from_type_name("int4"), SqlNullType::I32);
        assert_eq!(SqlNullType::from_type_name("INT"), SqlNullType::I32);
        assert_eq!(SqlNullType::from_type_name("bit"), SqlNullType::Bool);
        assert_eq!(SqlNullType::from_type_name("varchar(255)"), SqlNullType::String);
        assert_eq!(SqlNullType::from_type_name("nvarchar"), SqlNullType::String);
        assert_eq!(SqlNullType::from_type_name("datetime2"), SqlNullType::DateTime);
        assert_eq!(SqlNullType::from_type_name("numeric(10,2)"), SqlNullType::Decimal);
        assert_eq!(SqlNullType::from_type_name("uniqueidentifier"), SqlNullType::Uuid);
    }

    #[test]
    fn test_parse_as() {
        assert_eq!(
            SqlValue::parse_as(" 42 ", SqlNullType::I32).unwrap(),
            SqlValue::I32(42)
        );
        assert_eq!(
            SqlValue::parse_as("yes", SqlNullType::Bool).unwrap(),
            SqlValue::Bool(true)
        );
        assert_eq!(
            SqlValue::parse_as("Archive", SqlNullType::String).unwrap(),
            SqlValue::Text("Archive".into())
        );
        assert!(SqlValue::parse_as("abc", SqlNullType::I64).is_err());
        assert!(SqlValue::parse_as("2024-02-30", SqlNullType::Date).is_err());
    }

    #[test]
    fn test_from_i64_respects_width() {
        assert_eq!(
            SqlValue::from_i64(7, SqlNullType::I16).unwrap(),
            SqlValue::I16(7)
        );
        assert!(SqlValue::from_i64(70_000, SqlNullType::I16).is_err());
        assert!(SqlValue::from_i64(1, SqlNullType::Bool).is_err());
    }

    #[test]
    fn test_as_i64_reads_all_integer_widths() {
        assert_eq!(SqlValue::I16(3).as_i64(), Some(3));
        assert_eq!(SqlValue::I32(3).as_i64(), Some(3));
        assert_eq!(SqlValue::Decimal(Decimal::from(9)).as_i64(), Some(9));
        assert_eq!(SqlValue::Text("3".into()).as_i64(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(SqlValue::Null(SqlNullType::I32).to_string(), "NULL");
        assert_eq!(SqlValue::Text("Extranet".into()).to_string(), "'Extranet'");
        assert_eq!(SqlValue::Bool(true).to_string(), "t");
    }
}
