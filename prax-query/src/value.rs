//! Runtime values flowing through translation and shaping.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};
use indexmap::IndexMap;
use prax_model::ScalarKind;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use uuid::Uuid;

use crate::error::{QueryError, QueryResult};

/// Handle to an entity materialized into a context arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A loosely typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// 64-bit float.
    Double(f64),
    /// String value.
    String(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// UUID.
    Uuid(Uuid),
    /// 12-byte document identifier.
    ObjectId([u8; 12]),
    /// Opaque bytes.
    Binary(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Anonymous or named record built by a projection.
    Record {
        /// Record type name.
        type_name: SmolStr,
        /// Field values in declaration order.
        fields: IndexMap<SmolStr, Value>,
    },
    /// Reference to a materialized entity.
    Entity(EntityId),
}

impl Value {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Uuid(_) => "Uuid",
            Self::ObjectId(_) => "ObjectId",
            Self::Binary(_) => "Binary",
            Self::List(_) => "List",
            Self::Record { .. } => "Record",
            Self::Entity(_) => "Entity",
        }
    }

    /// Get a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get any integer as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get any number as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Get a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get an entity handle.
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Self::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// Get a record field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    /// Check if the value is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int32(_) | Self::Int64(_) | Self::Double(_))
    }

    /// Hex form of an object id.
    pub fn object_id_hex(bytes: &[u8; 12]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a 24-character hex object id.
    pub fn parse_object_id(hex: &str) -> Option<[u8; 12]> {
        if hex.len() != 24 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(bytes)
    }

    /// Default value of a scalar kind.
    ///
    /// Nullable kinds and reference-like kinds default to null.
    pub fn default_for(kind: ScalarKind, nullable: bool) -> Value {
        if nullable {
            return Value::Null;
        }
        match kind {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::Int32 => Value::Int32(0),
            ScalarKind::Int64 => Value::Int64(0),
            ScalarKind::Double => Value::Double(0.0),
            ScalarKind::Uuid => Value::Uuid(Uuid::nil()),
            ScalarKind::ObjectId => Value::ObjectId([0; 12]),
            ScalarKind::String
            | ScalarKind::DateTime
            | ScalarKind::Binary
            | ScalarKind::Vector => Value::Null,
        }
    }

    /// Convert the value to the given scalar kind.
    ///
    /// Performs numeric widening and narrowing (when lossless), and parses
    /// strings into object ids and UUIDs. Null converts to null.
    pub fn coerce(self, kind: ScalarKind) -> QueryResult<Value> {
        let converted = match (kind, self) {
            (_, Value::Null) => Some(Value::Null),
            (ScalarKind::Bool, v @ Value::Bool(_)) => Some(v),
            (ScalarKind::Int32, v @ Value::Int32(_)) => Some(v),
            (ScalarKind::Int32, Value::Int64(v)) => i32::try_from(v).ok().map(Value::Int32),
            (ScalarKind::Int32, Value::Double(v)) if v.fract() == 0.0 => {
                (v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX)).then(|| Value::Int32(v as i32))
            }
            (ScalarKind::Int64, Value::Int32(v)) => Some(Value::Int64(i64::from(v))),
            (ScalarKind::Int64, v @ Value::Int64(_)) => Some(v),
            (ScalarKind::Int64, Value::Double(v)) if v.fract() == 0.0 => Some(Value::Int64(v as i64)),
            (ScalarKind::Double, v) if v.is_numeric() => v.as_f64().map(Value::Double),
            (ScalarKind::String, v @ Value::String(_)) => Some(v),
            (ScalarKind::DateTime, v @ Value::DateTime(_)) => Some(v),
            (ScalarKind::Uuid, v @ Value::Uuid(_)) => Some(v),
            (ScalarKind::Uuid, Value::String(s)) => Uuid::parse_str(&s).ok().map(Value::Uuid),
            (ScalarKind::ObjectId, v @ Value::ObjectId(_)) => Some(v),
            (ScalarKind::ObjectId, Value::String(s)) => {
                Value::parse_object_id(&s).map(Value::ObjectId)
            }
            (ScalarKind::Binary, v @ Value::Binary(_)) => Some(v),
            (ScalarKind::Vector, Value::List(items)) => items
                .into_iter()
                .map(|i| i.as_f64().map(Value::Double))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            (_, other) => {
                return Err(QueryError::invalid_data_type(format!(
                    "Cannot convert {} value `{}` to {}",
                    other.type_name(),
                    other,
                    kind
                )));
            }
        };

        converted.ok_or_else(|| {
            QueryError::invalid_data_type(format!("Value is out of range for {}", kind))
        })
    }

    /// Compare two values of compatible types.
    ///
    /// Numbers compare across integer and float kinds. Returns `None` for
    /// incomparable pairs, including anything compared with null.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (a, b) if a.as_i64().is_some() && b.as_i64().is_some() => {
                Some(a.as_i64()?.cmp(&b.as_i64()?))
            }
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::ObjectId(a), Value::ObjectId(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality that treats numbers of different kinds as equal when their values match.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => a.compare(b) == Some(Ordering::Equal),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (a, b) => a == b,
        }
    }

    /// Read a well-known member of a scalar value (`Length`, `Year`, ...).
    pub fn member(&self, name: &str) -> Option<Value> {
        match (self, name) {
            (Value::Record { fields, .. }, _) => fields.get(name).cloned(),
            (Value::String(s), "Length") => Some(Value::Int32(s.chars().count() as i32)),
            (Value::List(items), "Count" | "Length") => Some(Value::Int32(items.len() as i32)),
            (Value::DateTime(d), "Year") => Some(Value::Int32(d.year())),
            (Value::DateTime(d), "Month") => Some(Value::Int32(d.month() as i32)),
            (Value::DateTime(d), "Day") => Some(Value::Int32(d.day() as i32)),
            (Value::DateTime(d), "Hour") => Some(Value::Int32(d.hour() as i32)),
            (Value::DateTime(d), "Minute") => Some(Value::Int32(d.minute() as i32)),
            (Value::DateTime(d), "Second") => Some(Value::Int32(d.second() as i32)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}L", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::ObjectId(bytes) => write!(f, "ObjectId({})", Value::object_id_hex(bytes)),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Record { type_name, fields } => {
                write!(f, "{} {{ ", type_name)?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                f.write_str(" }")
            }
            Value::Entity(id) => write!(f, "Entity({})", id),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_coerce_widens_and_parses() {
        assert_eq!(Value::Int32(5).coerce(ScalarKind::Int64).unwrap(), Value::Int64(5));
        assert_eq!(Value::Int64(7).coerce(ScalarKind::Double).unwrap(), Value::Double(7.0));

        let oid = Value::from("5f1d7f3e9d3b2a0011223344")
            .coerce(ScalarKind::ObjectId)
            .unwrap();
        assert!(matches!(oid, Value::ObjectId(bytes) if bytes[0] == 0x5f && bytes[11] == 0x44));
    }

    #[test]
    fn test_coerce_rejects_incompatible() {
        let err = Value::from("abc").coerce(ScalarKind::Int32).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidDataType);
        assert!(Value::Int64(i64::MAX).coerce(ScalarKind::Int32).is_err());
    }

    #[test]
    fn test_compare_across_numeric_kinds() {
        assert_eq!(Value::Int32(3).compare(&Value::Double(3.5)), Some(Ordering::Less));
        assert_eq!(Value::Int64(3).compare(&Value::Int32(3)), Some(Ordering::Equal));
        assert!(Value::Int32(3).loose_eq(&Value::Int64(3)));
        assert_eq!(Value::Null.compare(&Value::Int32(1)), None);
    }

    #[test]
    fn test_scalar_members() {
        let date = Value::DateTime(Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());
        assert_eq!(date.member("Year"), Some(Value::Int32(2024)));
        assert_eq!(Value::from("héllo").member("Length"), Some(Value::Int32(5)));
        assert_eq!(date.member("Nope"), None);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Value::default_for(ScalarKind::Int32, false), Value::Int32(0));
        assert_eq!(Value::default_for(ScalarKind::Int32, true), Value::Null);
        assert_eq!(Value::default_for(ScalarKind::String, false), Value::Null);
    }
}
