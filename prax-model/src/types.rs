//! Scalar storage types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The declared type of a mapped scalar property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// UTC timestamp with millisecond precision.
    DateTime,
    /// UUID stored as binary subtype 4.
    Uuid,
    /// 12-byte document identifier.
    ObjectId,
    /// Opaque bytes.
    Binary,
    /// Dense float vector used for similarity search.
    Vector,
}

impl ScalarKind {
    /// Check if values of this kind are numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Double)
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Double => "Double",
            Self::String => "String",
            Self::DateTime => "DateTime",
            Self::Uuid => "Uuid",
            Self::ObjectId => "ObjectId",
            Self::Binary => "Binary",
            Self::Vector => "Vector",
        }
    }

    /// BSON type alias as understood by `$type`.
    pub fn bson_alias(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::DateTime => "date",
            Self::Uuid | Self::Binary => "binData",
            Self::ObjectId => "objectId",
            Self::Vector => "array",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_kinds() {
        assert!(ScalarKind::Int32.is_numeric());
        assert!(ScalarKind::Double.is_numeric());
        assert!(!ScalarKind::String.is_numeric());
    }

    #[test]
    fn test_bson_alias() {
        assert_eq!(ScalarKind::Int64.bson_alias(), "long");
        assert_eq!(ScalarKind::Uuid.bson_alias(), "binData");
    }
}
