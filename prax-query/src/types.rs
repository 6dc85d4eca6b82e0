//! Static result types carried by projections and shapers.

use std::fmt;

use prax_model::ScalarKind;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::value::Value;

/// The type of a shaped value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    /// A scalar of the given kind.
    Scalar {
        /// Scalar kind.
        kind: ScalarKind,
        /// Whether null is allowed.
        nullable: bool,
    },
    /// An instance of a mapped entity type.
    Entity(SmolStr),
    /// A record built by a projection.
    Record(SmolStr),
    /// A sequence of elements.
    Sequence(Box<TypeRef>),
    /// Not statically known.
    Unknown,
}

impl TypeRef {
    /// A non-nullable scalar.
    pub fn scalar(kind: ScalarKind) -> Self {
        Self::Scalar {
            kind,
            nullable: false,
        }
    }

    /// A nullable scalar.
    pub fn nullable(kind: ScalarKind) -> Self {
        Self::Scalar {
            kind,
            nullable: true,
        }
    }

    /// An entity type.
    pub fn entity(name: impl Into<SmolStr>) -> Self {
        Self::Entity(name.into())
    }

    /// Get the scalar kind, if scalar.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Scalar { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Get the entity type name, if an entity.
    pub fn entity_name(&self) -> Option<&SmolStr> {
        match self {
            Self::Entity(name) => Some(name),
            _ => None,
        }
    }

    /// Whether values of this type may be null.
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Scalar { nullable, .. } => *nullable,
            _ => true,
        }
    }

    /// The same type with nulls allowed.
    pub fn make_nullable(self) -> Self {
        match self {
            Self::Scalar { kind, .. } => Self::nullable(kind),
            other => other,
        }
    }

    /// The same type with nulls disallowed.
    pub fn make_required(self) -> Self {
        match self {
            Self::Scalar { kind, .. } => Self::scalar(kind),
            other => other,
        }
    }

    /// Type of a constant value.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::scalar(ScalarKind::Bool),
            Value::Int32(_) => Self::scalar(ScalarKind::Int32),
            Value::Int64(_) => Self::scalar(ScalarKind::Int64),
            Value::Double(_) => Self::scalar(ScalarKind::Double),
            Value::String(_) => Self::scalar(ScalarKind::String),
            Value::DateTime(_) => Self::scalar(ScalarKind::DateTime),
            Value::Uuid(_) => Self::scalar(ScalarKind::Uuid),
            Value::ObjectId(_) => Self::scalar(ScalarKind::ObjectId),
            Value::Binary(_) => Self::scalar(ScalarKind::Binary),
            Value::List(items) => Self::Sequence(Box::new(
                items.first().map(Self::of_value).unwrap_or(Self::Unknown),
            )),
            Value::Record { type_name, .. } => Self::Record(type_name.clone()),
            Value::Null | Value::Entity(_) => Self::Unknown,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar { kind, nullable } => {
                write!(f, "{}{}", kind, if *nullable { "?" } else { "" })
            }
            Self::Entity(name) | Self::Record(name) => f.write_str(name),
            Self::Sequence(element) => write!(f, "Sequence<{}>", element),
            Self::Unknown => f.write_str("?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullability() {
        let ty = TypeRef::scalar(ScalarKind::Int32);
        assert!(!ty.is_nullable());
        assert!(ty.clone().make_nullable().is_nullable());
        assert_eq!(ty.to_string(), "Int32");
        assert_eq!(TypeRef::nullable(ScalarKind::Double).to_string(), "Double?");
    }

    #[test]
    fn test_of_value() {
        assert_eq!(
            TypeRef::of_value(&Value::from(vec![1.0f64, 2.0])),
            TypeRef::Sequence(Box::new(TypeRef::scalar(ScalarKind::Double)))
        );
        assert_eq!(TypeRef::of_value(&Value::Null), TypeRef::Unknown);
    }
}
