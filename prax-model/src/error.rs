//! Error types for model construction and lookup.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building or querying a mapped model.
#[derive(Error, Debug, Diagnostic)]
pub enum ModelError {
    /// An entity type name that the model does not contain.
    #[error("unknown entity type `{name}`")]
    #[diagnostic(code(prax::model::unknown_entity))]
    UnknownEntity { name: String },

    /// A property that the entity type does not declare.
    #[error("entity type `{entity}` has no property `{property}`")]
    #[diagnostic(code(prax::model::unknown_property))]
    UnknownProperty { entity: String, property: String },

    /// A navigation that the entity type does not declare.
    #[error("entity type `{entity}` has no navigation `{navigation}`")]
    #[diagnostic(code(prax::model::unknown_navigation))]
    UnknownNavigation { entity: String, navigation: String },

    /// Invalid entity type definition.
    #[error("invalid entity type `{name}`: {message}")]
    #[diagnostic(code(prax::model::invalid_entity))]
    InvalidEntity { name: String, message: String },

    /// Entity type without a primary key.
    #[error("entity type `{entity}` has no primary key")]
    #[diagnostic(
        code(prax::model::missing_key),
        help("call `.key([..])` on the entity builder")
    )]
    MissingKey { entity: String },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(prax::model::duplicate))]
    Duplicate { kind: String, name: String },

    /// Invalid vector index definition.
    #[error("invalid vector index `{index}` on `{entity}`: {message}")]
    #[diagnostic(code(prax::model::invalid_vector_index))]
    InvalidVectorIndex {
        entity: String,
        index: String,
        message: String,
    },

    /// Validation error with multiple issues.
    #[error("model validation failed with {count} error(s)")]
    #[diagnostic(code(prax::model::validation_failed))]
    ValidationFailed {
        count: usize,
        #[related]
        errors: Vec<ModelError>,
    },
}

impl ModelError {
    /// Create an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Create an unknown property error.
    pub fn unknown_property(entity: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity: entity.into(),
            property: property.into(),
        }
    }

    /// Create an unknown navigation error.
    pub fn unknown_navigation(entity: impl Into<String>, navigation: impl Into<String>) -> Self {
        Self::UnknownNavigation {
            entity: entity.into(),
            navigation: navigation.into(),
        }
    }

    /// Create an invalid entity error.
    pub fn invalid_entity(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEntity {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invalid vector index error.
    pub fn invalid_vector_index(
        entity: impl Into<String>,
        index: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidVectorIndex {
            entity: entity.into(),
            index: index.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(unused_assignments)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::unknown_property("Customer", "Nickname");
        assert_eq!(
            err.to_string(),
            "entity type `Customer` has no property `Nickname`"
        );

        let err = ModelError::MissingKey {
            entity: "Order".to_string(),
        };
        assert_eq!(err.to_string(), "entity type `Order` has no primary key");
    }

    #[test]
    fn test_validation_failed_counts() {
        let err = ModelError::ValidationFailed {
            count: 2,
            errors: vec![
                ModelError::unknown_entity("A"),
                ModelError::duplicate("entity type", "B"),
            ],
        };
        assert!(err.to_string().contains("2 error(s)"));
    }
}
