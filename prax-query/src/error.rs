//! Error types for query translation and execution with actionable messages.
//!
//! Every error carries:
//! - An error code for programmatic handling
//! - Actionable suggestions for fixing the problem
//! - Context about which construct, entity or field failed
//!
//! # Error Codes
//!
//! Error codes follow a pattern: P{category}{number}
//! - 1xxx: Translation errors (untranslatable construct, include, bindings)
//! - 2xxx: Vector search errors
//! - 3xxx: Connection errors
//! - 4xxx: Result cardinality errors
//! - 5xxx: Execution errors
//! - 6xxx: Data errors
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use prax_query::{QueryError, ErrorCode};
//!
//! let err = QueryError::translation_failed("GroupBy");
//! assert_eq!(err.code, ErrorCode::TranslationFailed);
//! assert!(err.to_string().contains("GroupBy"));
//! ```

use std::fmt;
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Translation errors (1xxx)
    /// A query construct could not be translated (P1001).
    TranslationFailed = 1001,
    /// Include of a navigation that is not embedded (P1002).
    UnsupportedInclude = 1002,
    /// A projection binding did not resolve to a projection entry (P1003).
    UnresolvedProjectionBinding = 1003,
    /// A query parameter had no value at execution time (P1004).
    MissingParameter = 1004,

    // Vector search errors (2xxx)
    /// No vector index covers the searched property (P2001).
    MissingVectorIndex = 2001,
    /// Several vector indexes cover the searched property (P2002).
    AmbiguousVectorIndex = 2002,
    /// Mutually exclusive vector search options (P2003).
    ConflictingVectorOptions = 2003,

    // Connection errors (3xxx)
    /// Database connection failed (P3001).
    ConnectionFailed = 3001,

    // Cardinality errors (4xxx)
    /// The sequence contained no elements (P4001).
    NoElements = 4001,
    /// The sequence contained more than one element (P4002).
    MoreThanOneElement = 4002,

    // Execution errors (5xxx)
    /// Query timeout (P5001).
    QueryTimeout = 5001,
    /// General database error (P5002).
    DatabaseError = 5002,
    /// A query session was used by two executions at once (P5003).
    ConcurrentSessionUse = 5003,

    // Data errors (6xxx)
    /// Invalid data type (P6001).
    InvalidDataType = 6001,
    /// Serialization error (P6002).
    SerializationError = 6002,
    /// Deserialization error (P6003).
    DeserializationError = 6003,

    // Configuration errors (7xxx)
    /// Invalid configuration (P7001).
    InvalidConfiguration = 7001,

    // Internal errors (9xxx)
    /// Internal error (P9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "P1001").
    pub fn code(&self) -> String {
        format!("P{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::TranslationFailed => "Query could not be translated",
            Self::UnsupportedInclude => "Include not supported",
            Self::UnresolvedProjectionBinding => "Unresolved projection binding",
            Self::MissingParameter => "Missing parameter value",
            Self::MissingVectorIndex => "No vector index found",
            Self::AmbiguousVectorIndex => "Ambiguous vector index",
            Self::ConflictingVectorOptions => "Conflicting vector search options",
            Self::ConnectionFailed => "Database connection failed",
            Self::NoElements => "Sequence contains no elements",
            Self::MoreThanOneElement => "Sequence contains more than one element",
            Self::QueryTimeout => "Query timeout",
            Self::DatabaseError => "Database error",
            Self::ConcurrentSessionUse => "Concurrent session use",
            Self::InvalidDataType => "Invalid data type",
            Self::SerializationError => "Serialization error",
            Self::DeserializationError => "Deserialization error",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::Internal => "Internal error",
        }
    }

    /// Get the documentation URL for this error.
    pub fn docs_url(&self) -> String {
        format!("https://prax.rs/docs/errors/{}", self.code())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Suggestion for fixing an error.
#[derive(Debug, Clone)]
pub struct Suggestion {
    /// The suggestion text.
    pub text: String,
}

impl Suggestion {
    /// Create a new suggestion.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The entity type involved.
    pub entity: Option<String>,
    /// The property or navigation involved.
    pub field: Option<String>,
    /// The native pipeline (if available).
    pub pipeline: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<Suggestion>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors that can occur while translating, compiling or executing a query.
#[derive(Error, Debug)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(Suggestion::new(suggestion));
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the entity type.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.context.entity = Some(entity.into());
        self
    }

    /// Set the field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Attach the native pipeline that was being built or run.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.context.pipeline = Some(pipeline.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// Create an error for a construct that could not be translated.
    pub fn translation_failed(construct: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::TranslationFailed,
            format!("The query construct `{}` could not be translated", construct),
        )
        .with_suggestion("Rewrite the query using supported operators")
        .with_help(
            "Switch to client evaluation explicitly by materializing the results before \
             applying the construct",
        )
    }

    /// Create an error for a construct that could not be translated, with a reason.
    pub fn translation_failed_because(
        construct: impl fmt::Display,
        reason: impl fmt::Display,
    ) -> Self {
        Self::new(
            ErrorCode::TranslationFailed,
            format!(
                "The query construct `{}` could not be translated: {}",
                construct, reason
            ),
        )
    }

    /// Create an error for an include of a non-embedded navigation.
    pub fn unsupported_include(entity: impl Into<String>, navigation: impl Into<String>) -> Self {
        let entity = entity.into();
        let navigation = navigation.into();
        Self::new(
            ErrorCode::UnsupportedInclude,
            format!(
                "Including navigation `{}.{}` is not supported because the related data is \
                 not embedded in the same document",
                entity, navigation
            ),
        )
        .with_entity(&entity)
        .with_field(&navigation)
        .with_suggestion("Query the related collection separately")
    }

    /// Create an error for a projection binding without a projection entry.
    pub fn unresolved_binding(binding: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnresolvedProjectionBinding,
            format!("Projection binding {} does not match any projection entry", binding),
        )
        .with_help("This is likely a bug in Prax - please report it")
    }

    /// Create an error for a parameter without a value.
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::MissingParameter,
            format!("No value was supplied for query parameter `{}`", name),
        )
        .with_field(&name)
        .with_help("This is likely a bug in Prax - please report it")
    }

    /// Create an error for a vector search without a matching index.
    pub fn missing_vector_index(entity: impl Into<String>, path: impl Into<String>) -> Self {
        let entity = entity.into();
        let path = path.into();
        Self::new(
            ErrorCode::MissingVectorIndex,
            format!(
                "A vector query for `{}.{}` could not be executed because no vector index \
                 was defined for this property",
                entity, path
            ),
        )
        .with_entity(&entity)
        .with_field(&path)
        .with_suggestion("Declare a vector index for the property in the model")
    }

    /// Create an error for a vector search matching several indexes.
    pub fn ambiguous_vector_index(
        entity: impl Into<String>,
        path: impl Into<String>,
        indexes: &[impl AsRef<str>],
    ) -> Self {
        let entity = entity.into();
        let path = path.into();
        let names: Vec<&str> = indexes.iter().map(AsRef::as_ref).collect();
        Self::new(
            ErrorCode::AmbiguousVectorIndex,
            format!(
                "A vector query for `{}.{}` matches several vector indexes ({}); specify the \
                 index name in the vector query options",
                entity,
                path,
                names.join(", ")
            ),
        )
        .with_entity(&entity)
        .with_field(&path)
    }

    /// Create an error for `exact` combined with a candidate count.
    pub fn conflicting_vector_options() -> Self {
        Self::new(
            ErrorCode::ConflictingVectorOptions,
            "Vector query options cannot request an exact search and a number of candidates \
             at the same time",
        )
        .with_suggestion("Remove NumberOfCandidates for exact (ENN) searches")
    }

    /// Create an error for an empty sequence.
    pub fn no_elements() -> Self {
        Self::new(ErrorCode::NoElements, "Sequence contains no elements")
            .with_suggestion("Use the OrDefault variant of the operator to get a default value")
    }

    /// Create an error for a sequence with more than one element.
    pub fn more_than_one_element() -> Self {
        Self::new(
            ErrorCode::MoreThanOneElement,
            "Sequence contains more than one element",
        )
        .with_suggestion("Use First instead of Single if several results are expected")
    }

    /// Create an error for concurrent use of one query session.
    pub fn concurrent_session_use() -> Self {
        Self::new(
            ErrorCode::ConcurrentSessionUse,
            "A second operation was started on this session before a previous operation \
             completed",
        )
        .with_suggestion("Use a separate session per concurrent operation")
    }

    /// Create an invalid data type error.
    pub fn invalid_data_type(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDataType, message.into())
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorCode::DeserializationError,
            format!("Failed to deserialize result: {}", message),
        )
        .with_suggestion("Check that the model matches the stored documents")
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorCode::ConnectionFailed,
            format!("Connection error: {}", message),
        )
        .with_suggestion("Check that the database server is running")
        .with_suggestion("Verify the connection URL is correct")
    }

    /// Create an error for a query the server stopped after its time limit.
    pub fn timeout(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::QueryTimeout, format!("Query timed out: {}", message))
            .with_suggestion("Add indexes to improve query performance")
    }

    /// Create a general database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message.into())
            .with_suggestion("Check the database logs for more details")
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::Internal, format!("Internal error: {}", message))
            .with_help("This is likely a bug in Prax - please report it")
    }

    // ============== Error Checks ==============

    /// Check if the error was raised while translating the query.
    pub fn is_translation_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::TranslationFailed
                | ErrorCode::UnsupportedInclude
                | ErrorCode::UnresolvedProjectionBinding
                | ErrorCode::MissingParameter
                | ErrorCode::MissingVectorIndex
                | ErrorCode::AmbiguousVectorIndex
                | ErrorCode::ConflictingVectorOptions
        )
    }

    // ============== Display Functions ==============

    /// Display the full error with all context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("Error [{}]: {}\n", self.code.code(), self.message));

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  → While: {}\n", op));
        }
        if let Some(ref entity) = self.context.entity {
            output.push_str(&format!("  → Entity: {}\n", entity));
        }
        if let Some(ref field) = self.context.field {
            output.push_str(&format!("  → Field: {}\n", field));
        }

        if let Some(ref pipeline) = self.context.pipeline {
            let display = if pipeline.len() > 200 {
                let cut = (0..=200)
                    .rev()
                    .find(|i| pipeline.is_char_boundary(*i))
                    .unwrap_or(0);
                format!("{}...", &pipeline[..cut])
            } else {
                pipeline.clone()
            };
            output.push_str(&format!("  → Pipeline: {}\n", display));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion.text));
            }
        }

        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\nHelp: {}\n", help));
        }

        output.push_str(&format!("\nMore info: {}\n", self.code.docs_url()));

        output
    }
}

/// Helper for creating errors with context.
#[macro_export]
macro_rules! query_error {
    ($code:expr, $msg:expr) => {
        $crate::error::QueryError::new($code, $msg)
    };
    ($code:expr, $msg:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        let mut err = $crate::error::QueryError::new($code, $msg);
        $(
            err = err.$key($value);
        )+
        err
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::TranslationFailed.code(), "P1001");
        assert_eq!(ErrorCode::AmbiguousVectorIndex.code(), "P2002");
        assert_eq!(ErrorCode::NoElements.code(), "P4001");
    }

    #[test]
    fn test_unsupported_include_names_navigation() {
        let err = QueryError::unsupported_include("Blog", "Author");
        assert!(err.message.contains("Blog.Author"));
        assert_eq!(err.context.field, Some("Author".to_string()));
        assert!(err.is_translation_error());
    }

    #[test]
    fn test_ambiguous_index_lists_candidates() {
        let err = QueryError::ambiguous_vector_index("Movie", "Embedding", &["a", "b"]);
        assert!(err.message.contains("(a, b)"));
    }

    #[test]
    fn test_display_full() {
        let err = QueryError::missing_vector_index("Movie", "Plot.Embedding")
            .with_context("Translating vector search");

        let output = err.display_full();
        assert!(output.contains("P2001"));
        assert!(output.contains("Movie"));
        assert!(output.contains("While: Translating vector search"));
        assert!(output.contains("Suggestions"));
    }

    #[test]
    fn test_display_full_truncates_pipeline() {
        let pipeline = format!("[{}]", "{\"$match\":{}},".repeat(40));
        let err = QueryError::timeout("operation exceeded time limit")
            .with_context("Running pipeline on `movies`")
            .with_pipeline(pipeline);

        let output = err.display_full();
        assert!(output.contains("P5001"));
        assert!(output.contains("Query timed out: operation exceeded time limit"));
        assert!(output.contains("While: Running pipeline on `movies`"));
        let line = output.lines().find(|l| l.contains("Pipeline:")).unwrap();
        assert!(line.ends_with("..."));
        assert!(output.contains("More info: https://prax.rs/docs/errors/P5001"));
    }

    #[test]
    fn test_error_macro() {
        let err = query_error!(
            ErrorCode::InvalidDataType,
            "Expected Int32",
            with_field = "Year",
            with_suggestion = "Check the stored value"
        );

        assert_eq!(err.code, ErrorCode::InvalidDataType);
        assert_eq!(err.context.field, Some("Year".to_string()));
    }
}
