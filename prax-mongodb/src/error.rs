//! Errors raised by the MongoDB back end.

use mongodb::error::ErrorKind;
use prax_query::QueryError;
use thiserror::Error;

/// Result type for MongoDB operations.
pub type MongoResult<T> = Result<T, MongoError>;

/// Errors from the driver, the client and its configuration.
#[derive(Error, Debug)]
pub enum MongoError {
    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The client could not be created.
    #[error("connection error: {0}")]
    Connection(String),
}

impl MongoError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Driver(e) => is_connection_kind(&e.kind),
            _ => false,
        }
    }

    /// Check if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ConfigParse(_))
    }
}

/// Server error code for `MaxTimeMSExpired`.
const MAX_TIME_MS_EXPIRED: i32 = 50;

fn is_timeout_kind(kind: &ErrorKind) -> bool {
    match kind {
        ErrorKind::Command(err) => err.code == MAX_TIME_MS_EXPIRED,
        ErrorKind::Io(err) => err.kind() == std::io::ErrorKind::TimedOut,
        _ => false,
    }
}

fn is_connection_kind(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
    )
}

impl From<MongoError> for QueryError {
    fn from(err: MongoError) -> Self {
        match err {
            MongoError::Driver(e) if is_timeout_kind(&e.kind) => {
                QueryError::timeout(e.to_string()).with_source(e)
            }
            MongoError::Driver(e) if is_connection_kind(&e.kind) => {
                QueryError::connection(e.to_string()).with_source(e)
            }
            MongoError::Driver(e) => QueryError::database(e.to_string()).with_source(e),
            MongoError::Config(msg) => QueryError::invalid_configuration(msg),
            MongoError::ConfigParse(e) => QueryError::invalid_configuration(e.to_string()),
            MongoError::Io(e) => QueryError::invalid_configuration(e.to_string()),
            MongoError::Connection(msg) => QueryError::connection(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use mongodb::error::CommandError;
    use prax_query::ErrorCode;

    #[test]
    fn test_error_kinds() {
        assert!(MongoError::config("invalid URI").is_config_error());
        assert!(MongoError::connection("connection refused").is_connection_error());
        assert!(!MongoError::config("invalid URI").is_connection_error());
    }

    #[test]
    fn test_error_display() {
        let err = MongoError::config("test error");
        assert_eq!(err.to_string(), "configuration error: test error");
    }

    #[test]
    fn test_into_query_error() {
        let query_err: QueryError = MongoError::config("missing database").into();
        assert_eq!(query_err.code, ErrorCode::InvalidConfiguration);

        let query_err: QueryError = MongoError::connection("refused").into();
        assert_eq!(query_err.code, ErrorCode::ConnectionFailed);

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "prax.toml");
        let query_err: QueryError = MongoError::from(io).into();
        assert_eq!(query_err.code, ErrorCode::InvalidConfiguration);
    }

    fn command_error(code: i32, code_name: &str) -> mongodb::error::Error {
        let command: CommandError = bson::from_document(doc! {
            "code": code,
            "codeName": code_name,
            "errmsg": "operation failed",
        })
        .unwrap();
        mongodb::error::Error::from(ErrorKind::Command(command))
    }

    #[test]
    fn test_driver_timeouts_map_to_query_timeout() {
        let expired: QueryError = MongoError::from(command_error(50, "MaxTimeMSExpired")).into();
        assert_eq!(expired.code, ErrorCode::QueryTimeout);
        assert!(std::error::Error::source(&expired).is_some());

        let timed_out = mongodb::error::Error::from(std::io::ErrorKind::TimedOut);
        let query_err: QueryError = MongoError::from(timed_out).into();
        assert_eq!(query_err.code, ErrorCode::QueryTimeout);

        let refused = mongodb::error::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(MongoError::from(refused.clone()).is_connection_error());
        let query_err: QueryError = MongoError::from(refused).into();
        assert_eq!(query_err.code, ErrorCode::ConnectionFailed);

        let other: QueryError = MongoError::from(command_error(2, "BadValue")).into();
        assert_eq!(other.code, ErrorCode::DatabaseError);
    }
}
