//! Provider and connection configuration.
//!
//! Settings come from code through [`MongoConfig::builder`] or from a TOML
//! file with a `[provider]` and a `[mongodb]` table:
//!
//! ```toml
//! [provider]
//! thread_safety_checks = true
//! sensitive_data_logging = false
//! query_cache_capacity = 500
//!
//! [mongodb]
//! uri = "${MONGODB_URI:-mongodb://localhost:27017}"
//! database = "cinema"
//! connect_timeout = 5
//! read_preference = "secondary_preferred"
//! ```
//!
//! `${NAME}` is replaced by the environment variable `NAME` before parsing;
//! `${NAME:-fallback}` uses `fallback` when it is unset. Timeouts are in
//! seconds.

use std::path::Path;
use std::time::Duration;

use mongodb::options::{ClientOptions, SelectionCriteria};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MongoError, MongoResult};

const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Minimum connection pool size.
    pub min_pool_size: Option<u32>,
    /// Maximum connection pool size.
    pub max_pool_size: Option<u32>,
    /// Maximum idle time for connections.
    #[serde(with = "duration_secs")]
    pub max_idle_time: Option<Duration>,
    /// Connection timeout.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    #[serde(with = "duration_secs")]
    pub server_selection_timeout: Option<Duration>,
    /// Read preference.
    pub read_preference: Option<ReadPreference>,
    /// Retry reads.
    pub retry_reads: Option<bool>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
}

/// MongoDB read preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreference {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadPreference {
    fn to_driver(self) -> mongodb::options::ReadPreference {
        use mongodb::options::ReadPreference as Driver;
        match self {
            Self::Primary => Driver::Primary,
            Self::PrimaryPreferred => Driver::PrimaryPreferred {
                options: Default::default(),
            },
            Self::Secondary => Driver::Secondary {
                options: Default::default(),
            },
            Self::SecondaryPreferred => Driver::SecondaryPreferred {
                options: Default::default(),
            },
            Self::Nearest => Driver::Nearest {
                options: Default::default(),
            },
        }
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            database: String::new(),
            app_name: Some("prax".to_string()),
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            read_preference: Some(ReadPreference::Primary),
            retry_reads: Some(true),
            direct_connection: None,
        }
    }
}

impl MongoConfig {
    /// Create a configuration from a MongoDB URI.
    pub fn from_uri(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> MongoConfigBuilder {
        MongoConfigBuilder::new()
    }

    /// Check required settings.
    pub fn validate(&self) -> MongoResult<()> {
        if self.database.is_empty() {
            return Err(MongoError::config("database name is required"));
        }
        if !self.uri.starts_with("mongodb://") && !self.uri.starts_with("mongodb+srv://") {
            return Err(MongoError::config(format!(
                "unsupported connection URI scheme: {}",
                self.uri
            )));
        }
        if let (Some(min), Some(max)) = (self.min_pool_size, self.max_pool_size) {
            if min > max {
                return Err(MongoError::config(format!(
                    "min_pool_size ({}) exceeds max_pool_size ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Convert to driver client options.
    pub async fn to_client_options(&self) -> MongoResult<ClientOptions> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| MongoError::config(format!("failed to parse URI: {}", e)))?;

        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if self.min_pool_size.is_some() {
            options.min_pool_size = self.min_pool_size;
        }
        if self.max_pool_size.is_some() {
            options.max_pool_size = self.max_pool_size;
        }
        if self.max_idle_time.is_some() {
            options.max_idle_time = self.max_idle_time;
        }
        if self.connect_timeout.is_some() {
            options.connect_timeout = self.connect_timeout;
        }
        if self.server_selection_timeout.is_some() {
            options.server_selection_timeout = self.server_selection_timeout;
        }
        if let Some(pref) = self.read_preference {
            options.selection_criteria = Some(SelectionCriteria::ReadPreference(pref.to_driver()));
        }
        if self.retry_reads.is_some() {
            options.retry_reads = self.retry_reads;
        }
        if self.direct_connection.is_some() {
            options.direct_connection = self.direct_connection;
        }

        Ok(options)
    }
}

/// Builder for [`MongoConfig`].
#[derive(Debug, Default)]
pub struct MongoConfigBuilder {
    config: MongoConfig,
    database_set: bool,
}

impl MongoConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MongoDB URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config.uri = uri.into();
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self.database_set = true;
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = Some(name.into());
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.config.min_pool_size = Some(size);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.config.max_pool_size = Some(size);
        self
    }

    /// Set the maximum idle time for connections.
    pub fn max_idle_time(mut self, duration: Duration) -> Self {
        self.config.max_idle_time = Some(duration);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, duration: Duration) -> Self {
        self.config.server_selection_timeout = Some(duration);
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.config.read_preference = Some(pref);
        self
    }

    /// Enable or disable retry reads.
    pub fn retry_reads(mut self, enabled: bool) -> Self {
        self.config.retry_reads = Some(enabled);
        self
    }

    /// Enable direct connection (bypass replica set discovery).
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.config.direct_connection = Some(enabled);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> MongoResult<MongoConfig> {
        if !self.database_set {
            return Err(MongoError::config("database name is required"));
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Query provider behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOptions {
    /// Fail overlapping executions on one session instead of racing.
    pub thread_safety_checks: bool,
    /// Include parameter values in query logs.
    pub sensitive_data_logging: bool,
    /// Maximum number of compiled queries kept; 0 disables the cache.
    pub query_cache_capacity: usize,
    /// Log every pipeline before it is executed.
    pub log_queries: bool,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            thread_safety_checks: true,
            sensitive_data_logging: false,
            query_cache_capacity: 1000,
            log_queries: true,
        }
    }
}

impl ProviderOptions {
    /// Set whether concurrent session use is detected.
    pub fn with_thread_safety_checks(mut self, enabled: bool) -> Self {
        self.thread_safety_checks = enabled;
        self
    }

    /// Set whether parameter values may be logged.
    pub fn with_sensitive_data_logging(mut self, enabled: bool) -> Self {
        self.sensitive_data_logging = enabled;
        self
    }

    /// Set the compiled query cache capacity.
    pub fn with_query_cache_capacity(mut self, capacity: usize) -> Self {
        self.query_cache_capacity = capacity;
        self
    }
}

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `[provider]` table.
    pub provider: ProviderOptions,
    /// `[mongodb]` table.
    pub mongodb: MongoConfig,
}

impl ProviderConfig {
    /// Parse TOML, substituting `${NAME}` from the process environment.
    pub fn from_toml_str(input: &str) -> MongoResult<Self> {
        Self::from_toml_str_with(input, |name| std::env::var(name).ok())
    }

    /// Parse TOML, substituting `${NAME}` through `lookup`.
    pub fn from_toml_str_with(
        input: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> MongoResult<Self> {
        let expanded = interpolate(input, lookup)?;
        let config: Self = toml::from_str(&expanded)?;
        config.mongodb.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> MongoResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading provider configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Replace `${NAME}` and `${NAME:-fallback}` placeholders.
fn interpolate(input: &str, lookup: impl Fn(&str) -> Option<String>) -> MongoResult<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| MongoError::config("unterminated ${ in configuration"))?;
        let placeholder = &after[..end];
        let (name, fallback) = match placeholder.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (placeholder, None),
        };
        match (lookup(name), fallback) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(fallback)) => output.push_str(fallback),
            (None, None) => {
                return Err(MongoError::config(format!(
                    "environment variable {} is not set",
                    name
                )));
            }
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

mod duration_secs {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(D::Error::custom(format!("invalid duration: {}", secs))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_builder() {
        let config = MongoConfig::builder()
            .uri("mongodb://localhost:27017")
            .database("cinema")
            .app_name("test-app")
            .max_pool_size(20)
            .build()
            .unwrap();

        assert_eq!(config.database, "cinema");
        assert_eq!(config.app_name, Some("test-app".to_string()));
        assert_eq!(config.max_pool_size, Some(20));
    }

    #[test]
    fn test_config_builder_requires_database() {
        let err = MongoConfig::builder()
            .uri("mongodb://localhost:27017")
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_pool_bounds_validated() {
        let err = MongoConfig::builder()
            .database("cinema")
            .min_pool_size(20)
            .max_pool_size(5)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("min_pool_size"));
    }

    #[test]
    fn test_provider_defaults() {
        let options = ProviderOptions::default();
        assert!(options.thread_safety_checks);
        assert!(!options.sensitive_data_logging);
        assert_eq!(options.query_cache_capacity, 1000);
    }

    #[test]
    fn test_toml_with_environment() {
        let input = r#"
            [provider]
            sensitive_data_logging = true
            query_cache_capacity = 50

            [mongodb]
            uri = "${MONGO_URI}"
            database = "${MONGO_DB:-cinema}"
            connect_timeout = 2.5
            read_preference = "secondary_preferred"
        "#;
        let config = ProviderConfig::from_toml_str_with(input, |name| match name {
            "MONGO_URI" => Some("mongodb://db:27017".to_string()),
            _ => None,
        })
        .unwrap();

        assert!(config.provider.sensitive_data_logging);
        assert!(config.provider.thread_safety_checks);
        assert_eq!(config.provider.query_cache_capacity, 50);
        assert_eq!(config.mongodb.uri, "mongodb://db:27017");
        assert_eq!(config.mongodb.database, "cinema");
        assert_eq!(config.mongodb.connect_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(
            config.mongodb.read_preference,
            Some(ReadPreference::SecondaryPreferred)
        );
        assert_eq!(config.mongodb.max_pool_size, Some(10));
    }

    #[test]
    fn test_missing_environment_variable() {
        let err = ProviderConfig::from_toml_str_with(
            "[mongodb]\nuri = \"${NOPE}\"\ndatabase = \"x\"\n",
            |_| None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("NOPE"));

        let err = interpolate("${OPEN", |_| None).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_invalid_toml() {
        let err = ProviderConfig::from_toml_str_with("[provider\n", |_| None).unwrap_err();
        assert!(err.is_config_error());
    }
}
