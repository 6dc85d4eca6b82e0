//! MongoDB client wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::{Client, Collection, Database};
use prax_query::QueryResult;
use tracing::{debug, info};

use crate::config::{MongoConfig, MongoConfigBuilder};
use crate::error::{MongoError, MongoResult};
use crate::source::DocumentSource;

/// A MongoDB client bound to one database.
///
/// The driver pools connections internally; clones share the pool.
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    database: Database,
    config: Arc<MongoConfig>,
}

impl MongoClient {
    /// Create a client from configuration.
    pub async fn new(config: MongoConfig) -> MongoResult<Self> {
        config.validate()?;
        let options = config.to_client_options().await?;

        let client = Client::with_options(options)
            .map_err(|e| MongoError::connection(format!("failed to create client: {}", e)))?;
        let database = client.database(&config.database);

        info!(
            uri = %config.uri,
            database = %config.database,
            "MongoDB client created"
        );

        Ok(Self {
            client,
            database,
            config: Arc::new(config),
        })
    }

    /// Create a builder for the client.
    pub fn builder() -> MongoClientBuilder {
        MongoClientBuilder::new()
    }

    /// Get a collection of raw documents.
    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    /// Get the underlying database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get the underlying driver client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the configuration.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Check if the client is healthy by pinging the server.
    pub async fn is_healthy(&self) -> bool {
        self.database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .is_ok()
    }

    /// List all collection names in the database.
    pub async fn list_collections(&self) -> MongoResult<Vec<String>> {
        Ok(self.database.list_collection_names(None).await?)
    }

    /// Run a pipeline and collect the result documents.
    pub async fn run_pipeline(&self, collection: &str, pipeline: Vec<Document>) -> MongoResult<Vec<Document>> {
        debug!(collection, stages = pipeline.len(), "Running aggregate");
        let cursor = self.collection(collection).aggregate(pipeline, None).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        debug!(collection, documents = documents.len(), "Aggregate finished");
        Ok(documents)
    }
}

#[async_trait]
impl DocumentSource for MongoClient {
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> QueryResult<Vec<Document>> {
        Ok(self.run_pipeline(collection, pipeline).await?)
    }
}

/// Builder for [`MongoClient`].
#[derive(Debug, Default)]
pub struct MongoClientBuilder {
    config: MongoConfigBuilder,
}

impl MongoClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MongoDB URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config = self.config.uri(uri);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config = self.config.database(database);
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.app_name(name);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.config = self.config.max_pool_size(size);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, duration: std::time::Duration) -> Self {
        self.config = self.config.connect_timeout(duration);
        self
    }

    /// Enable direct connection (bypass replica set discovery).
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.config = self.config.direct_connection(enabled);
        self
    }

    /// Build the client.
    pub async fn build(self) -> MongoResult<MongoClient> {
        MongoClient::new(self.config.build()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_requires_database() {
        let result = MongoClientBuilder::new()
            .uri("mongodb://localhost:27017")
            .max_pool_size(20)
            .build()
            .await;
        assert!(matches!(result, Err(e) if e.is_config_error()));
    }

    #[tokio::test]
    async fn test_invalid_scheme_rejected_before_connecting() {
        let result = MongoClient::new(MongoConfig::from_uri("postgres://localhost", "cinema")).await;
        assert!(matches!(result, Err(e) if e.is_config_error()));
    }
}
