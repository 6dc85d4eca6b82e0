//! Sources of result documents.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::Document;
use parking_lot::{Mutex, RwLock};
use prax_query::QueryResult;
use smol_str::SmolStr;
use tracing::trace;

/// Runs aggregation pipelines.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Run `pipeline` against `collection` and return every result document.
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> QueryResult<Vec<Document>>;
}

/// A pipeline received by an [`InMemoryDocumentSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPipeline {
    /// Target collection.
    pub collection: SmolStr,
    /// Stages as sent.
    pub pipeline: Vec<Document>,
}

/// Returns canned documents per collection and records every pipeline.
///
/// Pipelines are not evaluated; the documents registered for a collection
/// are returned as they are.
#[derive(Debug, Default)]
pub struct InMemoryDocumentSource {
    results: RwLock<HashMap<SmolStr, Vec<Document>>>,
    received: Mutex<Vec<RecordedPipeline>>,
}

impl InMemoryDocumentSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the documents returned for a collection.
    pub fn with_results(self, collection: impl Into<SmolStr>, documents: Vec<Document>) -> Self {
        self.set_results(collection, documents);
        self
    }

    /// Replace the documents returned for a collection.
    pub fn set_results(&self, collection: impl Into<SmolStr>, documents: Vec<Document>) {
        self.results.write().insert(collection.into(), documents);
    }

    /// Pipelines received so far.
    pub fn received(&self) -> Vec<RecordedPipeline> {
        self.received.lock().clone()
    }

    /// The most recent pipeline.
    pub fn last_pipeline(&self) -> Option<RecordedPipeline> {
        self.received.lock().last().cloned()
    }
}

#[async_trait]
impl DocumentSource for InMemoryDocumentSource {
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> QueryResult<Vec<Document>> {
        trace!(collection, stages = pipeline.len(), "In-memory aggregate");
        self.received.lock().push(RecordedPipeline {
            collection: SmolStr::new(collection),
            pipeline,
        });
        Ok(self
            .results
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_canned_results() {
        let source = InMemoryDocumentSource::new()
            .with_results("movies", vec![doc! { "_id": 1 }, doc! { "_id": 2 }]);

        let docs = tokio_test::block_on(source.aggregate("movies", vec![doc! { "$limit": 1_i64 }]))
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert!(
            tokio_test::block_on(source.aggregate("people", vec![]))
                .unwrap()
                .is_empty()
        );

        let received = source.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].pipeline, vec![doc! { "$limit": 1_i64 }]);
        assert_eq!(source.last_pipeline().unwrap().collection, "people");
    }
}
