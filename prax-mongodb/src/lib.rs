//! # prax-mongodb
//!
//! MongoDB back end of the Prax document query provider.
//!
//! This crate provides:
//! - Translation of captured queries into aggregation pipelines
//! - Compilation of result shapers into reusable closures
//! - Materialization of entities, owned navigations and their fix-up
//! - A compiled query cache and an executor over any [`DocumentSource`]
//! - A [`MongoClient`] document source backed by the official driver
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use prax_mongodb::prelude::*;
//! use prax_query::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = Arc::new(build_model()?);
//!     let client = MongoClient::builder()
//!         .uri("mongodb://localhost:27017")
//!         .database("cinema")
//!         .build()
//!         .await?;
//!
//!     let executor = QueryExecutor::new(model, Arc::new(client));
//!     let query = QueryBuilder::root("Movie")
//!         .filter(Expr::lambda("m", Expr::param("m").member("Year").gt(Expr::constant(2000))))
//!         .build();
//!     let output = executor
//!         .execute(&executor.session(), &query, ParameterValues::new())
//!         .await?;
//!     println!("{} movies", output.context.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod filter;
pub mod pipeline;
pub mod shaper;
pub mod source;
pub mod translate;

pub use bson::oid::ObjectId;
pub use bson::{Bson, Document, doc};
pub use cache::{CacheStats, CompiledQuery, QueryCache, QueryKey};
pub use client::{MongoClient, MongoClientBuilder};
pub use codec::Codec;
pub use config::{MongoConfig, MongoConfigBuilder, ProviderConfig, ProviderOptions, ReadPreference};
pub use context::{EntityInstance, MaterializationContext, NavigationValue, QueryOutput};
pub use diagnostics::{QueryLogger, RecordingQueryLogger, TracingQueryLogger};
pub use error::{MongoError, MongoResult};
pub use executor::{ConcurrencyDetector, QueryExecutor, QuerySession};
pub use filter::FilterBuilder;
pub use pipeline::Pipeline;
pub use shaper::{CompiledShaper, ShaperCompiler, ShaperFn};
pub use source::{DocumentSource, InMemoryDocumentSource};
pub use translate::{EfToNativeTranslator, NativeQuery, VectorSearchTarget};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::cache::{CompiledQuery, QueryCache};
    pub use crate::client::{MongoClient, MongoClientBuilder};
    pub use crate::config::{MongoConfig, ProviderConfig, ProviderOptions};
    pub use crate::context::{MaterializationContext, QueryOutput};
    pub use crate::diagnostics::{QueryLogger, TracingQueryLogger};
    pub use crate::error::{MongoError, MongoResult};
    pub use crate::executor::{QueryExecutor, QuerySession};
    pub use crate::shaper::{CompiledShaper, ShaperCompiler};
    pub use crate::source::{DocumentSource, InMemoryDocumentSource};
    pub use crate::translate::{EfToNativeTranslator, NativeQuery};
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, Document, doc};
}
