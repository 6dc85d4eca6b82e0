//! # Prax DocDB
//!
//! A LINQ-style query provider for MongoDB.
//!
//! Prax DocDB provides:
//! - A mapped entity model with owned types, inheritance and vector indexes
//! - Capture of operator chains into a provider query expression
//! - Translation of captured queries into aggregation pipelines
//! - Compiled result shapers that materialize entities and owned navigations
//! - A compiled query cache and an async executor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use prax_docdb::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = ModelBuilder::new()
//!         .entity("Movie", |e| {
//!             e.collection("movies")
//!                 .property("Id", ScalarKind::ObjectId)
//!                 .property("Title", ScalarKind::String)
//!                 .key(["Id"]);
//!         })
//!         .build()?;
//!
//!     let client = MongoClient::builder()
//!         .uri("mongodb://localhost:27017")
//!         .database("cinema")
//!         .build()
//!         .await?;
//!
//!     let executor = QueryExecutor::new(Arc::new(model), Arc::new(client));
//!     let query = QueryBuilder::root("Movie")
//!         .select(Expr::lambda("m", Expr::param("m").member("Title")))
//!         .build();
//!
//!     let output = executor
//!         .execute(&executor.session(), &query, ParameterValues::new())
//!         .await?;
//!     println!("{}", output.result);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Mapped entity model.
pub mod model {
    pub use prax_model::*;
}

/// Expression IR, capture and projection binding.
pub mod query {
    pub use prax_query::*;
}

/// MongoDB translation, shaping and execution.
pub mod mongodb {
    pub use prax_mongodb::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use prax_model::{Model, ModelBuilder, ScalarKind, Similarity};
    pub use prax_mongodb::prelude::*;
    pub use prax_query::prelude::*;
}

// Re-export key types at the crate root
pub use prax_model::{Model, ModelBuilder, ModelError};
pub use prax_mongodb::{MongoError, QueryExecutor};
pub use prax_query::{Expr, QueryBuilder, QueryError};
