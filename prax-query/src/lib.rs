//! # prax-query
//!
//! Engine-independent front half of the Prax document query pipeline.
//!
//! This crate provides:
//! - The expression IR ([`Expr`]) shared by every pass
//! - Loosely typed runtime [`Value`]s and static [`TypeRef`]s
//! - The query capture pass ([`QueryableMethodCapture`]) that turns an
//!   operator chain into a [`MongoQueryExpression`] plus a result shaper
//! - The projection binding pass ([`ProjectionBindingVisitor`])
//! - Materializer injection ([`inject_materializers`])
//! - Client-side evaluation of closed sub-expressions ([`eval`])
//! - Errors with codes and suggestions, and the logging bootstrap
//!
//! ## Capturing a query
//!
//! ```rust
//! use prax_model::{ModelBuilder, ScalarKind};
//! use prax_query::{Expr, QueryBuilder, QueryableMethodCapture, ResultCardinality};
//!
//! let model = ModelBuilder::new()
//!     .entity("Movie", |e| {
//!         e.collection("movies")
//!             .property("Id", ScalarKind::ObjectId)
//!             .property("Title", ScalarKind::String)
//!             .key(["Id"]);
//!     })
//!     .build()
//!     .unwrap();
//!
//! let query = QueryBuilder::root("Movie")
//!     .select(Expr::lambda("m", Expr::param("m").member("Title")))
//!     .first();
//!
//! let shaped = QueryableMethodCapture::new(&model).translate(&query).unwrap();
//! assert_eq!(shaped.query.cardinality, ResultCardinality::Single);
//! assert_eq!(shaped.query.projection()[0].alias, "_v");
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use prax_query::{QueryError, ErrorCode};
//!
//! let err = QueryError::unsupported_include("Movie", "Studio");
//! assert_eq!(err.code, ErrorCode::UnsupportedInclude);
//! ```

pub mod builder;
pub mod capture;
pub mod error;
pub mod eval;
pub mod expr;
pub mod logging;
pub mod operators;
pub mod parameters;
pub mod projection;
pub mod query_expression;
pub mod shaper;
pub mod types;
pub mod value;
pub mod vector;

pub use builder::QueryBuilder;
pub use capture::{QueryableMethodCapture, ShapedQuery};
pub use error::{ErrorCode, ErrorContext, QueryError, QueryResult, Suggestion};
pub use expr::{BinaryOp, Expr, Method, UnaryOp};
pub use operators::{Overload, QueryOperator, ResultCardinality, classify};
pub use parameters::{ParameterValues, QueryContext};
pub use projection::ProjectionBindingVisitor;
pub use query_expression::{MongoQueryExpression, ProjectionEntry, QueryOperation};
pub use shaper::inject_materializers;
pub use types::TypeRef;
pub use value::{EntityId, Value};
pub use vector::VectorQueryOptions;

// Re-export logging utilities
pub use logging::{get_log_level, init as init_logging, is_debug_enabled};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::builder::QueryBuilder;
    pub use crate::capture::{QueryableMethodCapture, ShapedQuery};
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::expr::Expr;
    pub use crate::operators::{QueryOperator, ResultCardinality};
    pub use crate::parameters::{ParameterValues, QueryContext};
    pub use crate::value::Value;
    pub use crate::vector::VectorQueryOptions;
}
