//! # prax-model
//!
//! Mapped entity model for the Prax document-database provider.
//!
//! This crate provides:
//! - Entity types with properties, navigations and primary keys
//! - Owned (embedded) types with owner-key mappings and synthesized ordinals
//! - Inheritance hierarchies sharing one collection through a discriminator
//! - Vector index declarations for similarity search
//!
//! ## Example
//!
//! ```rust
//! use prax_model::{ModelBuilder, ScalarKind, Similarity};
//!
//! let model = ModelBuilder::new()
//!     .entity("Movie", |e| {
//!         e.collection("movies")
//!             .property("Id", ScalarKind::ObjectId)
//!             .property("Title", ScalarKind::String)
//!             .property("Embedding", ScalarKind::Vector)
//!             .key(["Id"])
//!             .default_vector_index(["Embedding"], 1536, Similarity::Cosine);
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(model.collection_of("Movie").unwrap(), "movies");
//! ```

pub mod builder;
pub mod entity;
pub mod error;
pub mod index;
pub mod model;
pub mod types;
mod validator;

pub use builder::{EntityTypeBuilder, ModelBuilder};
pub use entity::{
    Discriminator, EntityType, ID_ELEMENT, KeyMapping, Navigation, NavigationKind, ORDINAL_KEY,
    Ownership, Property, PropertyStorage,
};
pub use error::{ModelError, ModelResult};
pub use index::{Similarity, VectorIndex};
pub use model::Model;
pub use types::ScalarKind;
