//! Vector index declarations.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Similarity function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Similarity {
    /// Cosine similarity.
    Cosine,
    /// Euclidean distance.
    Euclidean,
    /// Dot product.
    DotProduct,
}

impl Similarity {
    /// Name used in index definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::DotProduct => "dotProduct",
        }
    }
}

/// A vector search index over one vector property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    /// Index name.
    pub name: SmolStr,
    /// Property path from the indexed document root, in property names.
    pub property_path: Vec<SmolStr>,
    /// Number of dimensions.
    pub dimensions: u32,
    /// Similarity function.
    pub similarity: Similarity,
}

impl VectorIndex {
    /// Create a vector index for a property path.
    pub fn new(
        name: impl Into<SmolStr>,
        property_path: impl IntoIterator<Item = impl Into<SmolStr>>,
        dimensions: u32,
        similarity: Similarity,
    ) -> Self {
        Self {
            name: name.into(),
            property_path: property_path.into_iter().map(Into::into).collect(),
            dimensions,
            similarity,
        }
    }

    /// Default index name for a property path.
    pub fn default_name(property_path: &[SmolStr]) -> SmolStr {
        let joined: Vec<&str> = property_path.iter().map(SmolStr::as_str).collect();
        SmolStr::new(format!("{}VectorIndex", joined.join("")))
    }

    /// Check if the index covers the given property path.
    pub fn covers(&self, property_path: &[SmolStr]) -> bool {
        self.property_path == property_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_name() {
        let path = vec![SmolStr::new("Plot"), SmolStr::new("Embedding")];
        assert_eq!(VectorIndex::default_name(&path), "PlotEmbeddingVectorIndex");
    }

    #[test]
    fn test_covers() {
        let index = VectorIndex::new("idx", ["Embedding"], 3, Similarity::Cosine);
        assert!(index.covers(&[SmolStr::new("Embedding")]));
        assert!(!index.covers(&[SmolStr::new("Other")]));
    }
}
