//! The finished, read-only mapping model.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::entity::{EntityType, Navigation, Property};
use crate::error::{ModelError, ModelResult};
use crate::index::VectorIndex;

/// A validated mapping model.
///
/// Built once through [`crate::ModelBuilder`] and shared read-only by every
/// query compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    entity_types: IndexMap<SmolStr, EntityType>,
}

impl Model {
    pub(crate) fn from_entity_types(entity_types: IndexMap<SmolStr, EntityType>) -> Self {
        Self { entity_types }
    }

    /// Iterate all entity types in declaration order.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values()
    }

    /// Get an entity type by name.
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    /// Get an entity type by name or fail.
    pub fn find_entity(&self, name: &str) -> ModelResult<&EntityType> {
        self.entity(name)
            .ok_or_else(|| ModelError::unknown_entity(name))
    }

    /// Walk from an entity type up through its base types (self first).
    pub fn hierarchy<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a EntityType> + 'a {
        let mut current = self.entity(name);
        std::iter::from_fn(move || {
            let ty = current?;
            current = ty.base_type.as_deref().and_then(|b| self.entity(b));
            Some(ty)
        })
    }

    /// Root of the inheritance hierarchy of an entity type.
    pub fn hierarchy_root<'a>(&'a self, name: &str) -> Option<&'a EntityType> {
        self.hierarchy(name).last()
    }

    /// Find a property on the type or one of its base types, with its declaring type.
    pub fn find_property(&self, entity: &str, name: &str) -> Option<(&EntityType, &Property)> {
        self.hierarchy(entity)
            .find_map(|ty| ty.property(name).map(|p| (ty, p)))
    }

    /// Find a navigation on the type or one of its base types.
    pub fn find_navigation(&self, entity: &str, name: &str) -> Option<&Navigation> {
        self.hierarchy(entity).find_map(|ty| ty.navigation(name))
    }

    /// All properties of the type, base type properties first.
    pub fn properties(&self, entity: &str) -> Vec<&Property> {
        let mut chain: Vec<&EntityType> = self.hierarchy(entity).collect();
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|ty| ty.properties.values())
            .collect()
    }

    /// All navigations of the type, base type navigations first.
    pub fn navigations(&self, entity: &str) -> Vec<&Navigation> {
        let mut chain: Vec<&EntityType> = self.hierarchy(entity).collect();
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|ty| ty.navigations.values())
            .collect()
    }

    /// Primary key of the type, taken from the hierarchy root.
    pub fn primary_key(&self, entity: &str) -> &[SmolStr] {
        self.hierarchy_root(entity)
            .map(|ty| ty.primary_key.as_slice())
            .unwrap_or(&[])
    }

    /// Collection that stores documents of the type.
    pub fn collection_of(&self, entity: &str) -> Option<&SmolStr> {
        self.hierarchy_root(entity)
            .and_then(|ty| ty.collection.as_ref())
    }

    /// The type and all types deriving from it, transitively.
    pub fn derived_types(&self, entity: &str) -> Vec<&EntityType> {
        let mut result: Vec<&EntityType> = self.entity(entity).into_iter().collect();
        let mut cursor = 0;
        while cursor < result.len() {
            let base = result[cursor].name.clone();
            result.extend(
                self.entity_types
                    .values()
                    .filter(|ty| ty.base_type.as_deref() == Some(base.as_str())),
            );
            cursor += 1;
        }
        result
    }

    /// Owner of an embedded type.
    pub fn owner(&self, entity: &str) -> Option<&EntityType> {
        self.entity(entity)
            .and_then(|ty| ty.ownership.as_ref())
            .and_then(|o| self.entity(&o.owner))
    }

    /// Document path of a property relative to its own type's document.
    pub fn element_path(&self, entity: &str, property: &str) -> Option<Vec<SmolStr>> {
        let (_, prop) = self.find_property(entity, property)?;
        let root = self.hierarchy_root(entity)?;
        root.element_path(prop)
    }

    /// Vector indexes declared on the hierarchy of `entity` covering `property_path`.
    pub fn vector_indexes(&self, entity: &str, property_path: &[SmolStr]) -> Vec<&VectorIndex> {
        self.hierarchy(entity)
            .flat_map(|ty| ty.vector_indexes.iter())
            .filter(|idx| idx.covers(property_path))
            .collect()
    }

    /// Find a declared vector index by name anywhere in the hierarchy.
    pub fn vector_index_named(&self, entity: &str, name: &str) -> Option<&VectorIndex> {
        self.hierarchy(entity)
            .flat_map(|ty| ty.vector_indexes.iter())
            .find(|idx| idx.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::index::Similarity;
    use crate::types::ScalarKind;
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        ModelBuilder::new()
            .entity("Animal", |e| {
                e.collection("animals")
                    .property("Id", ScalarKind::Int32)
                    .property("Name", ScalarKind::String)
                    .key(["Id"])
                    .discriminator("_t", "Animal")
                    .vector_index("AnimalIdx", ["Embedding"], 3, Similarity::Cosine)
                    .property("Embedding", ScalarKind::Vector);
            })
            .entity("Dog", |e| {
                e.derives_from("Animal")
                    .discriminator("_t", "Dog")
                    .property("Breed", ScalarKind::String);
            })
            .entity("Puppy", |e| {
                e.derives_from("Dog").discriminator("_t", "Puppy");
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_hierarchy_lookup() {
        let model = model();
        let names: Vec<&str> = model.hierarchy("Puppy").map(|t| t.name()).collect();
        assert_eq!(names, vec!["Puppy", "Dog", "Animal"]);
        assert_eq!(model.collection_of("Puppy").unwrap(), "animals");
        assert_eq!(model.primary_key("Dog"), &[SmolStr::new("Id")]);
    }

    #[test]
    fn test_properties_base_first() {
        let model = model();
        let names: Vec<&str> = model
            .properties("Dog")
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Id", "Name", "Embedding", "Breed"]);
    }

    #[test]
    fn test_derived_types() {
        let model = model();
        let names: Vec<&str> = model
            .derived_types("Dog")
            .into_iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["Dog", "Puppy"]);
    }

    #[test]
    fn test_single_key_maps_to_id_element() {
        let model = model();
        assert_eq!(
            model.element_path("Dog", "Id").unwrap(),
            vec![SmolStr::new("_id")]
        );
    }

    #[test]
    fn test_vector_indexes_from_base() {
        let model = model();
        let indexes = model.vector_indexes("Dog", &[SmolStr::new("Embedding")]);
        assert_eq!(indexes.len(), 1);
        assert!(model.vector_index_named("Puppy", "AnimalIdx").is_some());
    }
}
