//! Entity type definitions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::index::VectorIndex;
use crate::types::ScalarKind;

/// Element name of the document identifier.
pub const ID_ELEMENT: &str = "_id";

/// Name given to the synthesized ordinal key of owned collection elements.
pub const ORDINAL_KEY: &str = "__synthesizedOrdinal";

/// How a property is stored in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyStorage {
    /// Stored under the given element name.
    Element(SmolStr),
    /// Not stored; the position of the element in its owning array.
    Ordinal,
    /// Not stored; resolved from the owner's key through the ownership mapping.
    OwnerKey,
}

/// A mapped scalar property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Property name as seen by queries.
    pub name: SmolStr,
    /// Declared type.
    pub kind: ScalarKind,
    /// Whether the property accepts null.
    pub nullable: bool,
    /// Storage strategy.
    pub storage: PropertyStorage,
}

impl Property {
    /// Create a stored property whose element name equals its name.
    pub fn new(name: impl Into<SmolStr>, kind: ScalarKind) -> Self {
        let name = name.into();
        Self {
            storage: PropertyStorage::Element(name.clone()),
            name,
            kind,
            nullable: false,
        }
    }

    /// Mark the property nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Override the stored element name.
    pub fn element_name(mut self, element: impl Into<SmolStr>) -> Self {
        self.storage = PropertyStorage::Element(element.into());
        self
    }

    /// Stored element name, if the property is stored.
    pub fn element(&self) -> Option<&SmolStr> {
        match &self.storage {
            PropertyStorage::Element(name) => Some(name),
            _ => None,
        }
    }

    /// Check whether the property has a stored element.
    pub fn is_stored(&self) -> bool {
        matches!(self.storage, PropertyStorage::Element(_))
    }
}

/// Cardinality of a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationKind {
    /// Single related object.
    Reference,
    /// Sequence of related objects.
    Collection,
}

/// A navigation from one entity type to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    /// Navigation name.
    pub name: SmolStr,
    /// Target entity type.
    pub target: SmolStr,
    /// Element that contains the embedded object or array.
    pub element_name: SmolStr,
    /// Reference or collection.
    pub kind: NavigationKind,
    /// Whether the target lives inside this document.
    pub embedded: bool,
    /// Navigation on the target that points back here.
    pub inverse: Option<SmolStr>,
}

impl Navigation {
    /// Check if the navigation is a collection.
    pub fn is_collection(&self) -> bool {
        self.kind == NavigationKind::Collection
    }
}

/// Pairs a key property of an owned type with the owner property it mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    /// Property on the owned (dependent) type.
    pub dependent: SmolStr,
    /// Property on the owner (principal) type.
    pub principal: SmolStr,
}

/// Ownership of an embedded entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    /// Owning entity type.
    pub owner: SmolStr,
    /// Navigation on the owner that holds this type.
    pub navigation: SmolStr,
    /// Key mapping from owned key properties to owner key properties.
    pub key_mapping: Vec<KeyMapping>,
}

impl Ownership {
    /// Principal property mirrored by the given dependent property.
    pub fn principal_for(&self, dependent: &str) -> Option<&SmolStr> {
        self.key_mapping
            .iter()
            .find(|m| m.dependent == dependent)
            .map(|m| &m.principal)
    }
}

/// Discriminator used to tell derived types apart within one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discriminator {
    /// Element holding the discriminator.
    pub element_name: SmolStr,
    /// Value identifying this type.
    pub value: SmolStr,
}

/// A mapped entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    /// Entity type name.
    pub name: SmolStr,
    /// Collection name; `None` for owned types and derived types.
    pub collection: Option<SmolStr>,
    /// Base type for derived types.
    pub base_type: Option<SmolStr>,
    /// Discriminator for hierarchies.
    pub discriminator: Option<Discriminator>,
    /// Declared properties.
    pub properties: IndexMap<SmolStr, Property>,
    /// Declared navigations.
    pub navigations: IndexMap<SmolStr, Navigation>,
    /// Primary key property names.
    pub primary_key: Vec<SmolStr>,
    /// Ownership, for embedded types.
    pub ownership: Option<Ownership>,
    /// Vector indexes declared on this type's documents.
    pub vector_indexes: Vec<VectorIndex>,
}

impl EntityType {
    /// Create a new entity type.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            base_type: None,
            discriminator: None,
            properties: IndexMap::new(),
            navigations: IndexMap::new(),
            primary_key: vec![],
            ownership: None,
            vector_indexes: vec![],
        }
    }

    /// Get the entity type name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Check if this type is embedded in an owner.
    pub fn is_owned(&self) -> bool {
        self.ownership.is_some()
    }

    /// Get a declared property.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Get a declared navigation.
    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations.get(name)
    }

    /// Check if a property is part of the primary key.
    pub fn is_key(&self, property: &str) -> bool {
        self.primary_key.iter().any(|k| k == property)
    }

    /// Check if the primary key has more than one property.
    pub fn has_composite_key(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// Document path of a stored property relative to this type's document.
    ///
    /// Composite key members of a root type are nested under `_id`.
    pub fn element_path(&self, property: &Property) -> Option<Vec<SmolStr>> {
        let element = property.element()?.clone();
        if !self.is_owned() && self.has_composite_key() && self.is_key(&property.name) {
            Some(vec![SmolStr::new(ID_ELEMENT), element])
        } else {
            Some(vec![element])
        }
    }
}
