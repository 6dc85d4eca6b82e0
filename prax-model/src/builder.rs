//! Fluent construction of mapping models.

use std::collections::HashSet;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::debug;

use crate::entity::{
    Discriminator, EntityType, ID_ELEMENT, KeyMapping, Navigation, NavigationKind, ORDINAL_KEY,
    Ownership, Property, PropertyStorage,
};
use crate::error::ModelResult;
use crate::index::{Similarity, VectorIndex};
use crate::model::Model;
use crate::types::ScalarKind;
use crate::validator::Validator;

/// Builder for a [`Model`].
///
/// # Example
///
/// ```rust
/// use prax_model::{ModelBuilder, ScalarKind};
///
/// let model = ModelBuilder::new()
///     .entity("Customer", |e| {
///         e.collection("customers")
///             .property("Id", ScalarKind::ObjectId)
///             .property("Name", ScalarKind::String)
///             .key(["Id"])
///             .owns_one("Address", "Address", |a| {
///                 a.property("City", ScalarKind::String);
///             });
///     })
///     .build()
///     .unwrap();
///
/// assert!(model.entity("Address").unwrap().is_owned());
/// ```
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<EntityTypeBuilder>,
}

impl ModelBuilder {
    /// Create an empty model builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity type.
    pub fn entity(
        mut self,
        name: impl Into<SmolStr>,
        configure: impl FnOnce(&mut EntityTypeBuilder),
    ) -> Self {
        let mut builder = EntityTypeBuilder::new(name);
        configure(&mut builder);
        self.entities.push(builder);
        self
    }

    /// Build and validate the model.
    pub fn build(self) -> ModelResult<Model> {
        let mut flat = Flattened::default();
        for builder in self.entities {
            builder.flatten(None, &mut flat);
        }

        let mut entity_types: IndexMap<SmolStr, EntityType> = IndexMap::new();
        let mut validator = Validator::new();
        for ty in flat.types {
            if entity_types.contains_key(&ty.name) {
                validator.duplicate("entity type", &ty.name);
                continue;
            }
            entity_types.insert(ty.name.clone(), ty);
        }

        resolve_ownership(&mut entity_types, &flat.derived_keys);
        let model = Model::from_entity_types(entity_types);
        validator.validate(&model)?;

        debug!(
            entity_types = model.entity_types().count(),
            "Mapping model built"
        );
        Ok(model)
    }
}

#[derive(Debug, Clone, Copy)]
struct OwnedVia {
    kind: NavigationKind,
}

/// Entity types in owner-before-owned order.
#[derive(Debug, Default)]
struct Flattened {
    types: Vec<EntityType>,
    /// Owned types whose key is derived from their owner.
    derived_keys: HashSet<SmolStr>,
}

/// Builder for one entity type.
#[derive(Debug)]
pub struct EntityTypeBuilder {
    ty: EntityType,
    explicit_elements: HashSet<SmolStr>,
    explicit_key: bool,
    owner_navigation: Option<SmolStr>,
    owned: Vec<(OwnedVia, EntityTypeBuilder)>,
}

impl EntityTypeBuilder {
    fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            ty: EntityType::new(name),
            explicit_elements: HashSet::new(),
            explicit_key: false,
            owner_navigation: None,
            owned: vec![],
        }
    }

    /// Set the collection that stores this type.
    pub fn collection(&mut self, name: impl Into<SmolStr>) -> &mut Self {
        self.ty.collection = Some(name.into());
        self
    }

    /// Declare a required scalar property stored under its own name.
    pub fn property(&mut self, name: impl Into<SmolStr>, kind: ScalarKind) -> &mut Self {
        let property = Property::new(name, kind);
        self.ty.properties.insert(property.name.clone(), property);
        self
    }

    /// Declare a nullable scalar property stored under its own name.
    pub fn optional(&mut self, name: impl Into<SmolStr>, kind: ScalarKind) -> &mut Self {
        let property = Property::new(name, kind).nullable();
        self.ty.properties.insert(property.name.clone(), property);
        self
    }

    /// Declare a fully configured property. Its element name is kept as given.
    pub fn property_with(&mut self, property: Property) -> &mut Self {
        self.explicit_elements.insert(property.name.clone());
        self.ty.properties.insert(property.name.clone(), property);
        self
    }

    /// Set the primary key.
    pub fn key<I, S>(&mut self, properties: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.ty.primary_key = properties.into_iter().map(Into::into).collect();
        self.explicit_key = true;
        self
    }

    /// Derive from another entity type stored in the same collection.
    pub fn derives_from(&mut self, base: impl Into<SmolStr>) -> &mut Self {
        self.ty.base_type = Some(base.into());
        self
    }

    /// Set the discriminator element and value of this type.
    pub fn discriminator(
        &mut self,
        element_name: impl Into<SmolStr>,
        value: impl Into<SmolStr>,
    ) -> &mut Self {
        self.ty.discriminator = Some(Discriminator {
            element_name: element_name.into(),
            value: value.into(),
        });
        self
    }

    /// Declare a navigation to an entity stored elsewhere.
    pub fn reference(
        &mut self,
        name: impl Into<SmolStr>,
        target: impl Into<SmolStr>,
        kind: NavigationKind,
    ) -> &mut Self {
        let name = name.into();
        self.ty.navigations.insert(
            name.clone(),
            Navigation {
                element_name: name.clone(),
                name,
                target: target.into(),
                kind,
                embedded: false,
                inverse: None,
            },
        );
        self
    }

    /// Declare a navigation on an owned type pointing back to its owner.
    pub fn owner_navigation(&mut self, name: impl Into<SmolStr>) -> &mut Self {
        self.owner_navigation = Some(name.into());
        self
    }

    /// Embed a single owned object.
    pub fn owns_one(
        &mut self,
        navigation: impl Into<SmolStr>,
        target: impl Into<SmolStr>,
        configure: impl FnOnce(&mut EntityTypeBuilder),
    ) -> &mut Self {
        self.owns(navigation.into(), target.into(), NavigationKind::Reference, configure)
    }

    /// Embed an array of owned objects.
    pub fn owns_many(
        &mut self,
        navigation: impl Into<SmolStr>,
        target: impl Into<SmolStr>,
        configure: impl FnOnce(&mut EntityTypeBuilder),
    ) -> &mut Self {
        self.owns(navigation.into(), target.into(), NavigationKind::Collection, configure)
    }

    fn owns(
        &mut self,
        navigation: SmolStr,
        target: SmolStr,
        kind: NavigationKind,
        configure: impl FnOnce(&mut EntityTypeBuilder),
    ) -> &mut Self {
        self.ty.navigations.insert(
            navigation.clone(),
            Navigation {
                name: navigation.clone(),
                target: target.clone(),
                element_name: navigation.clone(),
                kind,
                embedded: true,
                inverse: None,
            },
        );

        let mut child = EntityTypeBuilder::new(target);
        child.ty.ownership = Some(Ownership {
            owner: self.ty.name.clone(),
            navigation,
            key_mapping: vec![],
        });
        configure(&mut child);
        self.owned.push((OwnedVia { kind }, child));
        self
    }

    /// Override the element name of a navigation.
    pub fn navigation_element(
        &mut self,
        navigation: &str,
        element_name: impl Into<SmolStr>,
    ) -> &mut Self {
        if let Some(nav) = self.ty.navigations.get_mut(navigation) {
            nav.element_name = element_name.into();
        }
        self
    }

    /// Declare a vector index over a property path of this type.
    pub fn vector_index<I, S>(
        &mut self,
        name: impl Into<SmolStr>,
        property_path: I,
        dimensions: u32,
        similarity: Similarity,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.ty
            .vector_indexes
            .push(VectorIndex::new(name, property_path, dimensions, similarity));
        self
    }

    /// Declare a vector index using the default index name.
    pub fn default_vector_index<I, S>(
        &mut self,
        property_path: I,
        dimensions: u32,
        similarity: Similarity,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        let path: Vec<SmolStr> = property_path.into_iter().map(Into::into).collect();
        let name = VectorIndex::default_name(&path);
        self.vector_index(name, path, dimensions, similarity)
    }

    fn flatten(mut self, owned: Option<OwnedVia>, out: &mut Flattened) {
        let is_root = self.ty.ownership.is_none() && self.ty.base_type.is_none();

        if is_root && self.ty.primary_key.len() == 1 {
            let key = self.ty.primary_key[0].clone();
            if !self.explicit_elements.contains(&key) {
                if let Some(prop) = self.ty.properties.get_mut(&key) {
                    prop.storage = PropertyStorage::Element(SmolStr::new(ID_ELEMENT));
                }
            }
        }

        if let (Some(owned), false) = (owned, self.explicit_key) {
            // Owner key columns are prepended by `resolve_ownership`.
            self.ty.primary_key.clear();
            if owned.kind == NavigationKind::Collection {
                self.ty.properties.insert(
                    SmolStr::new(ORDINAL_KEY),
                    Property {
                        name: SmolStr::new(ORDINAL_KEY),
                        kind: ScalarKind::Int32,
                        nullable: false,
                        storage: PropertyStorage::Ordinal,
                    },
                );
                self.ty.primary_key.push(SmolStr::new(ORDINAL_KEY));
            }
        }

        if let Some(owner_nav) = self.owner_navigation.take() {
            if let Some(ownership) = &self.ty.ownership {
                self.ty.navigations.insert(
                    owner_nav.clone(),
                    Navigation {
                        element_name: owner_nav.clone(),
                        name: owner_nav,
                        target: ownership.owner.clone(),
                        kind: NavigationKind::Reference,
                        embedded: false,
                        inverse: Some(ownership.navigation.clone()),
                    },
                );
            }
        }

        if owned.is_some() && !self.explicit_key {
            out.derived_keys.insert(self.ty.name.clone());
        }
        out.types.push(self.ty);

        for (child_owned, child) in self.owned {
            child.flatten(Some(child_owned), out);
        }
    }
}

/// Fill owner-key mappings and primary keys of owned types, owners first.
fn resolve_ownership(
    entity_types: &mut IndexMap<SmolStr, EntityType>,
    derived_keys: &HashSet<SmolStr>,
) {
    let names: Vec<SmolStr> = entity_types.keys().cloned().collect();
    for name in names {
        let Some(ownership) = entity_types[&name].ownership.clone() else {
            continue;
        };
        let Some(owner) = entity_types.get(&ownership.owner) else {
            continue;
        };

        let owner_key: Vec<(SmolStr, ScalarKind)> = owner
            .primary_key
            .iter()
            .filter_map(|k| owner.properties.get(k).map(|p| (k.clone(), p.kind)))
            .collect();
        let owner_name = owner.name.clone();

        let Some(owned) = entity_types.get_mut(&name) else {
            continue;
        };
        let mut key_mapping = Vec::with_capacity(owner_key.len());
        for (principal, kind) in owner_key {
            let dependent = SmolStr::new(format!("{}{}", owner_name, principal));
            owned
                .properties
                .entry(dependent.clone())
                .or_insert_with(|| Property {
                    name: dependent.clone(),
                    kind,
                    nullable: false,
                    storage: PropertyStorage::OwnerKey,
                });
            key_mapping.push(KeyMapping {
                dependent,
                principal,
            });
        }

        if derived_keys.contains(&name) {
            let mut key: Vec<SmolStr> = key_mapping.iter().map(|m| m.dependent.clone()).collect();
            key.append(&mut owned.primary_key);
            owned.primary_key = key;
        }
        if let Some(o) = owned.ownership.as_mut() {
            o.key_mapping = key_mapping;
        }

        let inverse = owned
            .navigations
            .values()
            .find(|n| !n.embedded && n.inverse.as_deref() == Some(ownership.navigation.as_str()))
            .map(|n| n.name.clone());
        if let Some(inverse) = inverse {
            if let Some(nav) = entity_types
                .get_mut(&ownership.owner)
                .and_then(|o| o.navigations.get_mut(&ownership.navigation))
            {
                nav.inverse = Some(inverse);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn customers() -> Model {
        ModelBuilder::new()
            .entity("Customer", |e| {
                e.collection("customers")
                    .property("Id", ScalarKind::Int32)
                    .property("Name", ScalarKind::String)
                    .key(["Id"])
                    .owns_one("Address", "Address", |a| {
                        a.property("City", ScalarKind::String)
                            .owner_navigation("Customer")
                            .owns_one("Geo", "Geo", |g| {
                                g.property("Lat", ScalarKind::Double);
                            });
                    })
                    .owns_many("Orders", "Order", |o| {
                        o.property("Total", ScalarKind::Double);
                    });
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_single_key_uses_id_element() {
        let model = customers();
        let id = model.entity("Customer").unwrap().property("Id").unwrap();
        assert_eq!(id.element().unwrap(), "_id");
    }

    #[test]
    fn test_owned_reference_key_maps_to_owner() {
        let model = customers();
        let address = model.entity("Address").unwrap();
        assert_eq!(address.primary_key, vec![SmolStr::new("CustomerId")]);
        let key = address.property("CustomerId").unwrap();
        assert_eq!(key.storage, PropertyStorage::OwnerKey);
        assert_eq!(
            address.ownership.as_ref().unwrap().principal_for("CustomerId").unwrap(),
            "Id"
        );
    }

    #[test]
    fn test_nested_owned_key_chain() {
        let model = customers();
        let geo = model.entity("Geo").unwrap();
        let ownership = geo.ownership.as_ref().unwrap();
        assert_eq!(ownership.owner, "Address");
        assert_eq!(
            ownership.principal_for("AddressCustomerId").unwrap(),
            "CustomerId"
        );
        assert_eq!(geo.primary_key, vec![SmolStr::new("AddressCustomerId")]);
    }

    #[test]
    fn test_owned_collection_gets_ordinal_key() {
        let model = customers();
        let order = model.entity("Order").unwrap();
        assert_eq!(
            order.primary_key,
            vec![SmolStr::new("CustomerId"), SmolStr::new(ORDINAL_KEY)]
        );
        assert_eq!(
            order.property(ORDINAL_KEY).unwrap().storage,
            PropertyStorage::Ordinal
        );
    }

    #[test]
    fn test_inverse_navigation_wired() {
        let model = customers();
        let nav = model.entity("Customer").unwrap().navigation("Address").unwrap();
        assert_eq!(nav.inverse.as_deref(), Some("Customer"));
        let back = model.entity("Address").unwrap().navigation("Customer").unwrap();
        assert!(!back.embedded);
    }
}
