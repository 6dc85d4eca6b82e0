//! Materialization state of one query execution.
//!
//! Shaped entities live in an arena owned by [`MaterializationContext`];
//! values refer to them through [`EntityId`] handles. Navigation fix-up
//! links principals and dependents in both directions.

use std::sync::Arc;

use bson::{Bson, Document};
use indexmap::IndexMap;
use prax_model::Model;
use prax_query::{EntityId, ParameterValues, QueryError, QueryResult, Value};
use serde::de::DeserializeOwned;
use smol_str::SmolStr;
use tracing::trace;

use crate::codec::value_to_bson;

/// State of a navigation on a materialized entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationValue {
    /// Single related entity, or none.
    Reference(Option<EntityId>),
    /// Related entities in document order.
    Collection(Vec<EntityId>),
    /// Back-reference from an owned entity to its owner.
    Owner(EntityId),
}

/// A materialized entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInstance {
    /// Concrete entity type.
    pub entity_type: SmolStr,
    /// Property values in model order.
    pub properties: IndexMap<SmolStr, Value>,
    /// Loaded navigations.
    pub navigations: IndexMap<SmolStr, NavigationValue>,
}

impl EntityInstance {
    /// Value of a property; null when absent.
    pub fn property(&self, name: &str) -> &Value {
        self.properties.get(name).unwrap_or(&Value::Null)
    }

    /// State of a navigation, if loaded.
    pub fn navigation(&self, name: &str) -> Option<&NavigationValue> {
        self.navigations.get(name)
    }

    /// Related entity of a reference navigation.
    pub fn reference(&self, name: &str) -> Option<EntityId> {
        match self.navigations.get(name)? {
            NavigationValue::Reference(id) => *id,
            NavigationValue::Owner(id) => Some(*id),
            NavigationValue::Collection(_) => None,
        }
    }

    /// Related entities of a collection navigation.
    pub fn collection(&self, name: &str) -> &[EntityId] {
        match self.navigations.get(name) {
            Some(NavigationValue::Collection(ids)) => ids,
            _ => &[],
        }
    }
}

/// Arena of entities shaped during one execution.
#[derive(Debug, Clone)]
pub struct MaterializationContext {
    model: Arc<Model>,
    parameters: ParameterValues,
    entities: Vec<EntityInstance>,
}

impl MaterializationContext {
    /// Create an empty context.
    pub fn new(model: Arc<Model>, parameters: ParameterValues) -> Self {
        Self {
            model,
            parameters,
            entities: vec![],
        }
    }

    /// The model entities are shaped against.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Parameter values of the execution.
    pub fn parameters(&self) -> &ParameterValues {
        &self.parameters
    }

    /// Add an entity, returning its handle.
    pub fn add_entity(
        &mut self,
        entity_type: impl Into<SmolStr>,
        properties: IndexMap<SmolStr, Value>,
    ) -> EntityId {
        let id = EntityId(self.entities.len());
        self.entities.push(EntityInstance {
            entity_type: entity_type.into(),
            properties,
            navigations: IndexMap::new(),
        });
        id
    }

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> QueryResult<&EntityInstance> {
        self.entities
            .get(id.0)
            .ok_or_else(|| QueryError::internal(format!("unknown entity {}", id)))
    }

    fn entity_mut(&mut self, id: EntityId) -> QueryResult<&mut EntityInstance> {
        self.entities
            .get_mut(id.0)
            .ok_or_else(|| QueryError::internal(format!("unknown entity {}", id)))
    }

    /// All entities in creation order.
    pub fn entities(&self) -> &[EntityInstance] {
        &self.entities
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if no entity has been shaped.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Attach the shaped value of a navigation to its principal.
    ///
    /// Collections go through [`populate_collection`](Self::populate_collection);
    /// references are set on both sides when the target declares an inverse.
    pub fn fix_up(&mut self, principal: EntityId, navigation: &str, related: &Value) -> QueryResult<()> {
        match related {
            Value::List(items) => self.populate_collection(principal, navigation, items),
            Value::Null => {
                self.entity_mut(principal)?
                    .navigations
                    .insert(SmolStr::new(navigation), NavigationValue::Reference(None));
                Ok(())
            }
            Value::Entity(dependent) => {
                self.entity_mut(principal)?.navigations.insert(
                    SmolStr::new(navigation),
                    NavigationValue::Reference(Some(*dependent)),
                );
                self.set_inverse(principal, navigation, *dependent)
            }
            other => Err(QueryError::internal(format!(
                "navigation `{}` shaped to a {} value",
                navigation,
                other.type_name()
            ))),
        }
    }

    /// Append shaped elements to a collection navigation.
    pub fn populate_collection(
        &mut self,
        principal: EntityId,
        navigation: &str,
        items: &[Value],
    ) -> QueryResult<()> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Entity(id) => ids.push(*id),
                Value::Null => {}
                other => {
                    return Err(QueryError::internal(format!(
                        "collection `{}` holds a {} value",
                        navigation,
                        other.type_name()
                    )));
                }
            }
        }

        trace!(%principal, navigation, count = ids.len(), "Populating collection");
        let entry = self
            .entity_mut(principal)?
            .navigations
            .entry(SmolStr::new(navigation))
            .or_insert_with(|| NavigationValue::Collection(vec![]));
        match entry {
            NavigationValue::Collection(existing) => existing.extend(ids.iter().copied()),
            other => *other = NavigationValue::Collection(ids.clone()),
        }

        for dependent in ids {
            self.set_inverse(principal, navigation, dependent)?;
        }
        Ok(())
    }

    fn set_inverse(&mut self, principal: EntityId, navigation: &str, dependent: EntityId) -> QueryResult<()> {
        let principal_type = self.entity(principal)?.entity_type.clone();
        let dependent_type = self.entity(dependent)?.entity_type.clone();
        let inverse = self
            .model
            .navigations(&dependent_type)
            .into_iter()
            .find(|nav| {
                nav.inverse.as_deref() == Some(navigation)
                    && self.model.hierarchy(&principal_type).any(|ty| ty.name == nav.target)
            })
            .map(|nav| nav.name.clone());

        if let Some(inverse) = inverse {
            self.entity_mut(dependent)?
                .navigations
                .insert(inverse, NavigationValue::Owner(principal));
        }
        Ok(())
    }

    /// Convert a shaped value to BSON.
    ///
    /// Entities become documents keyed by property name with their loaded
    /// navigations nested; owner back-references are skipped.
    pub fn to_bson(&self, value: &Value) -> QueryResult<Bson> {
        match value {
            Value::Entity(id) => self.entity_to_document(*id).map(Bson::Document),
            Value::List(items) => items
                .iter()
                .map(|item| self.to_bson(item))
                .collect::<QueryResult<Vec<_>>>()
                .map(Bson::Array),
            Value::Record { fields, .. } => {
                let mut doc = Document::new();
                for (name, field) in fields {
                    doc.insert(name.as_str(), self.to_bson(field)?);
                }
                Ok(Bson::Document(doc))
            }
            other => value_to_bson(other),
        }
    }

    fn entity_to_document(&self, id: EntityId) -> QueryResult<Document> {
        let entity = self.entity(id)?;
        let mut doc = Document::new();
        for (name, value) in &entity.properties {
            doc.insert(name.as_str(), value_to_bson(value)?);
        }
        for (name, navigation) in &entity.navigations {
            let value = match navigation {
                NavigationValue::Owner(_) => continue,
                NavigationValue::Reference(None) => Bson::Null,
                NavigationValue::Reference(Some(related)) => {
                    Bson::Document(self.entity_to_document(*related)?)
                }
                NavigationValue::Collection(related) => Bson::Array(
                    related
                        .iter()
                        .map(|r| self.entity_to_document(*r).map(Bson::Document))
                        .collect::<QueryResult<_>>()?,
                ),
            };
            doc.insert(name.as_str(), value);
        }
        Ok(doc)
    }
}

/// The result of an execution together with the entities it refers to.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    /// Shaped result: a list for sequences, a single value otherwise.
    pub result: Value,
    /// Arena owning the shaped entities.
    pub context: MaterializationContext,
}

impl QueryOutput {
    /// Deserialize the result into a typed value.
    ///
    /// ```rust,ignore
    /// #[derive(serde::Deserialize)]
    /// struct Movie { #[serde(rename = "Title")] title: String }
    ///
    /// let movies: Vec<Movie> = output.into_typed()?;
    /// ```
    pub fn into_typed<T: DeserializeOwned>(self) -> QueryResult<T> {
        let bson = self.context.to_bson(&self.result)?;
        bson::from_bson(bson).map_err(|e| QueryError::deserialization(e.to_string()))
    }

    /// The entity behind an entity result.
    pub fn entity(&self) -> Option<&EntityInstance> {
        self.result
            .as_entity()
            .and_then(|id| self.context.entity(id).ok())
    }
}
