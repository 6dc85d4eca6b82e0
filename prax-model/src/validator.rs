//! Model validation.
//!
//! Checks that a built model is internally consistent:
//! - Every root entity type has a collection and a primary key
//! - Base types and navigation targets exist
//! - Element names are unique within a document
//! - Vector indexes point at vector properties

use std::collections::HashSet;

use smol_str::SmolStr;

use crate::entity::EntityType;
use crate::error::{ModelError, ModelResult};
use crate::index::VectorIndex;
use crate::model::Model;
use crate::types::ScalarKind;

/// Model validator collecting every error before failing.
#[derive(Debug, Default)]
pub(crate) struct Validator {
    errors: Vec<ModelError>,
}

impl Validator {
    pub(crate) fn new() -> Self {
        Self { errors: vec![] }
    }

    /// Record a duplicate definition found while assembling the model.
    pub(crate) fn duplicate(&mut self, kind: &str, name: &str) {
        self.errors.push(ModelError::duplicate(kind, name));
    }

    /// Validate the model, returning every collected error at once.
    pub(crate) fn validate(&mut self, model: &Model) -> ModelResult<()> {
        for ty in model.entity_types() {
            self.validate_entity(ty, model);
        }

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::ValidationFailed {
                count: self.errors.len(),
                errors: std::mem::take(&mut self.errors),
            })
        }
    }

    fn validate_entity(&mut self, ty: &EntityType, model: &Model) {
        match (&ty.base_type, &ty.ownership) {
            (Some(base), _) => {
                if model.entity(base).is_none() {
                    self.errors.push(ModelError::invalid_entity(
                        ty.name(),
                        format!("base type `{}` does not exist", base),
                    ));
                }
                if ty.collection.is_some() {
                    self.errors.push(ModelError::invalid_entity(
                        ty.name(),
                        "derived types share the collection of their base type",
                    ));
                }
                if ty.discriminator.is_none() {
                    self.errors.push(ModelError::invalid_entity(
                        ty.name(),
                        "derived types need a discriminator",
                    ));
                }
            }
            (None, Some(_)) => {
                if ty.collection.is_some() {
                    self.errors.push(ModelError::invalid_entity(
                        ty.name(),
                        "owned types are stored inside their owner",
                    ));
                }
            }
            (None, None) => {
                if ty.collection.is_none() {
                    self.errors.push(ModelError::invalid_entity(
                        ty.name(),
                        "no collection configured",
                    ));
                }
            }
        }

        if ty.base_type.is_none() {
            if ty.primary_key.is_empty() {
                self.errors.push(ModelError::MissingKey {
                    entity: ty.name.to_string(),
                });
            }
            for key in &ty.primary_key {
                if ty.property(key).is_none() {
                    self.errors.push(ModelError::unknown_property(ty.name(), key.as_str()));
                }
            }
        }

        self.check_elements(ty, model);

        for nav in ty.navigations.values() {
            match model.entity(&nav.target) {
                None => self.errors.push(ModelError::invalid_entity(
                    ty.name(),
                    format!(
                        "navigation `{}` targets unknown type `{}`",
                        nav.name, nav.target
                    ),
                )),
                Some(target) if nav.embedded && !target.is_owned() => {
                    self.errors.push(ModelError::invalid_entity(
                        ty.name(),
                        format!("embedded navigation `{}` targets a non-owned type", nav.name),
                    ));
                }
                Some(_) => {}
            }
        }

        let mut index_names = HashSet::new();
        for index in &ty.vector_indexes {
            if !index_names.insert(index.name.as_str()) {
                self.errors.push(ModelError::duplicate("vector index", index.name.as_str()));
            }
            self.check_vector_index(ty, index, model);
        }
    }

    /// Element names must be unique within one document level.
    fn check_elements(&mut self, ty: &EntityType, model: &Model) {
        let mut seen: HashSet<Vec<SmolStr>> = HashSet::new();
        let Some(root) = model.hierarchy_root(ty.name()) else {
            return;
        };
        for prop in model.properties(ty.name()) {
            if let Some(path) = root.element_path(prop) {
                if !seen.insert(path.clone()) {
                    self.errors.push(ModelError::duplicate("element", path.join(".")));
                }
            }
        }
        for nav in model.navigations(ty.name()).into_iter().filter(|n| n.embedded) {
            if !seen.insert(vec![nav.element_name.clone()]) {
                self.errors
                    .push(ModelError::duplicate("element", nav.element_name.as_str()));
            }
        }
    }

    fn check_vector_index(&mut self, ty: &EntityType, index: &VectorIndex, model: &Model) {
        if index.dimensions == 0 {
            self.errors.push(ModelError::invalid_vector_index(
                ty.name(),
                index.name.as_str(),
                "dimensions must be positive",
            ));
        }

        let Some((last, prefix)) = index.property_path.split_last() else {
            self.errors.push(ModelError::invalid_vector_index(
                ty.name(),
                index.name.as_str(),
                "empty property path",
            ));
            return;
        };

        let mut current = ty.name.clone();
        for segment in prefix {
            match model.find_navigation(&current, segment) {
                Some(nav) if nav.embedded => current = nav.target.clone(),
                _ => {
                    self.errors.push(ModelError::invalid_vector_index(
                        ty.name(),
                        index.name.as_str(),
                        format!("`{}` is not an embedded navigation of `{}`", segment, current),
                    ));
                    return;
                }
            }
        }

        match model.find_property(&current, last) {
            Some((_, prop)) if prop.kind == ScalarKind::Vector => {}
            Some(_) => self.errors.push(ModelError::invalid_vector_index(
                ty.name(),
                index.name.as_str(),
                format!("`{}` is not a vector property", last),
            )),
            None => self
                .errors
                .push(ModelError::unknown_property(current.as_str(), last.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::ModelBuilder;
    use crate::error::ModelError;
    use crate::index::Similarity;
    use crate::types::ScalarKind;

    fn errors(result: Result<crate::Model, ModelError>) -> Vec<String> {
        match result {
            Err(ModelError::ValidationFailed { errors, .. }) => {
                errors.into_iter().map(|e| e.to_string()).collect()
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_key_and_collection() {
        let result = ModelBuilder::new()
            .entity("Blog", |e| {
                e.property("Title", ScalarKind::String);
            })
            .build();
        let errors = errors(result);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("no primary key")));
        assert!(errors.iter().any(|e| e.contains("no collection")));
    }

    #[test]
    fn test_unknown_navigation_target() {
        let result = ModelBuilder::new()
            .entity("Blog", |e| {
                e.collection("blogs")
                    .property("Id", ScalarKind::Int32)
                    .key(["Id"])
                    .reference("Owner", "Person", crate::NavigationKind::Reference);
            })
            .build();
        let errors = errors(result);
        assert!(errors[0].contains("unknown type `Person`"));
    }

    #[test]
    fn test_vector_index_must_target_vector() {
        let result = ModelBuilder::new()
            .entity("Movie", |e| {
                e.collection("movies")
                    .property("Id", ScalarKind::ObjectId)
                    .property("Title", ScalarKind::String)
                    .key(["Id"])
                    .vector_index("TitleIdx", ["Title"], 8, Similarity::Cosine);
            })
            .build();
        let errors = errors(result);
        assert!(errors[0].contains("not a vector property"));
    }

    #[test]
    fn test_vector_index_through_owned_path() {
        let model = ModelBuilder::new()
            .entity("Movie", |e| {
                e.collection("movies")
                    .property("Id", ScalarKind::ObjectId)
                    .key(["Id"])
                    .owns_one("Plot", "Plot", |p| {
                        p.property("Embedding", ScalarKind::Vector);
                    })
                    .default_vector_index(["Plot", "Embedding"], 4, Similarity::DotProduct);
            })
            .build()
            .unwrap();
        assert!(
            model
                .vector_index_named("Movie", "PlotEmbeddingVectorIndex")
                .is_some()
        );
    }

    #[test]
    fn test_duplicate_entity() {
        let result = ModelBuilder::new()
            .entity("A", |e| {
                e.collection("a").property("Id", ScalarKind::Int32).key(["Id"]);
            })
            .entity("A", |e| {
                e.collection("a2").property("Id", ScalarKind::Int32).key(["Id"]);
            })
            .build();
        let errors = errors(result);
        assert_eq!(errors, vec!["duplicate entity type `A`".to_string()]);
    }
}
