//! Aggregation pipeline construction.
//!
//! [`Pipeline`] accumulates stages in order; [`stages`] and
//! [`accumulators`] build the individual documents.

use bson::{Bson, Document, doc};

/// An ordered list of aggregation stages.
///
/// # Example
///
/// ```rust
/// use bson::doc;
/// use prax_mongodb::pipeline::Pipeline;
///
/// let pipeline = Pipeline::new()
///     .match_stage(doc! { "status": "active" })
///     .sort(doc! { "Year": -1 })
///     .limit(10);
///
/// assert_eq!(pipeline.len(), 3);
/// assert_eq!(pipeline.stages()[2], doc! { "$limit": 10_i64 });
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Document>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary stage.
    pub fn add_stage(mut self, stage: Document) -> Self {
        self.stages.push(stage);
        self
    }

    /// Add a stage in place.
    pub fn push(&mut self, stage: Document) {
        self.stages.push(stage);
    }

    /// Add a $match stage. Empty filters are skipped.
    pub fn match_stage(self, filter: Document) -> Self {
        if filter.is_empty() {
            return self;
        }
        self.add_stage(stages::match_stage(filter))
    }

    /// Add a $project stage.
    pub fn project(self, projection: Document) -> Self {
        self.add_stage(stages::project(projection))
    }

    /// Add a $sort stage.
    pub fn sort(self, sort: Document) -> Self {
        self.add_stage(stages::sort(sort))
    }

    /// Add a $skip stage.
    pub fn skip(self, n: i64) -> Self {
        self.add_stage(stages::skip(n))
    }

    /// Add a $limit stage.
    pub fn limit(self, n: i64) -> Self {
        self.add_stage(stages::limit(n))
    }

    /// Stages in order.
    pub fn stages(&self) -> &[Document] {
        &self.stages
    }

    /// Last stage, if any.
    pub fn last(&self) -> Option<&Document> {
        self.stages.last()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Consume into the stage list.
    pub fn into_stages(self) -> Vec<Document> {
        self.stages
    }
}

impl From<Pipeline> for Vec<Document> {
    fn from(pipeline: Pipeline) -> Self {
        pipeline.stages
    }
}

/// Operator name of a stage (`"$match"` for `{ $match: .. }`).
pub fn stage_name(stage: &Document) -> Option<&str> {
    stage.keys().next().map(String::as_str)
}

/// Helper functions for common aggregation stages.
pub mod stages {
    use super::*;

    /// Create a $match stage.
    pub fn match_stage(filter: Document) -> Document {
        doc! { "$match": filter }
    }

    /// A $match stage no document satisfies.
    pub fn match_none() -> Document {
        doc! { "$match": { "$expr": false } }
    }

    /// Create a $project stage.
    pub fn project(fields: Document) -> Document {
        doc! { "$project": fields }
    }

    /// Create a $group stage.
    pub fn group(id: impl Into<Bson>, accumulators: Document) -> Document {
        let mut group_doc = doc! { "_id": id.into() };
        group_doc.extend(accumulators);
        doc! { "$group": group_doc }
    }

    /// Create a $sort stage.
    pub fn sort(fields: Document) -> Document {
        doc! { "$sort": fields }
    }

    /// Create a $limit stage.
    pub fn limit(n: i64) -> Document {
        doc! { "$limit": n }
    }

    /// Create a $skip stage.
    pub fn skip(n: i64) -> Document {
        doc! { "$skip": n }
    }

    /// Create a $count stage.
    pub fn count(field: impl Into<String>) -> Document {
        doc! { "$count": field.into() }
    }

    /// Create an $addFields stage.
    pub fn add_fields(fields: Document) -> Document {
        doc! { "$addFields": fields }
    }

    /// Create an $unset stage.
    pub fn unset(fields: Vec<&str>) -> Document {
        if fields.len() == 1 {
            doc! { "$unset": fields[0] }
        } else {
            doc! { "$unset": fields }
        }
    }

    /// Create a $replaceRoot stage.
    pub fn replace_root(new_root: impl Into<Bson>) -> Document {
        doc! { "$replaceRoot": { "newRoot": new_root.into() } }
    }

    /// Create a $vectorSearch stage from its body.
    pub fn vector_search(body: Document) -> Document {
        doc! { "$vectorSearch": body }
    }

    /// `{ $meta: "vectorSearchScore" }`.
    pub fn vector_search_score() -> Bson {
        Bson::Document(doc! { "$meta": "vectorSearchScore" })
    }
}

/// Aggregation accumulators for use in $group stages.
pub mod accumulators {
    use bson::{Bson, doc};

    /// Sum accumulator.
    pub fn sum(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$sum": expr.into() })
    }

    /// Average accumulator.
    pub fn avg(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$avg": expr.into() })
    }

    /// Minimum accumulator.
    pub fn min(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$min": expr.into() })
    }

    /// Maximum accumulator.
    pub fn max(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$max": expr.into() })
    }

    /// First accumulator.
    pub fn first(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$first": expr.into() })
    }

    /// Count accumulator.
    pub fn count() -> Bson {
        Bson::Document(doc! { "$sum": 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pipeline_builder() {
        let pipeline = Pipeline::new()
            .match_stage(doc! { "status": "active" })
            .match_stage(doc! {})
            .project(doc! { "name": 1 })
            .skip(5);

        assert_eq!(pipeline.len(), 3);
        let names: Vec<_> = pipeline.stages().iter().filter_map(stage_name).collect();
        assert_eq!(names, vec!["$match", "$project", "$skip"]);
    }

    #[test]
    fn test_stages_helpers() {
        let group_doc = stages::group(Bson::Null, doc! { "_v": accumulators::sum("$Total") });
        assert_eq!(
            group_doc,
            doc! { "$group": { "_id": null, "_v": { "$sum": "$Total" } } }
        );

        assert_eq!(stages::count("_v"), doc! { "$count": "_v" });
        assert_eq!(
            stages::replace_root("$_id"),
            doc! { "$replaceRoot": { "newRoot": "$_id" } }
        );
        assert_eq!(stages::unset(vec!["__sort0"]), doc! { "$unset": "__sort0" });
        assert_eq!(stages::match_none(), doc! { "$match": { "$expr": false } });
    }

    #[test]
    fn test_accumulators() {
        let avg = accumulators::avg("$price");
        assert!(avg.as_document().unwrap().contains_key("$avg"));

        let count = accumulators::count();
        assert_eq!(count.as_document().unwrap().get_i32("$sum").unwrap(), 1);
    }

    #[test]
    fn test_vector_search_score_meta() {
        let stage = stages::add_fields(doc! { "__score": stages::vector_search_score() });
        assert_eq!(
            stage,
            doc! { "$addFields": { "__score": { "$meta": "vectorSearchScore" } } }
        );
    }
}
