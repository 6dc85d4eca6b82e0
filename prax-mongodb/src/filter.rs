//! MongoDB filter building utilities.
//!
//! The translator lowers predicates into match documents through
//! [`FilterBuilder`]; predicates with no match-document form are wrapped in
//! `$expr`.

use bson::{Bson, Document, doc};

/// Builder for MongoDB filter documents.
///
/// Conditions on the same field are merged into one operator document;
/// a second condition with the same operator moves to `$and`.
///
/// # Example
///
/// ```rust
/// use bson::doc;
/// use prax_mongodb::FilterBuilder;
///
/// let filter = FilterBuilder::new()
///     .eq("status", "active")
///     .gte("age", 18)
///     .lt("age", 65)
///     .build();
///
/// assert_eq!(filter, doc! { "status": "active", "age": { "$gte": 18, "$lt": 65 } });
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterBuilder {
    doc: Document,
    and: Vec<Document>,
}

impl FilterBuilder {
    /// Create a new empty filter builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter builder from an existing document.
    pub fn from_doc(doc: Document) -> Self {
        Self::new().merge(doc)
    }

    /// Add an equality condition.
    pub fn eq(self, field: &str, value: impl Into<Bson>) -> Self {
        let value = value.into();
        match value {
            // `{ f: { $x: .. } }` would read as an operator document.
            Bson::Document(ref d) if d.keys().any(|k| k.starts_with('$')) => {
                self.operator(field, "$eq", value)
            }
            value => self.set(field, value),
        }
    }

    /// Add a not-equal condition.
    pub fn ne(self, field: &str, value: impl Into<Bson>) -> Self {
        self.operator(field, "$ne", value.into())
    }

    /// Add a greater-than condition.
    pub fn gt(self, field: &str, value: impl Into<Bson>) -> Self {
        self.operator(field, "$gt", value.into())
    }

    /// Add a greater-than-or-equal condition.
    pub fn gte(self, field: &str, value: impl Into<Bson>) -> Self {
        self.operator(field, "$gte", value.into())
    }

    /// Add a less-than condition.
    pub fn lt(self, field: &str, value: impl Into<Bson>) -> Self {
        self.operator(field, "$lt", value.into())
    }

    /// Add a less-than-or-equal condition.
    pub fn lte(self, field: &str, value: impl Into<Bson>) -> Self {
        self.operator(field, "$lte", value.into())
    }

    /// Add an "in" condition (value in array).
    pub fn in_array(self, field: &str, values: Vec<impl Into<Bson>>) -> Self {
        let bson_values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.operator(field, "$in", Bson::Array(bson_values))
    }

    /// Add a "not in" condition.
    pub fn not_in(self, field: &str, values: Vec<impl Into<Bson>>) -> Self {
        let bson_values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.operator(field, "$nin", Bson::Array(bson_values))
    }

    /// Add a regex condition.
    pub fn regex(self, field: &str, pattern: &str) -> Self {
        self.operator(field, "$regex", Bson::String(pattern.to_string()))
    }

    /// Add an exists condition.
    pub fn exists(self, field: &str, exists: bool) -> Self {
        self.operator(field, "$exists", Bson::Boolean(exists))
    }

    /// Add an arbitrary field operator.
    pub fn operator(mut self, field: &str, op: &str, value: Bson) -> Self {
        match self.doc.get_mut(field) {
            Some(Bson::Document(ops))
                if ops.keys().all(|k| k.starts_with('$')) && !ops.contains_key(op) =>
            {
                ops.insert(op, value);
            }
            Some(_) => self.and.push(doc! { field: { op: value } }),
            None => {
                self.doc.insert(field, doc! { op: value });
            }
        }
        self
    }

    /// Combine with AND ($and).
    pub fn and(mut self, conditions: Vec<Document>) -> Self {
        for condition in conditions {
            self = self.merge(condition);
        }
        self
    }

    /// Combine with OR ($or).
    pub fn or(self, conditions: Vec<Document>) -> Self {
        self.set("$or", Bson::Array(conditions.into_iter().map(Bson::Document).collect()))
    }

    /// Combine with NOR ($nor).
    pub fn nor(self, conditions: Vec<Document>) -> Self {
        self.set("$nor", Bson::Array(conditions.into_iter().map(Bson::Document).collect()))
    }

    /// Add an aggregation expression condition ($expr).
    pub fn expr(self, expression: impl Into<Bson>) -> Self {
        self.set("$expr", expression.into())
    }

    /// Merge another filter into this one.
    pub fn merge(mut self, other: Document) -> Self {
        for (k, v) in other {
            match v {
                Bson::Document(ops) if !k.starts_with('$') && is_operator_doc(&ops) => {
                    for (op, value) in ops {
                        self = self.operator(&k, &op, value);
                    }
                }
                v => self = self.set(&k, v),
            }
        }
        self
    }

    fn set(mut self, field: &str, value: Bson) -> Self {
        if self.doc.contains_key(field) {
            self.and.push(doc! { field: value });
        } else {
            self.doc.insert(field, value);
        }
        self
    }

    /// Build the filter document.
    pub fn build(self) -> Document {
        if self.and.is_empty() {
            return self.doc;
        }
        let mut conditions = Vec::with_capacity(self.and.len() + 1);
        if !self.doc.is_empty() {
            conditions.push(Bson::Document(self.doc));
        }
        conditions.extend(self.and.into_iter().map(Bson::Document));
        doc! { "$and": conditions }
    }

    /// Check if the filter is empty.
    pub fn is_empty(&self) -> bool {
        self.doc.is_empty() && self.and.is_empty()
    }
}

fn is_operator_doc(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Create an empty filter (matches all documents).
pub fn all() -> Document {
    doc! {}
}

/// Escape regular expression metacharacters in a literal.
pub fn escape_regex(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(
            c,
            '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filter_builder_eq() {
        let filter = FilterBuilder::new()
            .eq("name", "Alice")
            .eq("age", 30)
            .build();

        assert_eq!(filter.get_str("name").unwrap(), "Alice");
        assert_eq!(filter.get_i32("age").unwrap(), 30);
    }

    #[test]
    fn test_comparisons_on_same_field_merge() {
        let filter = FilterBuilder::new().gte("age", 18).lt("age", 65).build();
        assert_eq!(filter, doc! { "age": { "$gte": 18, "$lt": 65 } });
    }

    #[test]
    fn test_repeated_operator_moves_to_and() {
        let filter = FilterBuilder::new().ne("status", "a").ne("status", "b").build();
        assert_eq!(
            filter,
            doc! { "$and": [ { "status": { "$ne": "a" } }, { "status": { "$ne": "b" } } ] }
        );
    }

    #[test]
    fn test_filter_builder_in_array() {
        let filter = FilterBuilder::new()
            .in_array("status", vec!["active", "pending"])
            .build();

        let status = filter.get_document("status").unwrap();
        assert!(status.contains_key("$in"));
    }

    #[test]
    fn test_filter_builder_or() {
        let filter = FilterBuilder::new()
            .or(vec![
                doc! { "status": "active" },
                doc! { "priority": "high" },
            ])
            .build();

        assert_eq!(
            filter,
            doc! { "$or": [ { "status": "active" }, { "priority": "high" } ] }
        );
    }

    #[test]
    fn test_filter_builder_nor() {
        let filter = FilterBuilder::new()
            .nor(vec![doc! { "Year": { "$gt": 1900 } }])
            .build();
        assert_eq!(filter, doc! { "$nor": [ { "Year": { "$gt": 1900 } } ] });
    }

    #[test]
    fn test_merge_combines_operator_documents() {
        let filter = FilterBuilder::from_doc(doc! { "Year": { "$gt": 2000 } })
            .merge(doc! { "Year": { "$lt": 2010 }, "Title": "Heat" })
            .build();
        assert_eq!(filter, doc! { "Year": { "$gt": 2000, "$lt": 2010 }, "Title": "Heat" });
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("a.b*c"), r"a\.b\*c");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn test_all_filter() {
        assert!(all().is_empty());
        assert!(FilterBuilder::new().is_empty());
    }
}
