//! The query being built: collection, projection list and recorded operators.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::trace;

use crate::error::{QueryError, QueryResult};
use crate::expr::{
    BindingTarget, EntityProjection, Expr, ExprRewriter, ObjectArrayProjection, ProjectionBinding,
    ProjectionMember, ValueBuffer, rewrite_children,
};
use crate::operators::{Overload, QueryOperator, ResultCardinality};
use crate::types::TypeRef;

/// Alias of the single value produced by scalar results.
pub const SCALAR_ALIAS: &str = "_v";

/// One entry of the projection list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEntry {
    /// Field name read from the result document; empty for the document itself.
    pub alias: SmolStr,
    /// Origin of the value.
    pub expr: Expr,
}

/// An operator call recorded by the capture pass.
///
/// Lambda arguments are stored as bodies with the parameter already bound
/// to document references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOperation {
    /// The operator.
    pub operator: QueryOperator,
    /// Overload shape of the call.
    pub overload: Overload,
    /// Bound arguments.
    pub args: Vec<Expr>,
}

/// A query against one collection.
///
/// Owns the projection list that projection bindings point into. The index
/// and member lookups always agree with the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MongoQueryExpression {
    /// Collection queried.
    pub collection: SmolStr,
    /// Root entity type.
    pub entity_type: SmolStr,
    projection: Vec<ProjectionEntry>,
    projection_members: IndexMap<ProjectionMember, usize>,
    #[serde(skip)]
    pending_members: IndexMap<ProjectionMember, Expr>,
    #[serde(skip)]
    pending_entries: Vec<Expr>,
    captured: Option<Expr>,
    /// Operators in application order.
    pub operations: Vec<QueryOperation>,
    /// Result cardinality.
    pub cardinality: ResultCardinality,
    /// The terminal operator, if any.
    pub result_operator: Option<QueryOperator>,
    /// Whether a `Distinct` was applied.
    pub is_distinct: bool,
}

impl MongoQueryExpression {
    /// A query over `collection` projecting whole `entity_type` documents.
    pub fn new(collection: impl Into<SmolStr>, entity_type: impl Into<SmolStr>) -> Self {
        let entity_type = entity_type.into();
        let mut projection_members = IndexMap::new();
        projection_members.insert(ProjectionMember::root(), 0);
        Self {
            collection: collection.into(),
            projection: vec![ProjectionEntry {
                alias: SmolStr::default(),
                expr: Expr::EntityProjection(EntityProjection {
                    entity_type: entity_type.clone(),
                    path: vec![],
                }),
            }],
            entity_type,
            projection_members,
            pending_members: IndexMap::new(),
            pending_entries: vec![],
            captured: None,
            operations: vec![],
            cardinality: ResultCardinality::Enumerable,
            result_operator: None,
            is_distinct: false,
        }
    }

    /// Store the outermost expression of the chain. Later calls are ignored.
    pub fn capture_expression(&mut self, expr: &Expr) {
        if self.captured.is_none() {
            self.captured = Some(expr.clone());
        }
    }

    /// The captured expression.
    pub fn captured_expression(&self) -> Option<&Expr> {
        self.captured.as_ref()
    }

    /// The projection list.
    pub fn projection(&self) -> &[ProjectionEntry] {
        &self.projection
    }

    /// Projection index mapped to a member path.
    pub fn member_index(&self, member: &ProjectionMember) -> Option<usize> {
        self.projection_members.get(member).copied()
    }

    /// Projection index a binding target points at.
    pub fn index_of(&self, target: &BindingTarget) -> QueryResult<usize> {
        let index = match target {
            BindingTarget::Index(i) => Some(*i).filter(|i| *i < self.projection.len()),
            BindingTarget::Member(m) => self.member_index(m),
        };
        index.ok_or_else(|| QueryError::unresolved_binding(target))
    }

    /// Projection entry a binding target points at.
    pub fn resolve(&self, target: &BindingTarget) -> QueryResult<&ProjectionEntry> {
        let index = self.index_of(target)?;
        Ok(&self.projection[index])
    }

    /// Check if the projection is the whole root document.
    pub fn is_identity_projection(&self) -> bool {
        matches!(
            self.projection.as_slice(),
            [ProjectionEntry { alias, expr: Expr::EntityProjection(p) }]
                if alias.is_empty() && p.path.is_empty()
        )
    }

    /// Start collecting a new projection.
    pub fn begin_projection(&mut self) {
        self.pending_members.clear();
        self.pending_entries.clear();
    }

    /// Map a member path to a projected value.
    pub fn add_pending_member(&mut self, member: ProjectionMember, expr: Expr) {
        self.pending_members.insert(member, expr);
    }

    /// Add a positional projected value, returning its final index.
    ///
    /// Positional entries precede member entries once the projection is
    /// applied, so the returned index stays valid.
    pub fn add_pending_entry(&mut self, expr: Expr) -> usize {
        if let Some(existing) = self.pending_entries.iter().position(|e| *e == expr) {
            return existing;
        }
        self.pending_entries.push(expr);
        self.pending_entries.len() - 1
    }

    /// Replace the projection with the collected entries.
    pub fn apply_projection(&mut self) {
        let mut projection = Vec::with_capacity(self.pending_entries.len() + self.pending_members.len());
        let mut members = IndexMap::with_capacity(self.pending_members.len());

        for expr in std::mem::take(&mut self.pending_entries) {
            let alias = unique_alias(&projection, positional_alias(&expr));
            projection.push(ProjectionEntry { alias, expr });
        }
        for (member, expr) in std::mem::take(&mut self.pending_members) {
            let alias = if member.is_root() {
                match &expr {
                    Expr::EntityProjection(p) if p.path.is_empty() => SmolStr::default(),
                    _ => SmolStr::new(SCALAR_ALIAS),
                }
            } else {
                let names: Vec<&str> = member.names().iter().map(SmolStr::as_str).collect();
                SmolStr::new(names.join("_"))
            };
            let alias = unique_alias(&projection, alias);
            members.insert(member, projection.len());
            projection.push(ProjectionEntry { alias, expr });
        }

        trace!(entries = projection.len(), "Projection applied");
        self.projection = projection;
        self.projection_members = members;
    }

    /// Project a single scalar value under the reserved alias.
    pub fn set_scalar_result(&mut self, ty: TypeRef) {
        let mut members = IndexMap::new();
        members.insert(ProjectionMember::root(), 0);
        self.projection = vec![ProjectionEntry {
            alias: SmolStr::new(SCALAR_ALIAS),
            expr: Expr::Field(crate::expr::FieldRef {
                path: vec![SmolStr::new(SCALAR_ALIAS)],
                property: None,
                ty,
            }),
        }];
        self.projection_members = members;
    }

    /// Record an operator call.
    pub fn push_operation(&mut self, operator: QueryOperator, overload: Overload, args: Vec<Expr>) {
        self.operations.push(QueryOperation {
            operator,
            overload,
            args,
        });
    }

    /// Replace shapers and bindings in `expr` with the document references
    /// they currently point at.
    ///
    /// Predicates and keys are bound this way when captured, so later
    /// projections cannot invalidate them.
    pub fn inline_bindings(&self, expr: Expr) -> QueryResult<Expr> {
        BindingInliner { query: self }.rewrite(expr)
    }
}

struct BindingInliner<'a> {
    query: &'a MongoQueryExpression,
}

impl ExprRewriter for BindingInliner<'_> {
    fn rewrite(&mut self, expr: Expr) -> QueryResult<Expr> {
        match expr {
            Expr::ProjectionBinding(ProjectionBinding { target, .. }) => {
                Ok(self.query.resolve(&target)?.expr.clone())
            }
            Expr::Include(include) => self.rewrite(*include.entity),
            Expr::StructuralShaper(shaper) => match &shaper.value_buffer {
                ValueBuffer::Binding(binding) => {
                    match &self.query.resolve(&binding.target)?.expr {
                        Expr::EntityProjection(p) => Ok(Expr::EntityProjection(EntityProjection {
                            entity_type: shaper.entity_type.clone(),
                            path: p.path.clone(),
                        })),
                        other => Err(QueryError::translation_failed_because(
                            other,
                            "entity shaper is not bound to a document",
                        )),
                    }
                }
                _ => Err(QueryError::translation_failed(&shaper.entity_type)),
            },
            Expr::CollectionShaper(shaper) => match &shaper.value_buffer {
                ValueBuffer::Binding(binding) => {
                    match &self.query.resolve(&binding.target)?.expr {
                        Expr::ObjectArray(p) => Ok(Expr::ObjectArray(ObjectArrayProjection {
                            entity_type: shaper.entity_type.clone(),
                            path: p.path.clone(),
                            navigation: p.navigation.clone(),
                        })),
                        other => Err(QueryError::translation_failed_because(
                            other,
                            "collection shaper is not bound to an array",
                        )),
                    }
                }
                _ => Err(QueryError::translation_failed(&shaper.entity_type)),
            },
            other => rewrite_children(self, other),
        }
    }
}

fn positional_alias(expr: &Expr) -> SmolStr {
    let path = match expr {
        Expr::Field(f) => &f.path,
        Expr::EntityProjection(p) => &p.path,
        Expr::ObjectArray(p) => &p.path,
        _ => return SmolStr::new(SCALAR_ALIAS),
    };
    if path.is_empty() {
        return SmolStr::new("_root");
    }
    let names: Vec<&str> = path.iter().map(SmolStr::as_str).collect();
    SmolStr::new(names.join("_"))
}

fn unique_alias(projection: &[ProjectionEntry], alias: SmolStr) -> SmolStr {
    if !projection.iter().any(|e| e.alias == alias) {
        return alias;
    }
    (1..)
        .map(|n| SmolStr::new(format!("{}{}", alias, n)))
        .find(|candidate| !projection.iter().any(|e| e.alias == *candidate))
        .unwrap_or(alias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::FieldRef;
    use prax_model::ScalarKind;
    use pretty_assertions::assert_eq;

    fn field(name: &str) -> Expr {
        Expr::Field(FieldRef {
            path: vec![SmolStr::new(name)],
            property: Some(SmolStr::new(name)),
            ty: TypeRef::scalar(ScalarKind::String),
        })
    }

    #[test]
    fn test_identity_projection() {
        let query = MongoQueryExpression::new("movies", "Movie");
        assert!(query.is_identity_projection());
        assert_eq!(query.member_index(&ProjectionMember::root()), Some(0));
    }

    #[test]
    fn test_apply_projection_orders_positional_first() {
        let mut query = MongoQueryExpression::new("movies", "Movie");
        query.begin_projection();
        query.add_pending_member(ProjectionMember::from_names(["Name"]), field("Title"));
        let first = query.add_pending_entry(field("Year"));
        let again = query.add_pending_entry(field("Year"));
        query.apply_projection();

        assert_eq!(first, again);
        let aliases: Vec<&str> = query.projection().iter().map(|e| e.alias.as_str()).collect();
        assert_eq!(aliases, vec!["Year", "Name"]);
        assert_eq!(
            query.member_index(&ProjectionMember::from_names(["Name"])),
            Some(1)
        );
        assert!(!query.is_identity_projection());
    }

    #[test]
    fn test_duplicate_aliases_get_suffix() {
        let mut query = MongoQueryExpression::new("movies", "Movie");
        query.begin_projection();
        query.add_pending_entry(field("Title"));
        query.add_pending_member(ProjectionMember::from_names(["Title"]), field("Plot"));
        query.apply_projection();
        let aliases: Vec<&str> = query.projection().iter().map(|e| e.alias.as_str()).collect();
        assert_eq!(aliases, vec!["Title", "Title1"]);
    }

    #[test]
    fn test_capture_is_write_once() {
        let mut query = MongoQueryExpression::new("movies", "Movie");
        query.capture_expression(&Expr::root("Movie"));
        query.capture_expression(&Expr::null());
        assert_eq!(query.captured_expression(), Some(&Expr::root("Movie")));
    }

    #[test]
    fn test_unresolved_binding() {
        let query = MongoQueryExpression::new("movies", "Movie");
        let err = query
            .resolve(&BindingTarget::Member(ProjectionMember::from_names(["X"])))
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnresolvedProjectionBinding);
    }
}
