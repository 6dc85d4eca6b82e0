//! Projection binding: rewrites a `Select` selector into a shaper whose
//! leaves are projection bindings.
//!
//! Leaves that fill a whole member slot of a record construction are mapped
//! by member path; leaves nested inside a computed expression are added to
//! the projection by position.

use prax_model::{Model, PropertyStorage};
use smol_str::SmolStr;
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::eval::{is_closed, try_evaluate};
use crate::expr::{
    CollectionShaper, EntityProjection, Expr, ExprRewriter, FieldRef, MemberArg, Method,
    ObjectArrayProjection, ProjectionBinding, ProjectionMember, ValueBuffer, rewrite_children,
};
use crate::query_expression::MongoQueryExpression;
use crate::shaper::entity_shaper;
use crate::types::TypeRef;
use crate::value::Value;

/// Field holding the vector search score of a document.
pub const SCORE_FIELD: &str = "__score";

/// How a member of an entity document maps to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberResolution {
    /// A stored scalar property.
    Field(FieldRef),
    /// An embedded object.
    Entity(EntityProjection),
    /// An embedded array.
    Array(ObjectArrayProjection),
    /// A mapped property without a stored element.
    Unstored,
    /// A navigation to another collection.
    NotEmbedded,
    /// Not a mapped member.
    Unknown,
}

/// Resolve `name` on the entity stored at `owner` through the model.
pub fn resolve_member(model: &Model, owner: &EntityProjection, name: &str) -> MemberResolution {
    if let Some((_, property)) = model.find_property(&owner.entity_type, name) {
        let PropertyStorage::Element(_) = property.storage else {
            return MemberResolution::Unstored;
        };
        let Some(element_path) = model.element_path(&owner.entity_type, name) else {
            return MemberResolution::Unstored;
        };
        let mut path = owner.path.clone();
        path.extend(element_path);
        return MemberResolution::Field(FieldRef {
            path,
            property: Some(property.name.clone()),
            ty: TypeRef::Scalar {
                kind: property.kind,
                nullable: property.nullable,
            },
        });
    }

    if let Some(navigation) = model.find_navigation(&owner.entity_type, name) {
        if !navigation.embedded {
            return MemberResolution::NotEmbedded;
        }
        let mut path = owner.path.clone();
        path.push(navigation.element_name.clone());
        return if navigation.is_collection() {
            MemberResolution::Array(ObjectArrayProjection {
                entity_type: navigation.target.clone(),
                path,
                navigation: navigation.name.clone(),
            })
        } else {
            MemberResolution::Entity(EntityProjection {
                entity_type: navigation.target.clone(),
                path,
            })
        };
    }

    MemberResolution::Unknown
}

/// Name of a member access, for both `x.Name` and `EF.Property(x, "Name")`.
pub fn member_access(expr: &Expr) -> Option<(&Expr, &str)> {
    match expr {
        Expr::Member { expr, member } => Some((expr, member.as_str())),
        Expr::Call {
            method: Method::EfProperty,
            args,
        } => match args.as_slice() {
            [target, Expr::Constant(Value::String(name))] => Some((target, name.as_str())),
            _ => None,
        },
        _ => None,
    }
}

/// Replace member accesses on record constructions with the member's value.
///
/// `new { A = e }.A` becomes `e`.
pub fn reduce_record_members(expr: Expr) -> QueryResult<Expr> {
    RecordMemberReducer.rewrite(expr)
}

struct RecordMemberReducer;

impl ExprRewriter for RecordMemberReducer {
    fn rewrite(&mut self, expr: Expr) -> QueryResult<Expr> {
        let expr = rewrite_children(self, expr)?;
        let found = match member_access(&expr) {
            Some((Expr::New { args, .. } | Expr::MemberInit { bindings: args, .. }, name)) => {
                Some(find_arg(args, name).cloned().ok_or_else(|| {
                    QueryError::translation_failed_because(&expr, "the record has no such member")
                })?)
            }
            _ => None,
        };
        Ok(found.unwrap_or(expr))
    }
}

fn find_arg<'a>(args: &'a [MemberArg], name: &str) -> Option<&'a Expr> {
    args.iter().find(|a| a.name == name).map(|a| &a.expr)
}

/// A document reference a selector leaf resolved to.
#[derive(Debug, Clone)]
enum Source {
    Field(FieldRef),
    Entity(EntityProjection),
    Array(ObjectArrayProjection),
}

#[derive(Debug)]
enum Resolution {
    Source(Source),
    /// A computed node whose children must be visited.
    Computed,
    /// A member chain that does not map to storage.
    Unresolvable,
}

/// Rewrites selectors against the projection of a [`MongoQueryExpression`].
pub struct ProjectionBindingVisitor<'a> {
    model: &'a Model,
    member: ProjectionMember,
}

impl<'a> ProjectionBindingVisitor<'a> {
    /// Create a visitor over `model`.
    pub fn new(model: &'a Model) -> Self {
        Self {
            model,
            member: ProjectionMember::root(),
        }
    }

    /// Translate a selector body whose parameter has been replaced by the
    /// current shaper.
    ///
    /// Returns `None` if any part of the selector cannot be bound; the
    /// projection of `query` is only replaced on success.
    pub fn translate(&mut self, query: &mut MongoQueryExpression, selector: &Expr) -> Option<Expr> {
        let selector = match reduce_record_members(selector.clone()) {
            Ok(selector) => selector,
            Err(error) => {
                debug!(%error, "Selector member reduction failed");
                return None;
            }
        };

        let mut scratch = query.clone();
        scratch.begin_projection();
        self.member = ProjectionMember::root();
        let shaper = self.visit(&mut scratch, &selector, true)?;
        scratch.apply_projection();
        *query = scratch;
        Some(shaper)
    }

    fn visit(&mut self, query: &mut MongoQueryExpression, expr: &Expr, slot: bool) -> Option<Expr> {
        match expr {
            Expr::New { type_name, args } => Some(Expr::New {
                type_name: type_name.clone(),
                args: self.visit_members(query, args)?,
            }),
            Expr::MemberInit {
                type_name,
                bindings,
            } => Some(Expr::MemberInit {
                type_name: type_name.clone(),
                bindings: self.visit_members(query, bindings)?,
            }),
            Expr::Query { .. }
            | Expr::QueryRoot(_)
            | Expr::Lambda { .. }
            | Expr::Parameter(_)
            | Expr::NotTranslated(_) => {
                debug!(construct = %expr.kind(), "Selector construct cannot be bound");
                None
            }
            Expr::Constant(_) | Expr::QueryParameter { .. } => Some(expr.clone()),
            _ if is_closed(expr) => try_evaluate(expr).map(Expr::Constant),
            _ => match self.resolve(query, expr) {
                Resolution::Source(source) => self.leaf(query, source, slot),
                Resolution::Unresolvable => {
                    debug!(expr = %expr, "Selector member does not map to storage");
                    None
                }
                Resolution::Computed => self.visit_children(query, expr),
            },
        }
    }

    fn visit_members(
        &mut self,
        query: &mut MongoQueryExpression,
        args: &[MemberArg],
    ) -> Option<Vec<MemberArg>> {
        let mut visited = Vec::with_capacity(args.len());
        for arg in args {
            self.member.push(arg.name.clone());
            let expr = self.visit(query, &arg.expr, true);
            self.member.pop();
            visited.push(MemberArg {
                name: arg.name.clone(),
                expr: expr?,
            });
        }
        Some(visited)
    }

    fn visit_children(&mut self, query: &mut MongoQueryExpression, expr: &Expr) -> Option<Expr> {
        struct Children<'v, 'a> {
            visitor: &'v mut ProjectionBindingVisitor<'a>,
            query: &'v mut MongoQueryExpression,
        }

        impl ExprRewriter for Children<'_, '_> {
            fn rewrite(&mut self, expr: Expr) -> QueryResult<Expr> {
                self.visitor
                    .visit(self.query, &expr, false)
                    .ok_or_else(|| QueryError::translation_failed(expr.kind()))
            }
        }

        rewrite_children(
            &mut Children {
                visitor: self,
                query,
            },
            expr.clone(),
        )
        .ok()
    }

    fn resolve(&self, query: &MongoQueryExpression, expr: &Expr) -> Resolution {
        match expr {
            Expr::Include(include) => self.resolve(query, &include.entity),
            Expr::StructuralShaper(shaper) => {
                let ValueBuffer::Binding(binding) = &shaper.value_buffer else {
                    return Resolution::Unresolvable;
                };
                match query.resolve(&binding.target).map(|e| &e.expr) {
                    Ok(Expr::EntityProjection(p)) => Resolution::Source(Source::Entity(EntityProjection {
                        entity_type: shaper.entity_type.clone(),
                        path: p.path.clone(),
                    })),
                    _ => Resolution::Unresolvable,
                }
            }
            Expr::CollectionShaper(shaper) => {
                let ValueBuffer::Binding(binding) = &shaper.value_buffer else {
                    return Resolution::Unresolvable;
                };
                match query.resolve(&binding.target).map(|e| &e.expr) {
                    Ok(Expr::ObjectArray(p)) => Resolution::Source(Source::Array(p.clone())),
                    _ => Resolution::Unresolvable,
                }
            }
            Expr::ProjectionBinding(binding) => match query.resolve(&binding.target) {
                Ok(entry) => Self::source_of(&entry.expr),
                Err(_) => Resolution::Unresolvable,
            },
            Expr::Field(_) | Expr::EntityProjection(_) | Expr::ObjectArray(_) => {
                Self::source_of(expr)
            }
            Expr::Call {
                method: Method::VectorSearchScore,
                ..
            } => Resolution::Source(Source::Field(FieldRef {
                path: vec![SmolStr::new(SCORE_FIELD)],
                property: None,
                ty: TypeRef::scalar(prax_model::ScalarKind::Double),
            })),
            _ => match member_access(expr) {
                Some((target, name)) => match self.resolve(query, target) {
                    Resolution::Source(Source::Entity(owner)) => {
                        match resolve_member(self.model, &owner, name) {
                            MemberResolution::Field(f) => Resolution::Source(Source::Field(f)),
                            MemberResolution::Entity(p) => Resolution::Source(Source::Entity(p)),
                            MemberResolution::Array(p) => Resolution::Source(Source::Array(p)),
                            MemberResolution::Unstored
                            | MemberResolution::NotEmbedded
                            | MemberResolution::Unknown => Resolution::Unresolvable,
                        }
                    }
                    Resolution::Unresolvable => Resolution::Unresolvable,
                    // Members of scalars and arrays (`Length`, `Count`) are computed.
                    Resolution::Source(_) | Resolution::Computed => Resolution::Computed,
                },
                None => Resolution::Computed,
            },
        }
    }

    fn source_of(expr: &Expr) -> Resolution {
        match expr {
            Expr::Field(f) => Resolution::Source(Source::Field(f.clone())),
            Expr::EntityProjection(p) => Resolution::Source(Source::Entity(p.clone())),
            Expr::ObjectArray(p) => Resolution::Source(Source::Array(p.clone())),
            _ => Resolution::Unresolvable,
        }
    }

    fn bind(&self, query: &mut MongoQueryExpression, origin: Expr, ty: TypeRef, slot: bool) -> ProjectionBinding {
        if slot {
            query.add_pending_member(self.member.clone(), origin);
            ProjectionBinding::member(self.member.clone(), ty)
        } else {
            let index = query.add_pending_entry(origin);
            ProjectionBinding::index(index, ty)
        }
    }

    fn leaf(&self, query: &mut MongoQueryExpression, source: Source, slot: bool) -> Option<Expr> {
        match source {
            Source::Field(field) => {
                let ty = field.ty.clone();
                Some(Expr::ProjectionBinding(self.bind(
                    query,
                    Expr::Field(field),
                    ty,
                    slot,
                )))
            }
            Source::Entity(projection) => {
                let entity_type = projection.entity_type.clone();
                let nullable = !projection.path.is_empty();
                let binding = self.bind(
                    query,
                    Expr::EntityProjection(projection),
                    TypeRef::Entity(entity_type.clone()),
                    slot,
                );
                entity_shaper(self.model, &entity_type, ValueBuffer::Binding(binding), nullable).ok()
            }
            Source::Array(projection) => {
                let entity_type = projection.entity_type.clone();
                let navigation = projection.navigation.clone();
                let binding = self.bind(
                    query,
                    Expr::ObjectArray(projection),
                    TypeRef::Sequence(Box::new(TypeRef::Entity(entity_type.clone()))),
                    slot,
                );
                let element =
                    entity_shaper(self.model, &entity_type, ValueBuffer::CurrentElement, false).ok()?;
                Some(Expr::CollectionShaper(CollectionShaper {
                    entity_type,
                    value_buffer: ValueBuffer::Binding(binding),
                    element: Box::new(element),
                    navigation: Some(navigation),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BindingTarget;
    use prax_model::{ModelBuilder, ScalarKind};
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        ModelBuilder::new()
            .entity("Movie", |e| {
                e.collection("movies")
                    .property("Id", ScalarKind::ObjectId)
                    .property("Title", ScalarKind::String)
                    .property("Year", ScalarKind::Int32)
                    .key(["Id"])
                    .owns_one("Info", "MovieInfo", |i| {
                        i.property("Rating", ScalarKind::Double);
                    })
                    .owns_many("Cast", "CastMember", |c| {
                        c.property("Name", ScalarKind::String);
                    })
                    .reference("Studio", "Studio", prax_model::NavigationKind::Reference);
            })
            .entity("Studio", |e| {
                e.collection("studios")
                    .property("Id", ScalarKind::ObjectId)
                    .key(["Id"]);
            })
            .build()
            .unwrap()
    }

    fn root_shaper(model: &Model) -> Expr {
        entity_shaper(
            model,
            "Movie",
            ValueBuffer::Binding(ProjectionBinding::member(
                ProjectionMember::root(),
                TypeRef::entity("Movie"),
            )),
            false,
        )
        .unwrap()
    }

    fn aliases(query: &MongoQueryExpression) -> Vec<&str> {
        query.projection().iter().map(|e| e.alias.as_str()).collect()
    }

    #[test]
    fn test_scalar_member_in_slot() {
        let model = model();
        let mut query = MongoQueryExpression::new("movies", "Movie");
        let selector = root_shaper(&model).member("Title");
        let shaper = ProjectionBindingVisitor::new(&model)
            .translate(&mut query, &selector)
            .unwrap();

        assert_eq!(
            shaper,
            Expr::ProjectionBinding(ProjectionBinding::member(
                ProjectionMember::root(),
                TypeRef::scalar(ScalarKind::String)
            ))
        );
        assert_eq!(aliases(&query), vec!["_v"]);
    }

    #[test]
    fn test_record_members_and_positional_leaves() {
        let model = model();
        let mut query = MongoQueryExpression::new("movies", "Movie");
        let x = root_shaper(&model);
        let selector = Expr::new_record(
            "Summary",
            [
                ("Name", x.clone().member("Title")),
                ("Next", x.clone().member("Year").add(Expr::constant(1))),
                ("Rating", x.clone().member("Info").member("Rating")),
            ],
        );
        let shaper = ProjectionBindingVisitor::new(&model)
            .translate(&mut query, &selector)
            .unwrap();

        assert_eq!(aliases(&query), vec!["Year", "Name", "Rating"]);
        let Expr::New { args, .. } = &shaper else {
            panic!("expected record, got {}", shaper);
        };
        assert_eq!(
            args[1].expr,
            Expr::ProjectionBinding(ProjectionBinding::index(
                0,
                TypeRef::scalar(ScalarKind::Int32)
            ))
            .add(Expr::constant(1))
        );
        let rating = query
            .resolve(&BindingTarget::Member(ProjectionMember::from_names(["Rating"])))
            .unwrap();
        let Expr::Field(field) = &rating.expr else {
            panic!("expected field");
        };
        assert_eq!(field.dotted(), "Info.Rating");
    }

    #[test]
    fn test_owned_collection_becomes_collection_shaper() {
        let model = model();
        let mut query = MongoQueryExpression::new("movies", "Movie");
        let selector = root_shaper(&model).member("Cast");
        let shaper = ProjectionBindingVisitor::new(&model)
            .translate(&mut query, &selector)
            .unwrap();
        assert!(matches!(shaper, Expr::CollectionShaper(_)));
        assert!(matches!(query.projection()[0].expr, Expr::ObjectArray(_)));
    }

    #[test]
    fn test_closed_subexpression_is_folded() {
        let model = model();
        let mut query = MongoQueryExpression::new("movies", "Movie");
        let selector = Expr::new_record("R", [("When", Expr::date(2024, 1, 1))]);
        let shaper = ProjectionBindingVisitor::new(&model)
            .translate(&mut query, &selector)
            .unwrap();
        let Expr::New { args, .. } = shaper else {
            panic!("expected record");
        };
        assert!(matches!(args[0].expr, Expr::Constant(Value::DateTime(_))));
    }

    #[test]
    fn test_unsupported_selectors_fail() {
        let model = model();
        let mut query = MongoQueryExpression::new("movies", "Movie");
        let x = root_shaper(&model);

        let nested_query = Expr::Query {
            op: crate::operators::QueryOperator::from_name("GroupBy"),
            source: Box::new(Expr::root("Movie")),
            args: vec![],
        };
        let mut visitor = ProjectionBindingVisitor::new(&model);
        assert!(visitor.translate(&mut query, &nested_query).is_none());
        assert!(visitor.translate(&mut query, &x.clone().member("Studio")).is_none());
        assert!(visitor.translate(&mut query, &x.member("Missing")).is_none());
        assert!(query.is_identity_projection());
    }

    #[test]
    fn test_reduce_record_members() {
        let record = Expr::new_record("R", [("A", Expr::constant(1))]);
        assert_eq!(
            reduce_record_members(record.clone().member("A")).unwrap(),
            Expr::constant(1)
        );
        assert!(reduce_record_members(record.member("B")).is_err());
    }
}
