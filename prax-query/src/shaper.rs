//! Construction and expansion of entity shapers.

use prax_model::{Model, ScalarKind};
use smol_str::SmolStr;

use crate::error::{QueryError, QueryResult};
use crate::expr::{
    BinaryOp, CollectionShaper, Expr, ExprRewriter, IncludeExpr, Materialize, MaterializeVariant,
    Method, PropertyRead, StructuralShaper, UnaryOp, ValueBuffer, ValueBufferRead,
    rewrite_children,
};
use crate::types::TypeRef;

/// Build the shaper of an entity read from `buffer`.
///
/// Embedded navigations are included automatically, base type navigations
/// first; navigations to other collections are left unloaded.
pub fn entity_shaper(
    model: &Model,
    entity_type: &str,
    buffer: ValueBuffer,
    nullable: bool,
) -> QueryResult<Expr> {
    model
        .find_entity(entity_type)
        .map_err(|e| QueryError::translation_failed_because(entity_type, e))?;

    let mut shaper = Expr::StructuralShaper(StructuralShaper {
        entity_type: SmolStr::new(entity_type),
        value_buffer: buffer,
        nullable,
    });

    for navigation in model.navigations(entity_type) {
        if !navigation.embedded {
            continue;
        }
        let nested = ValueBuffer::Nested {
            element: navigation.element_name.clone(),
        };
        let related = if navigation.is_collection() {
            Expr::CollectionShaper(CollectionShaper {
                entity_type: navigation.target.clone(),
                value_buffer: nested,
                element: Box::new(entity_shaper(
                    model,
                    &navigation.target,
                    ValueBuffer::CurrentElement,
                    false,
                )?),
                navigation: Some(navigation.name.clone()),
            })
        } else {
            entity_shaper(model, &navigation.target, nested, true)?
        };
        shaper = Expr::Include(IncludeExpr {
            entity: Box::new(shaper),
            entity_type: SmolStr::new(entity_type),
            navigation: navigation.name.clone(),
            related: Box::new(related),
        });
    }

    Ok(shaper)
}

/// The innermost structural shaper of an entity shaper, below its includes.
pub fn structural_shaper(expr: &Expr) -> Option<&StructuralShaper> {
    match expr {
        Expr::StructuralShaper(shaper) => Some(shaper),
        Expr::Include(include) => structural_shaper(&include.entity),
        _ => None,
    }
}

/// Static type produced by a shaper.
pub fn shaper_type(expr: &Expr) -> TypeRef {
    match expr {
        Expr::Constant(value) => TypeRef::of_value(value),
        Expr::QueryParameter { ty, .. } => ty.clone(),
        Expr::Field(field) => field.ty.clone(),
        Expr::ProjectionBinding(binding) => binding.ty.clone(),
        Expr::ValueBufferRead(read) => read.ty.clone(),
        Expr::EntityProjection(p) => TypeRef::Entity(p.entity_type.clone()),
        Expr::StructuralShaper(s) => TypeRef::Entity(s.entity_type.clone()),
        Expr::Materialize(m) => TypeRef::Entity(m.entity_type.clone()),
        Expr::Include(include) => shaper_type(&include.entity),
        Expr::ObjectArray(p) => TypeRef::Sequence(Box::new(TypeRef::Entity(p.entity_type.clone()))),
        Expr::CollectionShaper(s) => TypeRef::Sequence(Box::new(TypeRef::Entity(s.entity_type.clone()))),
        Expr::New { type_name, .. } | Expr::MemberInit { type_name, .. } => {
            TypeRef::Record(type_name.clone())
        }
        Expr::Binary { op, left, right } => {
            if op.is_comparison()
                || matches!(op, BinaryOp::AndAlso | BinaryOp::OrElse)
            {
                TypeRef::scalar(ScalarKind::Bool)
            } else if matches!(op, BinaryOp::Coalesce) {
                shaper_type(right)
            } else {
                let l = shaper_type(left);
                match (l.scalar_kind(), shaper_type(right).scalar_kind()) {
                    (Some(a), Some(b)) => TypeRef::Scalar {
                        kind: widest(a, b),
                        nullable: l.is_nullable(),
                    },
                    _ => l,
                }
            }
        }
        Expr::Unary { op, operand } => match op {
            UnaryOp::Convert(kind) => TypeRef::Scalar {
                kind: *kind,
                nullable: shaper_type(operand).is_nullable(),
            },
            UnaryOp::Not => TypeRef::scalar(ScalarKind::Bool),
            UnaryOp::Negate => shaper_type(operand),
        },
        Expr::Conditional { if_true, .. } => shaper_type(if_true),
        Expr::Call { method, args } => {
            match method {
                Method::ObjectEquals
                | Method::StringContains
                | Method::StartsWith
                | Method::EndsWith
                | Method::ListContains => TypeRef::scalar(ScalarKind::Bool),
                Method::ToLower | Method::ToUpper => TypeRef::nullable(ScalarKind::String),
                Method::MakeDateTime => TypeRef::scalar(ScalarKind::DateTime),
                Method::VectorSearchScore => TypeRef::scalar(ScalarKind::Double),
                Method::EfProperty | Method::Other(_) => {
                    args.first().map(shaper_type).unwrap_or(TypeRef::Unknown)
                }
            }
        }
        Expr::Member { expr, member } => {
            match (shaper_type(expr).scalar_kind(), member.as_str()) {
                (Some(ScalarKind::String), "Length") => TypeRef::scalar(ScalarKind::Int32),
                (Some(ScalarKind::DateTime), _) => TypeRef::scalar(ScalarKind::Int32),
                _ => TypeRef::Unknown,
            }
        }
        Expr::List(items) => TypeRef::Sequence(Box::new(
            items.first().map(shaper_type).unwrap_or(TypeRef::Unknown),
        )),
        Expr::Parameter(_)
        | Expr::Lambda { .. }
        | Expr::QueryRoot(_)
        | Expr::Query { .. }
        | Expr::NotTranslated(_) => TypeRef::Unknown,
    }
}

fn widest(a: ScalarKind, b: ScalarKind) -> ScalarKind {
    match (a, b) {
        (ScalarKind::Double, _) | (_, ScalarKind::Double) => ScalarKind::Double,
        (ScalarKind::Int64, _) | (_, ScalarKind::Int64) => ScalarKind::Int64,
        (ScalarKind::String, _) | (_, ScalarKind::String) => ScalarKind::String,
        _ => a,
    }
}

/// Expand every structural shaper into a materializer with explicit
/// per-property reads.
pub fn inject_materializers(model: &Model, expr: Expr) -> QueryResult<Expr> {
    MaterializerInjector { model }.rewrite(expr)
}

struct MaterializerInjector<'a> {
    model: &'a Model,
}

impl MaterializerInjector<'_> {
    fn materialize(&self, shaper: StructuralShaper) -> QueryResult<Materialize> {
        let root = self
            .model
            .hierarchy_root(&shaper.entity_type)
            .ok_or_else(|| QueryError::translation_failed(&shaper.entity_type))?;
        let discriminator_element = root.discriminator.as_ref().map(|d| d.element_name.clone());

        let variants = self
            .model
            .derived_types(&shaper.entity_type)
            .into_iter()
            .map(|ty| MaterializeVariant {
                entity_type: ty.name.clone(),
                discriminator: ty.discriminator.as_ref().map(|d| d.value.clone()),
                reads: self
                    .model
                    .properties(&ty.name)
                    .into_iter()
                    .map(|property| PropertyRead {
                        property: property.name.clone(),
                        read: Expr::ValueBufferRead(ValueBufferRead {
                            entity_type: ty.name.clone(),
                            property: property.name.clone(),
                            ty: TypeRef::Scalar {
                                kind: property.kind,
                                nullable: property.nullable,
                            },
                        }),
                    })
                    .collect(),
            })
            .collect();

        Ok(Materialize {
            entity_type: shaper.entity_type,
            value_buffer: shaper.value_buffer,
            nullable: shaper.nullable,
            discriminator_element,
            variants,
        })
    }
}

impl ExprRewriter for MaterializerInjector<'_> {
    fn rewrite(&mut self, expr: Expr) -> QueryResult<Expr> {
        match expr {
            Expr::StructuralShaper(shaper) => Ok(Expr::Materialize(self.materialize(shaper)?)),
            other => rewrite_children(self, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ProjectionBinding, ProjectionMember};
    use prax_model::ModelBuilder;
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        ModelBuilder::new()
            .entity("Customer", |e| {
                e.collection("customers")
                    .property("Id", ScalarKind::Int32)
                    .key(["Id"])
                    .owns_one("Address", "Address", |a| {
                        a.property("City", ScalarKind::String);
                    })
                    .owns_many("Orders", "Order", |o| {
                        o.property("Total", ScalarKind::Double);
                    });
            })
            .build()
            .unwrap()
    }

    fn root_buffer() -> ValueBuffer {
        ValueBuffer::Binding(ProjectionBinding::member(
            ProjectionMember::root(),
            TypeRef::entity("Customer"),
        ))
    }

    #[test]
    fn test_entity_shaper_includes_owned_navigations() {
        let model = model();
        let shaper = entity_shaper(&model, "Customer", root_buffer(), false).unwrap();

        let Expr::Include(orders) = &shaper else {
            panic!("expected include, got {}", shaper);
        };
        assert_eq!(orders.navigation, "Orders");
        assert!(matches!(*orders.related, Expr::CollectionShaper(_)));

        let Expr::Include(address) = &*orders.entity else {
            panic!("expected nested include");
        };
        assert_eq!(address.navigation, "Address");
        assert_eq!(
            structural_shaper(&shaper).map(|s| s.entity_type.as_str()),
            Some("Customer")
        );
    }

    #[test]
    fn test_inject_materializers_expands_every_shaper() {
        let model = model();
        let shaper = entity_shaper(&model, "Customer", root_buffer(), false).unwrap();
        let injected = inject_materializers(&model, shaper).unwrap();
        assert!(!crate::expr::contains(&injected, |e| matches!(
            e,
            Expr::StructuralShaper(_)
        )));

        let Expr::Include(orders) = &injected else {
            panic!("expected include");
        };
        let Expr::CollectionShaper(collection) = &*orders.related else {
            panic!("expected collection shaper");
        };
        let Expr::Materialize(order) = &*collection.element else {
            panic!("expected materializer");
        };
        let names: Vec<&str> = order.variants[0]
            .reads
            .iter()
            .map(|r| r.property.as_str())
            .collect();
        assert_eq!(names, vec!["Total", "__synthesizedOrdinal", "CustomerId"]);
    }

    #[test]
    fn test_shaper_type() {
        let sum = Expr::constant(1).add(Expr::constant(2.5));
        assert_eq!(shaper_type(&sum), TypeRef::scalar(ScalarKind::Double));
        assert_eq!(
            shaper_type(&Expr::constant(1).gt(Expr::constant(0))),
            TypeRef::scalar(ScalarKind::Bool)
        );
    }
}
