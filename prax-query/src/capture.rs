//! Query capture: walks an operator chain and builds the query expression
//! and result shaper.

use prax_model::{Model, ScalarKind};
use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::error::{QueryError, QueryResult};
use crate::eval::sum_kind;
use crate::expr::{Expr, MemberArg, ParameterReplacer, ProjectionBinding, ProjectionMember, ValueBuffer};
use crate::operators::{Overload, QueryOperator, classify};
use crate::projection::{ProjectionBindingVisitor, member_access, reduce_record_members};
use crate::query_expression::MongoQueryExpression;
use crate::shaper::{entity_shaper, shaper_type, structural_shaper};
use crate::types::TypeRef;
use crate::value::Value;
use crate::vector::VECTOR_OPTIONS_TYPE;

/// A captured query and the shaper that rebuilds its results.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedQuery {
    /// The query expression.
    pub query: MongoQueryExpression,
    /// Shaper over the query's projection.
    pub shaper: Expr,
}

/// Outcome of visiting one node of the chain.
enum Visited {
    Shaped(ShapedQuery),
    NotTranslated(SmolStr),
}

/// Captures a queryable operator chain.
///
/// # Example
///
/// ```rust
/// use prax_model::{ModelBuilder, ScalarKind};
/// use prax_query::{Expr, QueryBuilder, QueryableMethodCapture};
///
/// let model = ModelBuilder::new()
///     .entity("Movie", |e| {
///         e.collection("movies")
///             .property("Id", ScalarKind::ObjectId)
///             .property("Year", ScalarKind::Int32)
///             .key(["Id"]);
///     })
///     .build()
///     .unwrap();
///
/// let query = QueryBuilder::root("Movie")
///     .filter(Expr::lambda("m", Expr::param("m").member("Year").gt(Expr::constant(2000))))
///     .count();
///
/// let shaped = QueryableMethodCapture::new(&model).translate(&query).unwrap();
/// assert_eq!(shaped.query.captured_expression(), Some(&query));
/// ```
pub struct QueryableMethodCapture<'a> {
    model: &'a Model,
    captured: Option<Expr>,
}

impl<'a> QueryableMethodCapture<'a> {
    /// Create a capture visitor over `model`.
    pub fn new(model: &'a Model) -> Self {
        Self {
            model,
            captured: None,
        }
    }

    /// Capture the chain rooted at `expr`.
    pub fn translate(&mut self, expr: &Expr) -> QueryResult<ShapedQuery> {
        self.captured = None;
        match self.visit(expr)? {
            Visited::Shaped(shaped) => {
                debug!(
                    collection = %shaped.query.collection,
                    operations = shaped.query.operations.len(),
                    cardinality = ?shaped.query.cardinality,
                    "Query captured"
                );
                Ok(shaped)
            }
            Visited::NotTranslated(construct) => Err(QueryError::translation_failed(construct)),
        }
    }

    fn visit(&mut self, expr: &Expr) -> QueryResult<Visited> {
        if self.captured.is_none() {
            self.captured = Some(expr.clone());
        }

        match expr {
            Expr::QueryRoot(entity) => self.root(entity).map(Visited::Shaped),
            Expr::Query { op, source, args } => {
                if !op.is_supported() {
                    return Ok(Visited::NotTranslated(SmolStr::new(op.name())));
                }
                let shaped = match self.visit(source)? {
                    Visited::Shaped(shaped) => shaped,
                    not_translated => return Ok(not_translated),
                };
                if let Some(terminal) = &shaped.query.result_operator {
                    return Err(QueryError::translation_failed_because(
                        op,
                        format!("it follows the terminal operator `{}`", terminal),
                    ));
                }
                trace!(operator = %op, "Capturing operator");
                self.apply(op, args, shaped).map(Visited::Shaped)
            }
            other => Ok(Visited::NotTranslated(SmolStr::new(other.kind()))),
        }
    }

    fn root(&self, entity: &str) -> QueryResult<ShapedQuery> {
        let collection = self.model.collection_of(entity).ok_or_else(|| {
            QueryError::translation_failed_because(
                format!("DbSet<{}>", entity),
                "the entity type is not mapped to a collection",
            )
        })?;
        let mut query = MongoQueryExpression::new(collection.clone(), entity);
        if let Some(captured) = &self.captured {
            query.capture_expression(captured);
        }
        let shaper = entity_shaper(
            self.model,
            entity,
            ValueBuffer::Binding(ProjectionBinding::member(
                ProjectionMember::root(),
                TypeRef::entity(entity),
            )),
            false,
        )?;
        Ok(ShapedQuery { query, shaper })
    }

    /// Bind the parameter of a lambda argument to the current shaper.
    ///
    /// With `inline`, shapers in the body are replaced by the document
    /// references they read, so the result no longer depends on the
    /// projection.
    fn bind_lambda(&self, shaped: &ShapedQuery, arg: &Expr, inline: bool) -> QueryResult<Expr> {
        let body = match arg {
            Expr::Lambda { params, body } if params.len() == 1 => {
                ParameterReplacer::new(&params[0], &shaped.shaper).replace((**body).clone())?
            }
            Expr::Lambda { .. } => {
                return Err(QueryError::translation_failed_because(
                    arg,
                    "lambdas with more than one parameter are not supported",
                ));
            }
            other => {
                return Err(QueryError::translation_failed_because(other, "expected a lambda"));
            }
        };
        let body = reduce_record_members(body)?;
        if inline {
            shaped.query.inline_bindings(body)
        } else {
            Ok(body)
        }
    }

    fn optional_lambda(&self, shaped: &ShapedQuery, args: &[Expr]) -> QueryResult<Vec<Expr>> {
        match args.first() {
            Some(arg) => Ok(vec![self.bind_lambda(shaped, arg, true)?]),
            None => Ok(vec![]),
        }
    }

    fn required_arg<'e>(op: &QueryOperator, args: &'e [Expr], index: usize) -> QueryResult<&'e Expr> {
        args.get(index).ok_or_else(|| {
            QueryError::translation_failed_because(op, format!("missing argument {}", index))
        })
    }

    /// The current element as a document reference.
    fn element(&self, shaped: &ShapedQuery) -> QueryResult<Expr> {
        shaped.query.inline_bindings(shaped.shaper.clone())
    }

    fn apply(&mut self, op: &QueryOperator, args: &[Expr], mut shaped: ShapedQuery) -> QueryResult<ShapedQuery> {
        let overload = if args.iter().any(|a| matches!(a, Expr::Lambda { .. })) {
            Overload::WithPredicate
        } else {
            Overload::WithoutPredicate
        };

        match op {
            QueryOperator::Where
            | QueryOperator::OrderBy
            | QueryOperator::OrderByDescending
            | QueryOperator::ThenBy
            | QueryOperator::ThenByDescending => {
                let lambda = self.bind_lambda(&shaped, Self::required_arg(op, args, 0)?, true)?;
                shaped.query.push_operation(op.clone(), overload, vec![lambda]);
            }
            QueryOperator::Select => {
                if shaped.query.is_distinct {
                    return Err(QueryError::translation_failed_because(
                        op,
                        "projecting after Distinct is not supported",
                    ));
                }
                let selector = Self::required_arg(op, args, 0)?;
                let body = self.bind_lambda(&shaped, selector, false)?;
                let shaper = ProjectionBindingVisitor::new(self.model)
                    .translate(&mut shaped.query, &body)
                    .ok_or_else(|| QueryError::translation_failed(format!("Select({})", selector)))?;
                shaped.shaper = shaper;
                shaped.query.push_operation(op.clone(), overload, vec![]);
            }
            QueryOperator::Skip | QueryOperator::Take => {
                let count = Self::required_arg(op, args, 0)?.clone();
                shaped.query.push_operation(op.clone(), overload, vec![count]);
            }
            QueryOperator::Distinct => {
                shaped.query.is_distinct = true;
                shaped.query.push_operation(op.clone(), overload, vec![]);
            }
            QueryOperator::OfType => {
                let target = match Self::required_arg(op, args, 0)? {
                    Expr::Constant(Value::String(name)) => SmolStr::new(name),
                    other => {
                        return Err(QueryError::translation_failed_because(
                            other,
                            "OfType expects a type name",
                        ));
                    }
                };
                shaped.shaper = self.of_type(&shaped.shaper, &target)?;
                shaped
                    .query
                    .push_operation(op.clone(), overload, vec![Expr::constant(target.as_str())]);
            }
            QueryOperator::Include => {
                self.check_include(&shaped.shaper, Self::required_arg(op, args, 0)?)?;
            }
            QueryOperator::VectorSearch => {
                let selector = self.bind_lambda(&shaped, Self::required_arg(op, args, 0)?, true)?;
                let vector = Self::required_arg(op, args, 1)?.clone();
                let limit = Self::required_arg(op, args, 2)?.clone();
                let options = match args.get(3) {
                    Some(options) => self.bind_options(&shaped, options)?,
                    None => Expr::null(),
                };
                shaped
                    .query
                    .push_operation(op.clone(), overload, vec![selector, vector, limit, options]);
            }
            QueryOperator::First
            | QueryOperator::FirstOrDefault
            | QueryOperator::Single
            | QueryOperator::SingleOrDefault
            | QueryOperator::Last
            | QueryOperator::LastOrDefault => {
                let predicate = self.optional_lambda(&shaped, args)?;
                shaped.query.push_operation(op.clone(), overload, predicate);
            }
            QueryOperator::ElementAt | QueryOperator::ElementAtOrDefault => {
                let index = Self::required_arg(op, args, 0)?.clone();
                shaped.query.push_operation(op.clone(), overload, vec![index]);
            }
            QueryOperator::Count | QueryOperator::LongCount | QueryOperator::Any => {
                let predicate = self.optional_lambda(&shaped, args)?;
                shaped.query.push_operation(op.clone(), overload, predicate);
                let kind = match op {
                    QueryOperator::Count => ScalarKind::Int32,
                    QueryOperator::LongCount => ScalarKind::Int64,
                    _ => ScalarKind::Bool,
                };
                self.reshape_scalar(&mut shaped, TypeRef::scalar(kind));
            }
            QueryOperator::All => {
                let predicate = self.bind_lambda(&shaped, Self::required_arg(op, args, 0)?, true)?;
                shaped.query.push_operation(op.clone(), overload, vec![predicate]);
                self.reshape_scalar(&mut shaped, TypeRef::scalar(ScalarKind::Bool));
            }
            QueryOperator::Contains => {
                let item = Self::required_arg(op, args, 0)?.clone();
                let element = self.element(&shaped)?;
                shaped.query.push_operation(op.clone(), overload, vec![element, item]);
                self.reshape_scalar(&mut shaped, TypeRef::scalar(ScalarKind::Bool));
            }
            QueryOperator::Sum | QueryOperator::Average | QueryOperator::Min | QueryOperator::Max => {
                let selector = match args.first() {
                    Some(selector) => self.bind_lambda(&shaped, selector, true)?,
                    None => self.element(&shaped)?,
                };
                let selected = shaper_type(&selector);
                let Some(kind) = selected.scalar_kind() else {
                    return Err(QueryError::translation_failed_because(
                        op,
                        format!("cannot aggregate values of type {}", selected),
                    ));
                };
                let ty = match op {
                    QueryOperator::Average => TypeRef::Scalar {
                        kind: ScalarKind::Double,
                        nullable: selected.is_nullable(),
                    },
                    QueryOperator::Sum => TypeRef::scalar(sum_kind(kind)),
                    _ => selected,
                };
                shaped.query.push_operation(op.clone(), overload, vec![selector]);
                self.reshape_scalar(&mut shaped, ty);
            }
            QueryOperator::Unsupported(name) => return Err(QueryError::translation_failed(name)),
        }

        if op.is_terminal() {
            shaped.query.result_operator = Some(op.clone());
            shaped.query.cardinality = classify(op, overload);
        }
        Ok(shaped)
    }

    fn reshape_scalar(&self, shaped: &mut ShapedQuery, ty: TypeRef) {
        shaped.query.set_scalar_result(ty.clone());
        shaped.shaper = Expr::ProjectionBinding(ProjectionBinding::member(ProjectionMember::root(), ty));
    }

    fn of_type(&self, shaper: &Expr, target: &str) -> QueryResult<Expr> {
        let current = structural_shaper(shaper).ok_or_else(|| {
            QueryError::translation_failed_because(
                format!("OfType<{}>", target),
                "the current result is not an entity",
            )
        })?;
        let derived = self
            .model
            .derived_types(&current.entity_type)
            .iter()
            .any(|ty| ty.name == target);
        if !derived {
            return Err(QueryError::translation_failed_because(
                format!("OfType<{}>", target),
                format!("{} does not derive from {}", target, current.entity_type),
            ));
        }
        entity_shaper(self.model, target, current.value_buffer.clone(), current.nullable)
    }

    fn check_include(&self, shaper: &Expr, arg: &Expr) -> QueryResult<()> {
        let current = structural_shaper(shaper).ok_or_else(|| {
            QueryError::translation_failed_because(
                format!("Include({})", arg),
                "the current result is not an entity",
            )
        })?;

        let mut entity = current.entity_type.clone();
        for name in include_path(arg)? {
            let navigation = self.model.find_navigation(&entity, &name).ok_or_else(|| {
                QueryError::translation_failed_because(
                    format!("{}.{}", entity, name),
                    "no such navigation",
                )
            })?;
            if !navigation.embedded {
                return Err(QueryError::unsupported_include(entity.as_str(), name.as_str()));
            }
            entity = navigation.target.clone();
        }
        Ok(())
    }

    fn bind_options(&self, shaped: &ShapedQuery, options: &Expr) -> QueryResult<Expr> {
        match options {
            Expr::New { type_name, args } if type_name == VECTOR_OPTIONS_TYPE => {
                let args = args
                    .iter()
                    .map(|arg| {
                        let expr = match (&arg.expr, arg.name.as_str()) {
                            (Expr::Lambda { .. }, "PreFilter") => {
                                self.bind_lambda(shaped, &arg.expr, true)?
                            }
                            (other, _) => other.clone(),
                        };
                        Ok(MemberArg::new(arg.name.clone(), expr))
                    })
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Expr::New {
                    type_name: type_name.clone(),
                    args,
                })
            }
            other => Ok(other.clone()),
        }
    }
}

/// Navigation names of an include argument: `x => x.A.B` or `"A.B"`.
fn include_path(arg: &Expr) -> QueryResult<Vec<SmolStr>> {
    match arg {
        Expr::Constant(Value::String(path)) => Ok(path.split('.').map(SmolStr::new).collect()),
        Expr::Lambda { params, body } if params.len() == 1 => {
            let mut names = vec![];
            let mut current: &Expr = body;
            loop {
                match current {
                    Expr::Parameter(name) if *name == params[0] => break,
                    _ => match member_access(current) {
                        Some((target, name)) => {
                            names.push(SmolStr::new(name));
                            current = target;
                        }
                        None => {
                            return Err(QueryError::translation_failed_because(
                                arg,
                                "include paths must be navigation member chains",
                            ));
                        }
                    },
                }
            }
            names.reverse();
            Ok(names)
        }
        other => Err(QueryError::translation_failed_because(
            other,
            "include paths must be navigation member chains",
        )),
    }
}
