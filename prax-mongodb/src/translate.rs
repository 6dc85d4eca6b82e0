//! Translation of captured queries into aggregation pipelines.
//!
//! [`EfToNativeTranslator`] walks the operators recorded on a
//! [`MongoQueryExpression`] in order and emits one or more stages for each.
//! Runtime parameters are substituted here, so the same captured query can
//! be translated once per execution with different values.
//!
//! Predicates become plain match documents when every comparison is
//! between a stored field and a value; anything else is compiled to an
//! aggregation expression under `$expr`.

use bson::{Bson, Document, doc};
use prax_model::{ID_ELEMENT, Model, ScalarKind};
use prax_query::eval::evaluate;
use prax_query::expr::{
    BinaryOp, EntityProjection, Expr, Method, ObjectArrayProjection, UnaryOp, contains, dotted,
};
use prax_query::projection::{MemberResolution, SCORE_FIELD, member_access, resolve_member};
use prax_query::query_expression::SCALAR_ALIAS;
use prax_query::shaper::shaper_type;
use prax_query::{
    MongoQueryExpression, QueryContext, QueryError, QueryOperation, QueryOperator, QueryResult,
    ResultCardinality, TypeRef, Value, VectorQueryOptions,
};
use smol_str::SmolStr;
use tracing::{debug, trace, warn};

use crate::codec::{Codec, value_to_bson};
use crate::diagnostics::QueryLogger;
use crate::filter::{FilterBuilder, escape_regex};
use crate::pipeline::{Pipeline, accumulators, stages};

/// Prefix of fields holding computed sort keys.
const SORT_KEY_PREFIX: &str = "__sort";

/// The vector index and field a query searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorSearchTarget {
    /// Index used.
    pub index_name: SmolStr,
    /// Dotted element path of the vector field.
    pub path: String,
}

/// A query ready to be sent to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    /// Collection to aggregate.
    pub collection: SmolStr,
    /// Aggregation stages.
    pub pipeline: Vec<Document>,
    /// How each result document is encoded.
    pub element_codec: Codec,
    /// How many results the caller expects.
    pub cardinality: ResultCardinality,
    /// The terminal operator, if any.
    pub result_operator: Option<QueryOperator>,
    /// Set when the pipeline starts with a vector search.
    pub vector_search: Option<VectorSearchTarget>,
}

/// A document location an expression refers to.
#[derive(Debug, Clone)]
enum Reference {
    Field { path: Vec<SmolStr>, codec: Codec },
    Entity(EntityProjection),
    Array(ObjectArrayProjection),
}

impl Reference {
    fn path(&self) -> &[SmolStr] {
        match self {
            Self::Field { path, .. } => path,
            Self::Entity(p) => &p.path,
            Self::Array(p) => &p.path,
        }
    }

    fn codec(&self) -> Codec {
        match self {
            Self::Field { codec, .. } => codec.clone(),
            Self::Entity(p) => Codec::Entity(p.entity_type.clone()),
            Self::Array(p) => Codec::Array(Box::new(Codec::Entity(p.entity_type.clone()))),
        }
    }
}

#[derive(Debug, Default)]
struct SortSpec {
    keys: Document,
    computed: Document,
}

/// Per-translation state.
struct State<'q> {
    query: &'q MongoQueryExpression,
    pipeline: Pipeline,
    pending_sort: Option<SortSpec>,
    last_sort: Option<Document>,
    computed_keys: usize,
    /// Documents have been replaced by their distinct projection.
    distinct: bool,
    of_type: Option<SmolStr>,
    vector_search: Option<VectorSearchTarget>,
}

impl<'q> State<'q> {
    fn new(query: &'q MongoQueryExpression) -> Self {
        Self {
            query,
            pipeline: Pipeline::new(),
            pending_sort: None,
            last_sort: None,
            computed_keys: 0,
            distinct: false,
            of_type: None,
            vector_search: None,
        }
    }

    fn push_match(&mut self, filter: Document) {
        if !filter.is_empty() {
            self.pipeline.push(stages::match_stage(filter));
        }
    }

    fn flush_sort(&mut self) {
        if let Some(sort) = self.pending_sort.take() {
            if !sort.computed.is_empty() {
                self.pipeline.push(stages::add_fields(sort.computed));
            }
            self.pipeline.push(stages::sort(sort.keys.clone()));
            self.last_sort = Some(sort.keys);
        }
    }
}

/// Translates captured queries into native aggregation pipelines.
///
/// # Example
///
/// ```rust
/// use bson::doc;
/// use prax_model::{ModelBuilder, ScalarKind};
/// use prax_mongodb::diagnostics::TracingQueryLogger;
/// use prax_mongodb::EfToNativeTranslator;
/// use prax_query::{Expr, QueryBuilder, QueryContext, QueryableMethodCapture};
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
///     .build();
/// let shaped = QueryableMethodCapture::new(&model).translate(&query).unwrap();
///
/// let context = QueryContext::default();
/// let native = EfToNativeTranslator::new(&model, &context, &TracingQueryLogger)
///     .translate(&shaped.query)
///     .unwrap();
/// assert_eq!(native.pipeline, vec![doc! { "$match": { "Year": { "$gt": 2000 } } }]);
/// ```
pub struct EfToNativeTranslator<'a> {
    model: &'a Model,
    context: &'a QueryContext,
    logger: &'a dyn QueryLogger,
}

impl<'a> EfToNativeTranslator<'a> {
    /// Create a translator for one execution.
    pub fn new(model: &'a Model, context: &'a QueryContext, logger: &'a dyn QueryLogger) -> Self {
        Self {
            model,
            context,
            logger,
        }
    }

    /// Translate a captured query.
    pub fn translate(&self, query: &MongoQueryExpression) -> QueryResult<NativeQuery> {
        let mut state = State::new(query);

        for (position, operation) in query.operations.iter().enumerate() {
            trace!(operator = %operation.operator, position, "Translating operator");
            let keeps_sort = matches!(
                operation.operator,
                QueryOperator::OrderBy
                    | QueryOperator::OrderByDescending
                    | QueryOperator::ThenBy
                    | QueryOperator::ThenByDescending
                    | QueryOperator::Last
                    | QueryOperator::LastOrDefault
            );
            if !keeps_sort {
                state.flush_sort();
            }
            self.operation(&mut state, position, operation)?;
        }
        state.flush_sort();
        self.final_projection(&mut state)?;

        let element_codec = self.element_codec(&state);
        let pipeline = state.pipeline.into_stages();
        debug!(
            collection = %query.collection,
            stages = pipeline.len(),
            cardinality = ?query.cardinality,
            "Query translated"
        );
        self.logger.query_compiled(&query.collection, &pipeline);

        Ok(NativeQuery {
            collection: query.collection.clone(),
            pipeline,
            element_codec,
            cardinality: query.cardinality,
            result_operator: query.result_operator.clone(),
            vector_search: state.vector_search,
        })
    }

    fn operation(&self, state: &mut State<'_>, position: usize, operation: &QueryOperation) -> QueryResult<()> {
        let op = &operation.operator;
        let args = operation.args.as_slice();

        match op {
            QueryOperator::Where => {
                let filter = self.filter(state, arg(op, args, 0)?)?;
                state.push_match(filter);
            }
            QueryOperator::Select | QueryOperator::Include => {}
            QueryOperator::OrderBy | QueryOperator::OrderByDescending => {
                state.pending_sort = Some(SortSpec::default());
                self.sort_key(state, arg(op, args, 0)?, *op == QueryOperator::OrderBy)?;
            }
            QueryOperator::ThenBy | QueryOperator::ThenByDescending => {
                if state.pending_sort.is_none() {
                    return Err(QueryError::translation_failed_because(
                        op,
                        "it must directly follow an ordering",
                    ));
                }
                self.sort_key(state, arg(op, args, 0)?, *op == QueryOperator::ThenBy)?;
            }
            QueryOperator::Skip => {
                // A negative skip skips nothing.
                let n = self.count(arg(op, args, 0)?)?;
                if n > 0 {
                    state.pipeline.push(stages::skip(n));
                }
            }
            QueryOperator::Take => {
                let n = self.count(arg(op, args, 0)?)?;
                if n > 0 {
                    state.pipeline.push(stages::limit(n));
                } else {
                    state.pipeline.push(stages::match_none());
                }
            }
            QueryOperator::Distinct => self.distinct(state)?,
            QueryOperator::OfType => match arg(op, args, 0)? {
                Expr::Constant(Value::String(target)) => self.of_type(state, target)?,
                other => {
                    return Err(QueryError::translation_failed_because(
                        other,
                        "OfType expects a type name",
                    ));
                }
            },
            QueryOperator::VectorSearch => {
                if position != 0 {
                    return Err(QueryError::translation_failed_because(
                        op,
                        "vector search must be the first operator of the query",
                    ));
                }
                self.vector_search(state, args)?;
            }
            QueryOperator::First | QueryOperator::FirstOrDefault => {
                self.optional_predicate(state, args)?;
                state.pipeline.push(stages::limit(1));
            }
            QueryOperator::Single | QueryOperator::SingleOrDefault => {
                self.optional_predicate(state, args)?;
                state.pipeline.push(stages::limit(2));
            }
            QueryOperator::Last | QueryOperator::LastOrDefault => {
                self.optional_predicate(state, args)?;
                match state.pending_sort.as_mut() {
                    Some(sort) => {
                        sort.keys = reversed(&sort.keys);
                        state.flush_sort();
                    }
                    None => match &state.last_sort {
                        Some(keys) => {
                            let keys = reversed(keys);
                            state.pipeline.push(stages::sort(keys));
                        }
                        None => {
                            return Err(QueryError::translation_failed_because(
                                op,
                                "the query has no ordering to take the last element of",
                            ));
                        }
                    },
                }
                state.pipeline.push(stages::limit(1));
            }
            QueryOperator::ElementAt | QueryOperator::ElementAtOrDefault => {
                let n = self.count(arg(op, args, 0)?)?;
                if n < 0 {
                    if *op == QueryOperator::ElementAt {
                        return Err(QueryError::translation_failed_because(
                            op,
                            format!("the index {} is negative", n),
                        ));
                    }
                    state.pipeline.push(stages::match_none());
                    return Ok(());
                }
                if n > 0 {
                    state.pipeline.push(stages::skip(n));
                }
                state.pipeline.push(stages::limit(1));
            }
            QueryOperator::Count | QueryOperator::LongCount => {
                self.optional_predicate(state, args)?;
                state.pipeline.push(stages::count(SCALAR_ALIAS));
            }
            QueryOperator::Any => {
                self.optional_predicate(state, args)?;
                self.exists_result(state, true);
            }
            QueryOperator::All => {
                let filter = self.filter(state, arg(op, args, 0)?)?;
                state.push_match(doc! { "$nor": [filter] });
                self.exists_result(state, false);
            }
            QueryOperator::Contains => {
                let element = arg(op, args, 0)?;
                if matches!(self.reference(element)?, Some(Reference::Entity(_) | Reference::Array(_))) {
                    return Err(QueryError::translation_failed_because(
                        op,
                        "Contains is only supported on sequences of scalar values",
                    ));
                }
                let predicate = element.clone().eq(arg(op, args, 1)?.clone());
                let filter = self.filter(state, &predicate)?;
                state.push_match(filter);
                self.exists_result(state, true);
            }
            QueryOperator::Sum | QueryOperator::Average | QueryOperator::Min | QueryOperator::Max => {
                let selector = self.agg(state, arg(op, args, 0)?)?;
                let accumulator = match op {
                    QueryOperator::Sum => accumulators::sum(selector),
                    QueryOperator::Average => accumulators::avg(selector),
                    QueryOperator::Min => accumulators::min(selector),
                    _ => accumulators::max(selector),
                };
                state
                    .pipeline
                    .push(stages::group(Bson::Null, doc! { SCALAR_ALIAS: accumulator }));
            }
            QueryOperator::Unsupported(name) => return Err(QueryError::translation_failed(name)),
        }
        Ok(())
    }

    fn optional_predicate(&self, state: &mut State<'_>, args: &[Expr]) -> QueryResult<()> {
        if let Some(predicate) = args.first() {
            let filter = self.filter(state, predicate)?;
            state.push_match(filter);
        }
        Ok(())
    }

    /// `$limit 1` and a `_v` flag telling whether a document survived.
    fn exists_result(&self, state: &mut State<'_>, flag: bool) {
        state.pipeline.push(stages::limit(1));
        state.pipeline.push(stages::project(
            doc! { ID_ELEMENT: 0, SCALAR_ALIAS: { "$literal": flag } },
        ));
    }

    fn count(&self, expr: &Expr) -> QueryResult<i64> {
        match self.constant(expr)? {
            Some(value) => value.as_i64().ok_or_else(|| {
                QueryError::invalid_data_type(format!(
                    "Expected an integer count, got {}",
                    value.type_name()
                ))
            }),
            None => Err(QueryError::translation_failed_because(
                expr,
                "the count must not depend on the document",
            )),
        }
    }

    fn sort_key(&self, state: &mut State<'_>, key: &Expr, ascending: bool) -> QueryResult<()> {
        let direction = if ascending { 1 } else { -1 };
        let (field, computed) = match self.reference(key)? {
            Some(reference) if !reference.path().is_empty() => {
                (self.wire_path(state, reference.path())?, None)
            }
            _ => {
                let name = format!("{}{}", SORT_KEY_PREFIX, state.computed_keys);
                let expr = self.agg(state, key)?;
                (name, Some(expr))
            }
        };
        if computed.is_some() {
            state.computed_keys += 1;
        }
        let sort = state.pending_sort.get_or_insert_with(SortSpec::default);
        if let Some(expr) = computed {
            sort.computed.insert(field.clone(), expr);
        }
        sort.keys.insert(field, direction);
        Ok(())
    }

    fn distinct(&self, state: &mut State<'_>) -> QueryResult<()> {
        let id = if state.query.is_identity_projection() {
            Bson::String("$$ROOT".to_string())
        } else {
            Bson::Document(self.projection_document(state)?)
        };
        state.pipeline.push(stages::group(id, Document::new()));
        state.pipeline.push(stages::replace_root("$_id"));
        state.distinct = true;
        Ok(())
    }

    fn of_type(&self, state: &mut State<'_>, target: &str) -> QueryResult<()> {
        let construct = format!("OfType<{}>", target);
        let element = self
            .model
            .hierarchy_root(target)
            .and_then(|root| root.discriminator.as_ref())
            .map(|d| d.element_name.clone())
            .ok_or_else(|| {
                QueryError::translation_failed_because(&construct, "the hierarchy has no discriminator")
            })?;
        let values: Vec<Bson> = self
            .model
            .derived_types(target)
            .iter()
            .filter_map(|ty| ty.discriminator.as_ref())
            .map(|d| Bson::String(d.value.to_string()))
            .collect();
        let path = self.wire_path(state, &[element])?;
        state.push_match(FilterBuilder::new().in_array(&path, values).build());
        state.of_type = Some(SmolStr::new(target));
        Ok(())
    }

    fn vector_search(&self, state: &mut State<'_>, args: &[Expr]) -> QueryResult<()> {
        let [selector, vector, limit, options] = args else {
            return Err(QueryError::translation_failed_because(
                QueryOperator::VectorSearch,
                "expected a selector, a vector, a limit and options",
            ));
        };

        let options = VectorQueryOptions::from_expr(options, Some(&self.context.parameters))?;
        options.validate()?;

        let Some(Reference::Field { path, .. }) = self.reference(selector)? else {
            return Err(QueryError::translation_failed_because(
                selector,
                "the vector selector must be a mapped property",
            ));
        };
        let property_path = property_path(selector);
        let property_display = dotted(&property_path);
        let entity = state.query.entity_type.as_str();

        let index_name = match &options.index_name {
            Some(name) => {
                if self.model.vector_index_named(entity, name).is_none() {
                    warn!(entity, index = %name, "Vector index not defined in the model");
                    self.logger
                        .vector_index_not_defined(entity, name, &property_display);
                }
                name.clone()
            }
            None => match self.model.vector_indexes(entity, &property_path).as_slice() {
                [] => return Err(QueryError::missing_vector_index(entity, property_display)),
                [index] => index.name.clone(),
                several => {
                    let names: Vec<&str> = several.iter().map(|i| i.name.as_str()).collect();
                    return Err(QueryError::ambiguous_vector_index(
                        entity,
                        property_display,
                        &names,
                    ));
                }
            },
        };

        let query_vector = Codec::scalar(ScalarKind::Vector)
            .encode(&evaluate(vector, Some(&self.context.parameters))?)?;
        let limit = self.count(limit)?;
        let wire_path = dotted(&path);

        let mut body = doc! {
            "index": index_name.as_str(),
            "path": wire_path.as_str(),
            "queryVector": query_vector,
            "limit": limit,
        };
        if options.exact {
            body.insert("exact", true);
        } else {
            let candidates = options
                .number_of_candidates
                .unwrap_or_else(|| limit.saturating_mul(10));
            body.insert("numCandidates", candidates);
        }
        if let Some(pre_filter) = &options.pre_filter {
            if matches!(pre_filter, Expr::Lambda { .. }) {
                return Err(QueryError::translation_failed_because(
                    pre_filter,
                    "the pre-filter was not bound to the searched documents",
                ));
            }
            body.insert("filter", self.filter(state, pre_filter)?);
        }

        state.pipeline.push(stages::vector_search(body));
        state
            .pipeline
            .push(stages::add_fields(doc! { SCORE_FIELD: stages::vector_search_score() }));
        state.vector_search = Some(VectorSearchTarget {
            index_name,
            path: wire_path,
        });
        Ok(())
    }

    fn final_projection(&self, state: &mut State<'_>) -> QueryResult<()> {
        let query = state.query;
        let scalar = query
            .result_operator
            .as_ref()
            .is_some_and(QueryOperator::is_scalar_aggregate);
        if query.is_identity_projection() || query.is_distinct || scalar {
            return Ok(());
        }
        let mut projection = self.projection_document(state)?;
        if !projection.contains_key(ID_ELEMENT) {
            projection.insert(ID_ELEMENT, 0);
        }
        state.pipeline.push(stages::project(projection));
        Ok(())
    }

    /// `{ alias: value }` for every projection entry.
    fn projection_document(&self, state: &State<'_>) -> QueryResult<Document> {
        let mut projection = Document::new();
        for entry in state.query.projection() {
            let value = match self.agg(state, &entry.expr)? {
                // Bare numbers and booleans are inclusion flags in `$project`.
                value @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_)) => {
                    Bson::Document(doc! { "$literal": value })
                }
                value => value,
            };
            projection.insert(entry.alias.as_str(), value);
        }
        Ok(projection)
    }

    fn element_codec(&self, state: &State<'_>) -> Codec {
        let query = state.query;
        let projection = query.projection();
        let scalar = query
            .result_operator
            .as_ref()
            .is_some_and(QueryOperator::is_scalar_aggregate);
        if scalar || matches!(projection, [entry] if entry.alias == SCALAR_ALIAS) {
            return match projection.first().map(|e| &e.expr) {
                Some(Expr::Field(field)) => Codec::for_type(&field.ty),
                Some(other) => Codec::for_type(&shaper_type(other)),
                None => Codec::Raw,
            };
        }
        if query.is_identity_projection() {
            return Codec::Entity(
                state
                    .of_type
                    .clone()
                    .unwrap_or_else(|| query.entity_type.clone()),
            );
        }
        Codec::Document
    }

    // ---------------------------------------------------------------------
    // References and values
    // ---------------------------------------------------------------------

    /// The document location `expr` reads, if it is a plain reference.
    fn reference(&self, expr: &Expr) -> QueryResult<Option<Reference>> {
        Ok(match expr {
            Expr::Field(field) => Some(Reference::Field {
                path: field.path.clone(),
                codec: Codec::for_type(&field.ty),
            }),
            Expr::EntityProjection(p) => Some(Reference::Entity(p.clone())),
            Expr::ObjectArray(p) => Some(Reference::Array(p.clone())),
            Expr::Call {
                method: Method::VectorSearchScore,
                ..
            } => Some(Reference::Field {
                path: vec![SmolStr::new(SCORE_FIELD)],
                codec: Codec::scalar(ScalarKind::Double),
            }),
            _ => match member_access(expr) {
                Some((target, name)) => match self.reference(target)? {
                    Some(Reference::Entity(owner)) => Some(self.member(&owner, name, expr)?),
                    _ => None,
                },
                None => None,
            },
        })
    }

    fn member(&self, owner: &EntityProjection, name: &str, expr: &Expr) -> QueryResult<Reference> {
        match resolve_member(self.model, owner, name) {
            MemberResolution::Field(field) => Ok(Reference::Field {
                codec: Codec::for_type(&field.ty),
                path: field.path,
            }),
            MemberResolution::Entity(p) => Ok(Reference::Entity(p)),
            MemberResolution::Array(p) => Ok(Reference::Array(p)),
            MemberResolution::NotEmbedded => Err(QueryError::translation_failed_because(
                expr,
                "the navigation targets another collection",
            )),
            MemberResolution::Unstored => Err(QueryError::translation_failed_because(
                expr,
                "the property is not stored in the document",
            )),
            MemberResolution::Unknown => {
                debug!(
                    entity = %owner.entity_type,
                    member = name,
                    "Unmapped member, using its name as the element name"
                );
                let mut path = owner.path.clone();
                path.push(SmolStr::new(name));
                Ok(Reference::Field {
                    path,
                    codec: Codec::Raw,
                })
            }
        }
    }

    /// Evaluate `expr` if it depends on nothing but constants and parameters.
    fn constant(&self, expr: &Expr) -> QueryResult<Option<Value>> {
        if !is_runtime_constant(expr) {
            return Ok(None);
        }
        evaluate(expr, Some(&self.context.parameters)).map(Some)
    }

    /// Element path of a reference in the documents flowing through the
    /// pipeline at this point.
    fn wire_path(&self, state: &State<'_>, path: &[SmolStr]) -> QueryResult<String> {
        if !state.distinct || state.query.is_identity_projection() {
            return Ok(dotted(path));
        }

        let mut best: Option<(usize, &SmolStr)> = None;
        for entry in state.query.projection() {
            let (origin, exact) = match &entry.expr {
                Expr::Field(f) => (&f.path, true),
                Expr::EntityProjection(p) => (&p.path, false),
                Expr::ObjectArray(p) => (&p.path, false),
                _ => continue,
            };
            let matches = if exact {
                origin.as_slice() == path
            } else {
                path.starts_with(origin)
            };
            if matches && best.is_none_or(|(len, _)| origin.len() > len) {
                best = Some((origin.len(), &entry.alias));
            }
        }

        match best {
            Some((len, alias)) => {
                let mut remapped = vec![alias.clone()];
                remapped.extend_from_slice(&path[len..]);
                Ok(dotted(&remapped))
            }
            None => Err(QueryError::translation_failed_because(
                dotted(path),
                "the field is not part of the distinct projection",
            )),
        }
    }

    fn field_ref(&self, state: &State<'_>, path: &[SmolStr]) -> QueryResult<String> {
        if path.is_empty() {
            return Ok("$$ROOT".to_string());
        }
        Ok(format!("${}", self.wire_path(state, path)?))
    }

    // ---------------------------------------------------------------------
    // Match documents
    // ---------------------------------------------------------------------

    /// Compile a predicate into a match filter.
    fn filter(&self, state: &State<'_>, predicate: &Expr) -> QueryResult<Document> {
        match self.match_document(state, predicate)? {
            Some(filter) => Ok(filter),
            None => Ok(doc! { "$expr": self.agg(state, predicate)? }),
        }
    }

    fn match_document(&self, state: &State<'_>, expr: &Expr) -> QueryResult<Option<Document>> {
        match expr {
            Expr::Binary {
                op: BinaryOp::AndAlso,
                left,
                right,
            } => {
                let left = self.filter(state, left)?;
                let right = self.filter(state, right)?;
                Ok(Some(FilterBuilder::from_doc(left).merge(right).build()))
            }
            Expr::Binary {
                op: BinaryOp::OrElse,
                left,
                right,
            } => Ok(Some(
                FilterBuilder::new()
                    .or(vec![self.filter(state, left)?, self.filter(state, right)?])
                    .build(),
            )),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => Ok(Some(
                FilterBuilder::new()
                    .nor(vec![self.filter(state, operand)?])
                    .build(),
            )),
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.comparison(state, *op, left, right)
            }
            Expr::Call {
                method: Method::ObjectEquals,
                args,
            } if args.len() == 2 => self.comparison(state, BinaryOp::Equal, &args[0], &args[1]),
            Expr::Call {
                method: method @ (Method::StartsWith | Method::EndsWith | Method::StringContains),
                args,
            } if args.len() == 2 => {
                let Some(Reference::Field { path, .. }) = self.reference(&args[0])? else {
                    return Ok(None);
                };
                let Some(Value::String(literal)) = self.constant(&args[1])? else {
                    return Ok(None);
                };
                let escaped = escape_regex(&literal);
                let pattern = match method {
                    Method::StartsWith => format!("^{}", escaped),
                    Method::EndsWith => format!("{}$", escaped),
                    _ => escaped,
                };
                let path = self.wire_path(state, &path)?;
                Ok(Some(FilterBuilder::new().regex(&path, &pattern).build()))
            }
            Expr::Call {
                method: Method::ListContains,
                args,
            } if args.len() == 2 => {
                let (list, item) = (&args[0], &args[1]);
                if let (Some(Value::List(values)), Some(reference)) =
                    (self.constant(list)?, self.reference(item)?)
                {
                    if reference.path().is_empty() {
                        return Ok(None);
                    }
                    let codec = reference.codec();
                    let values = values
                        .iter()
                        .map(|v| codec.encode(v))
                        .collect::<QueryResult<Vec<_>>>()?;
                    let path = self.wire_path(state, reference.path())?;
                    return Ok(Some(FilterBuilder::new().in_array(&path, values).build()));
                }
                if let (Some(reference), Some(value)) = (self.reference(list)?, self.constant(item)?) {
                    if reference.path().is_empty() {
                        return Ok(None);
                    }
                    let value = match reference.codec() {
                        Codec::Array(element) => element.encode(&value)?,
                        Codec::Scalar {
                            kind: ScalarKind::Vector,
                            ..
                        } => Codec::scalar(ScalarKind::Double).encode(&value)?,
                        _ => value_to_bson(&value)?,
                    };
                    let path = self.wire_path(state, reference.path())?;
                    return Ok(Some(FilterBuilder::new().eq(&path, value).build()));
                }
                Ok(None)
            }
            Expr::Constant(Value::Bool(true)) => Ok(Some(Document::new())),
            _ => match self.reference(expr)? {
                Some(Reference::Field { path, codec })
                    if !path.is_empty() && codec.scalar_kind() == Some(ScalarKind::Bool) =>
                {
                    let path = self.wire_path(state, &path)?;
                    Ok(Some(FilterBuilder::new().eq(&path, true).build()))
                }
                _ => Ok(None),
            },
        }
    }

    fn comparison(
        &self,
        state: &State<'_>,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> QueryResult<Option<Document>> {
        let (reference, value, op) = match (self.reference(left)?, self.reference(right)?) {
            (Some(reference), None) => match self.constant(right)? {
                Some(value) => (reference, value, op),
                None => return Ok(None),
            },
            (None, Some(reference)) => match self.constant(left)? {
                Some(value) => (reference, value, op.flip()),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        if reference.path().is_empty() {
            return Ok(None);
        }

        let path = self.wire_path(state, reference.path())?;
        let value = reference.codec().encode(&value)?;
        let filter = FilterBuilder::new();
        let filter = match op {
            BinaryOp::Equal => filter.eq(&path, value),
            BinaryOp::NotEqual => filter.ne(&path, value),
            BinaryOp::LessThan => filter.lt(&path, value),
            BinaryOp::LessThanOrEqual => filter.lte(&path, value),
            BinaryOp::GreaterThan => filter.gt(&path, value),
            BinaryOp::GreaterThanOrEqual => filter.gte(&path, value),
            _ => return Ok(None),
        };
        Ok(Some(filter.build()))
    }

    // ---------------------------------------------------------------------
    // Aggregation expressions
    // ---------------------------------------------------------------------

    /// Compile an expression into an aggregation expression.
    fn agg(&self, state: &State<'_>, expr: &Expr) -> QueryResult<Bson> {
        if let Some(value) = self.constant(expr)? {
            return literal(&value);
        }
        if let Some(reference) = self.reference(expr)? {
            return Ok(Bson::String(self.field_ref(state, reference.path())?));
        }

        match expr {
            Expr::Binary { op, left, right } => self.agg_binary(state, *op, left, right),
            Expr::Unary { op, operand } => {
                let value = self.agg(state, operand)?;
                Ok(match op {
                    UnaryOp::Not => Bson::Document(doc! { "$not": [value] }),
                    UnaryOp::Negate => Bson::Document(doc! { "$multiply": [value, -1] }),
                    UnaryOp::Convert(ScalarKind::Uuid | ScalarKind::Binary | ScalarKind::Vector) => value,
                    UnaryOp::Convert(kind) => Bson::Document(doc! {
                        "$convert": { "input": value, "to": kind.bson_alias() }
                    }),
                })
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Ok(Bson::Document(doc! {
                "$cond": [
                    self.agg(state, test)?,
                    self.agg(state, if_true)?,
                    self.agg(state, if_false)?,
                ]
            })),
            Expr::Call { method, args } => self.agg_call(state, expr, method, args),
            Expr::Member {
                expr: target,
                member,
            } => self.agg_member(state, expr, target, member),
            Expr::List(items) => Ok(Bson::Array(
                items
                    .iter()
                    .map(|item| self.agg(state, item))
                    .collect::<QueryResult<_>>()?,
            )),
            Expr::NotTranslated(construct) => Err(QueryError::translation_failed(construct)),
            other => Err(QueryError::translation_failed_because(
                other,
                "the expression has no server-side equivalent",
            )),
        }
    }

    /// Compile `expr`, encoding it with `other`'s codec when `expr` is a
    /// value and `other` a stored field.
    fn operand(&self, state: &State<'_>, expr: &Expr, other: &Expr) -> QueryResult<Bson> {
        if let (Some(value), Some(reference)) = (self.constant(expr)?, self.reference(other)?) {
            let encoded = reference.codec().encode(&value).or_else(|_| value_to_bson(&value))?;
            return Ok(wrap_literal(encoded));
        }
        self.agg(state, expr)
    }

    fn kind_of(&self, expr: &Expr) -> QueryResult<Option<ScalarKind>> {
        if let Some(reference) = self.reference(expr)? {
            return Ok(reference.codec().scalar_kind());
        }
        Ok(match expr {
            Expr::Constant(value) => TypeRef::of_value(value).scalar_kind(),
            other => shaper_type(other).scalar_kind(),
        })
    }

    fn agg_binary(&self, state: &State<'_>, op: BinaryOp, left: &Expr, right: &Expr) -> QueryResult<Bson> {
        let l = self.operand(state, left, right)?;
        let r = self.operand(state, right, left)?;
        let operator = match op {
            BinaryOp::Add => {
                let strings = self.kind_of(left)? == Some(ScalarKind::String)
                    || self.kind_of(right)? == Some(ScalarKind::String);
                if strings { "$concat" } else { "$add" }
            }
            BinaryOp::Subtract => "$subtract",
            BinaryOp::Multiply => "$multiply",
            BinaryOp::Divide => "$divide",
            BinaryOp::Modulo => "$mod",
            BinaryOp::Equal => "$eq",
            BinaryOp::NotEqual => "$ne",
            BinaryOp::LessThan => "$lt",
            BinaryOp::LessThanOrEqual => "$lte",
            BinaryOp::GreaterThan => "$gt",
            BinaryOp::GreaterThanOrEqual => "$gte",
            BinaryOp::AndAlso => "$and",
            BinaryOp::OrElse => "$or",
            BinaryOp::Coalesce => "$ifNull",
        };
        Ok(Bson::Document(doc! { operator: [l, r] }))
    }

    fn agg_call(&self, state: &State<'_>, expr: &Expr, method: &Method, args: &[Expr]) -> QueryResult<Bson> {
        let required = |index: usize| {
            args.get(index).ok_or_else(|| {
                QueryError::translation_failed_because(expr, format!("missing argument {}", index))
            })
        };

        match method {
            Method::ObjectEquals => self.agg_binary(state, BinaryOp::Equal, required(0)?, required(1)?),
            Method::StringContains | Method::StartsWith | Method::EndsWith => {
                let input = self.agg(state, required(0)?)?;
                if let Some(Value::String(literal)) = self.constant(required(1)?)? {
                    let escaped = escape_regex(&literal);
                    let regex = match method {
                        Method::StartsWith => format!("^{}", escaped),
                        Method::EndsWith => format!("{}$", escaped),
                        _ => escaped,
                    };
                    return Ok(Bson::Document(doc! {
                        "$regexMatch": { "input": input, "regex": regex }
                    }));
                }
                let sub = self.agg(state, required(1)?)?;
                let index = doc! { "$indexOfCP": [input, sub] };
                match method {
                    Method::StringContains => Ok(Bson::Document(doc! { "$gte": [index, 0] })),
                    Method::StartsWith => Ok(Bson::Document(doc! { "$eq": [index, 0] })),
                    _ => Err(QueryError::translation_failed_because(
                        expr,
                        "EndsWith needs a constant suffix",
                    )),
                }
            }
            Method::ToLower => Ok(Bson::Document(doc! { "$toLower": self.agg(state, required(0)?)? })),
            Method::ToUpper => Ok(Bson::Document(doc! { "$toUpper": self.agg(state, required(0)?)? })),
            Method::ListContains => {
                let list = self.operand(state, required(0)?, required(1)?)?;
                let item = self.operand(state, required(1)?, required(0)?)?;
                Ok(Bson::Document(doc! { "$in": [item, list] }))
            }
            Method::MakeDateTime => {
                let mut parts = Document::new();
                for (index, name) in ["year", "month", "day", "hour", "minute", "second"]
                    .into_iter()
                    .enumerate()
                {
                    if let Some(part) = args.get(index) {
                        parts.insert(name, self.agg(state, part)?);
                    }
                }
                Ok(Bson::Document(doc! { "$dateFromParts": parts }))
            }
            Method::EfProperty | Method::VectorSearchScore | Method::Other(_) => Err(
                QueryError::translation_failed_because(expr, "the method cannot be translated"),
            ),
        }
    }

    fn agg_member(&self, state: &State<'_>, expr: &Expr, target: &Expr, member: &str) -> QueryResult<Bson> {
        let operator = match member {
            "Length" if self.kind_of(target)? == Some(ScalarKind::String) => "$strLenCP",
            "Length" | "Count" => "$size",
            "Year" => "$year",
            "Month" => "$month",
            "Day" => "$dayOfMonth",
            "Hour" => "$hour",
            "Minute" => "$minute",
            "Second" => "$second",
            _ => {
                return Err(QueryError::translation_failed_because(
                    expr,
                    "the member has no server-side equivalent",
                ));
            }
        };
        Ok(Bson::Document(doc! { operator: self.agg(state, target)? }))
    }
}

fn arg<'e>(op: &QueryOperator, args: &'e [Expr], index: usize) -> QueryResult<&'e Expr> {
    args.get(index).ok_or_else(|| {
        QueryError::translation_failed_because(op, format!("missing argument {}", index))
    })
}

/// Whether `expr` reads nothing from the document being filtered.
fn is_runtime_constant(expr: &Expr) -> bool {
    !contains(expr, |e| {
        matches!(
            e,
            Expr::Parameter(_)
                | Expr::Lambda { .. }
                | Expr::QueryRoot(_)
                | Expr::Query { .. }
                | Expr::Field(_)
                | Expr::EntityProjection(_)
                | Expr::ObjectArray(_)
                | Expr::ProjectionBinding(_)
                | Expr::StructuralShaper(_)
                | Expr::CollectionShaper(_)
                | Expr::Include(_)
                | Expr::Materialize(_)
                | Expr::ValueBufferRead(_)
                | Expr::NotTranslated(_)
                | Expr::Call {
                    method: Method::EfProperty | Method::VectorSearchScore | Method::Other(_),
                    ..
                }
        )
    })
}

fn wrap_literal(value: Bson) -> Bson {
    match value {
        Bson::String(ref s) if s.starts_with('$') => Bson::Document(doc! { "$literal": value }),
        Bson::Document(_) | Bson::Array(_) => Bson::Document(doc! { "$literal": value }),
        other => other,
    }
}

fn literal(value: &Value) -> QueryResult<Bson> {
    value_to_bson(value).map(wrap_literal)
}

fn reversed(keys: &Document) -> Document {
    keys.iter()
        .map(|(key, direction)| {
            let direction = match direction {
                Bson::Int32(d) => Bson::Int32(-d),
                Bson::Int64(d) => Bson::Int64(-d),
                other => other.clone(),
            };
            (key.clone(), direction)
        })
        .collect()
}

/// Property names from the searched document to the selected property.
fn property_path(selector: &Expr) -> Vec<SmolStr> {
    let mut names = vec![];
    let mut current = selector;
    while let Some((target, name)) = member_access(current) {
        names.push(SmolStr::new(name));
        current = target;
    }
    if names.is_empty() {
        if let Expr::Field(field) = selector {
            names.extend(field.property.clone());
        }
    }
    names.reverse();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{EventId, RecordingQueryLogger};
    use prax_model::{ModelBuilder, Similarity};
    use prax_query::{ErrorCode, ParameterValues, QueryBuilder, QueryableMethodCapture};
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        ModelBuilder::new()
            .entity("Movie", |e| {
                e.collection("movies")
                    .property("Id", ScalarKind::ObjectId)
                    .property("Title", ScalarKind::String)
                    .property("Year", ScalarKind::Int32)
                    .optional("Rating", ScalarKind::Double)
                    .property("Embedding", ScalarKind::Vector)
                    .property("PlotEmbedding", ScalarKind::Vector)
                    .property("PosterEmbedding", ScalarKind::Vector)
                    .key(["Id"])
                    .discriminator("Kind", "Movie")
                    .default_vector_index(["Embedding"], 3, Similarity::Cosine)
                    .vector_index("plots", ["PlotEmbedding"], 3, Similarity::Cosine)
                    .vector_index("plots_euclid", ["PlotEmbedding"], 3, Similarity::Euclidean)
                    .owns_one("Info", "MovieInfo", |i| {
                        i.property("Studio", ScalarKind::String);
                    });
            })
            .entity("Documentary", |e| {
                e.derives_from("Movie")
                    .discriminator("Kind", "Documentary")
                    .property("Topic", ScalarKind::String);
            })
            .entity("Ticket", |e| {
                e.collection("tickets")
                    .property("Region", ScalarKind::String)
                    .property("Number", ScalarKind::Int32)
                    .key(["Region", "Number"]);
            })
            .build()
            .unwrap()
    }

    fn m() -> Expr {
        Expr::param("m")
    }

    fn translate_with(model: &Model, query: &Expr, parameters: ParameterValues) -> QueryResult<NativeQuery> {
        let shaped = QueryableMethodCapture::new(model).translate(query)?;
        let context = QueryContext::new(parameters);
        let logger = RecordingQueryLogger::new();
        EfToNativeTranslator::new(model, &context, &logger).translate(&shaped.query)
    }

    fn translate(query: &Expr) -> QueryResult<NativeQuery> {
        translate_with(&model(), query, ParameterValues::new())
    }

    #[test]
    fn test_filter_order_take() {
        let query = QueryBuilder::root("Movie")
            .filter(Expr::lambda("m", m().member("Year").gt(Expr::constant(2000))))
            .order_by(Expr::lambda("m", m().member("Title")))
            .then_by_descending(Expr::lambda("m", m().member("Year")))
            .take(Expr::constant(5))
            .build();
        let native = translate(&query).unwrap();
        assert_eq!(
            native.pipeline,
            vec![
                doc! { "$match": { "Year": { "$gt": 2000 } } },
                doc! { "$sort": { "Title": 1, "Year": -1 } },
                doc! { "$limit": 5_i64 },
            ]
        );
        assert_eq!(native.collection, "movies");
        assert_eq!(native.element_codec, Codec::Entity("Movie".into()));
        assert_eq!(native.cardinality, ResultCardinality::Enumerable);
    }

    #[test]
    fn test_conjunction_merges_into_one_match() {
        let query = QueryBuilder::root("Movie")
            .filter(Expr::lambda(
                "m",
                m().member("Year")
                    .gte(Expr::constant(1990))
                    .and(m().member("Year").lt(Expr::constant(2000)))
                    .and(m().member("Title").starts_with(Expr::constant("The."))),
            ))
            .build();
        let native = translate(&query).unwrap();
        assert_eq!(
            native.pipeline,
            vec![doc! { "$match": {
                "Year": { "$gte": 1990, "$lt": 2000 },
                "Title": { "$regex": r"^The\." },
            } }]
        );
    }

    #[test]
    fn test_key_and_constant_conversion() {
        let hex = "5f1d7f3e9d3b2a0011223344";
        let query = QueryBuilder::root("Movie")
            .filter(Expr::lambda(
                "m",
                Expr::object_equals(m().member("Id"), Expr::constant(hex)),
            ))
            .build();
        let native = translate(&query).unwrap();
        let oid = bson::oid::ObjectId::parse_str(hex).unwrap();
        assert_eq!(native.pipeline, vec![doc! { "$match": { "_id": oid } }]);
    }

    #[test]
    fn test_composite_key_routes_through_id() {
        let query = QueryBuilder::root("Ticket")
            .filter(Expr::lambda(
                "t",
                Expr::ef_property(Expr::param("t"), "Number").eq(Expr::constant(7)),
            ))
            .build();
        let native = translate(&query).unwrap();
        assert_eq!(native.pipeline, vec![doc! { "$match": { "_id.Number": 7 } }]);
    }

    #[test]
    fn test_computed_predicate_uses_expr() {
        let query = QueryBuilder::root("Movie")
            .filter(Expr::lambda(
                "m",
                m().member("Year").add(Expr::constant(10)).gt(Expr::constant(2020)),
            ))
            .build();
        let native = translate(&query).unwrap();
        assert_eq!(
            native.pipeline,
            vec![doc! { "$match": { "$expr": { "$gt": [ { "$add": ["$Year", 10] }, 2020 ] } } }]
        );
    }

    #[test]
    fn test_parameters_are_substituted() {
        let query = QueryBuilder::root("Movie")
            .filter(Expr::lambda(
                "m",
                m().member("Year").gt(Expr::query_param(
                    "__year_0",
                    TypeRef::scalar(ScalarKind::Int32),
                )),
            ))
            .skip(Expr::query_param("__skip_1", TypeRef::scalar(ScalarKind::Int32)))
            .build();

        let native = translate_with(
            &model(),
            &query,
            ParameterValues::new().with("__year_0", 1999).with("__skip_1", 20),
        )
        .unwrap();
        assert_eq!(
            native.pipeline,
            vec![
                doc! { "$match": { "Year": { "$gt": 1999 } } },
                doc! { "$skip": 20_i64 },
            ]
        );

        let err = translate(&query).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingParameter);
    }

    #[test]
    fn test_select_projects_aliases() {
        let query = QueryBuilder::root("Movie")
            .select(Expr::lambda(
                "m",
                Expr::new_record(
                    "Summary",
                    [("Name", m().member("Title")), ("Studio", m().member("Info").member("Studio"))],
                ),
            ))
            .build();
        let native = translate(&query).unwrap();
        assert_eq!(
            native.pipeline,
            vec![doc! { "$project": { "Name": "$Title", "Studio": "$Info.Studio", "_id": 0 } }]
        );
        assert_eq!(native.element_codec, Codec::Document);
    }

    #[test]
    fn test_scalar_terminals() {
        let count = translate(&QueryBuilder::root("Movie").count()).unwrap();
        assert_eq!(count.pipeline, vec![doc! { "$count": "_v" }]);
        assert_eq!(count.element_codec, Codec::scalar(ScalarKind::Int32));
        assert_eq!(count.cardinality, ResultCardinality::Single);

        let any = translate(&QueryBuilder::root("Movie").any()).unwrap();
        assert_eq!(
            any.pipeline,
            vec![
                doc! { "$limit": 1_i64 },
                doc! { "$project": { "_id": 0, "_v": { "$literal": true } } },
            ]
        );

        let all = translate(
            &QueryBuilder::root("Movie")
                .all(Expr::lambda("m", m().member("Year").gt(Expr::constant(1900)))),
        )
        .unwrap();
        assert_eq!(
            all.pipeline[0],
            doc! { "$match": { "$nor": [ { "Year": { "$gt": 1900 } } ] } }
        );

        let sum = translate(
            &QueryBuilder::root("Movie").sum_by(Expr::lambda("m", m().member("Year"))),
        )
        .unwrap();
        assert_eq!(
            sum.pipeline,
            vec![doc! { "$group": { "_id": null, "_v": { "$sum": "$Year" } } }]
        );
    }

    #[test]
    fn test_element_operators() {
        let single = translate(&QueryBuilder::root("Movie").single()).unwrap();
        assert_eq!(single.pipeline, vec![doc! { "$limit": 2_i64 }]);

        let element = translate(&QueryBuilder::root("Movie").element_at(Expr::constant(3))).unwrap();
        assert_eq!(
            element.pipeline,
            vec![doc! { "$skip": 3_i64 }, doc! { "$limit": 1_i64 }]
        );
    }

    #[test]
    fn test_out_of_range_counts() {
        let err = translate(&QueryBuilder::root("Movie").element_at(Expr::constant(-1))).unwrap_err();
        assert_eq!(err.code, ErrorCode::TranslationFailed);

        let none = translate(
            &QueryBuilder::root("Movie").element_at_or_default(Expr::constant(-1)),
        )
        .unwrap();
        assert_eq!(none.pipeline, vec![doc! { "$match": { "$expr": false } }]);
        assert_eq!(none.cardinality, ResultCardinality::SingleOrDefault);

        let first = translate(&QueryBuilder::root("Movie").element_at(Expr::constant(0))).unwrap();
        assert_eq!(first.pipeline, vec![doc! { "$limit": 1_i64 }]);

        let skipped = translate(&QueryBuilder::root("Movie").skip(Expr::constant(-3)).build()).unwrap();
        assert!(skipped.pipeline.is_empty());

        for n in [0, -2] {
            let taken = translate(&QueryBuilder::root("Movie").take(Expr::constant(n)).build()).unwrap();
            assert_eq!(taken.pipeline, vec![doc! { "$match": { "$expr": false } }]);
        }
    }

    #[test]
    fn test_last_reverses_ordering() {
        let query = QueryBuilder::root("Movie")
            .order_by(Expr::lambda("m", m().member("Year")))
            .last();
        let native = translate(&query).unwrap();
        assert_eq!(
            native.pipeline,
            vec![doc! { "$sort": { "Year": -1 } }, doc! { "$limit": 1_i64 }]
        );

        let err = translate(&QueryBuilder::root("Movie").last()).unwrap_err();
        assert_eq!(err.code, ErrorCode::TranslationFailed);
    }

    #[test]
    fn test_computed_sort_key() {
        let query = QueryBuilder::root("Movie")
            .order_by(Expr::lambda("m", m().member("Title").member("Length")))
            .build();
        let native = translate(&query).unwrap();
        assert_eq!(
            native.pipeline,
            vec![
                doc! { "$addFields": { "__sort0": { "$strLenCP": "$Title" } } },
                doc! { "$sort": { "__sort0": 1 } },
            ]
        );
    }

    #[test]
    fn test_of_type_matches_discriminators() {
        let native = translate(&QueryBuilder::root("Movie").of_type("Documentary").build()).unwrap();
        assert_eq!(
            native.pipeline,
            vec![doc! { "$match": { "Kind": { "$in": ["Documentary"] } } }]
        );
        assert_eq!(native.element_codec, Codec::Entity("Documentary".into()));
    }

    #[test]
    fn test_distinct_remaps_fields() {
        let query = QueryBuilder::root("Movie")
            .select(Expr::lambda(
                "m",
                Expr::new_record("R", [("Name", m().member("Title"))]),
            ))
            .distinct()
            .filter(Expr::lambda(
                "r",
                Expr::param("r").member("Name").ne(Expr::null()),
            ))
            .build();
        let native = translate(&query).unwrap();
        assert_eq!(
            native.pipeline,
            vec![
                doc! { "$group": { "_id": { "Name": "$Title" } } },
                doc! { "$replaceRoot": { "newRoot": "$_id" } },
                doc! { "$match": { "Name": { "$ne": null } } },
            ]
        );
    }

    fn search(selector: &str, options: Option<VectorQueryOptions>) -> Expr {
        QueryBuilder::root("Movie")
            .vector_search(
                Expr::lambda("m", m().member(selector)),
                Expr::constant(vec![0.1f64, 0.2, 0.3]),
                Expr::constant(5),
                options,
            )
            .build()
    }

    #[test]
    fn test_vector_search_single_index() {
        let native = translate(&search("Embedding", None)).unwrap();
        assert_eq!(
            native.pipeline,
            vec![
                doc! { "$vectorSearch": {
                    "index": "EmbeddingVectorIndex",
                    "path": "Embedding",
                    "queryVector": [0.1, 0.2, 0.3],
                    "limit": 5_i64,
                    "numCandidates": 50_i64,
                } },
                doc! { "$addFields": { "__score": { "$meta": "vectorSearchScore" } } },
            ]
        );
        assert_eq!(
            native.vector_search,
            Some(VectorSearchTarget {
                index_name: "EmbeddingVectorIndex".into(),
                path: "Embedding".into(),
            })
        );
    }

    #[test]
    fn test_vector_search_index_resolution_errors() {
        let missing = translate(&search("PosterEmbedding", None)).unwrap_err();
        assert_eq!(missing.code, ErrorCode::MissingVectorIndex);

        let ambiguous = translate(&search("PlotEmbedding", None)).unwrap_err();
        assert_eq!(ambiguous.code, ErrorCode::AmbiguousVectorIndex);
        assert!(ambiguous.message.contains("plots_euclid"));

        let named = translate(&search("PlotEmbedding", Some(VectorQueryOptions::new().index("plots"))))
            .unwrap();
        assert_eq!(
            native_index(&named),
            "plots"
        );
    }

    fn native_index(native: &NativeQuery) -> &str {
        native.pipeline[0]
            .get_document("$vectorSearch")
            .unwrap()
            .get_str("index")
            .unwrap()
    }

    #[test]
    fn test_undeclared_index_warns_and_proceeds() {
        let model = model();
        let shaped = QueryableMethodCapture::new(&model)
            .translate(&search(
                "PosterEmbedding",
                Some(VectorQueryOptions::new().index("posters").exact()),
            ))
            .unwrap();
        let context = QueryContext::default();
        let logger = RecordingQueryLogger::new();
        let native = EfToNativeTranslator::new(&model, &context, &logger)
            .translate(&shaped.query)
            .unwrap();

        assert_eq!(native_index(&native), "posters");
        let body = native.pipeline[0].get_document("$vectorSearch").unwrap();
        assert_eq!(body.get_bool("exact").unwrap(), true);
        assert!(!body.contains_key("numCandidates"));
        assert_eq!(logger.events_of(EventId::VectorIndexNotDefined).len(), 1);
        assert_eq!(logger.events_of(EventId::QueryCompiled).len(), 1);
    }

    #[test]
    fn test_vector_options_conflict_before_stages() {
        let err = translate(&search(
            "Embedding",
            Some(VectorQueryOptions::new().exact().candidates(100)),
        ))
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConflictingVectorOptions);
    }

    #[test]
    fn test_vector_search_pre_filter_and_position() {
        let options = VectorQueryOptions::new().pre_filter(Expr::lambda(
            "m",
            m().member("Year").gte(Expr::constant(2000)),
        ));
        let native = translate(&search("Embedding", Some(options))).unwrap();
        let body = native.pipeline[0].get_document("$vectorSearch").unwrap();
        assert_eq!(
            body.get_document("filter").unwrap(),
            &doc! { "Year": { "$gte": 2000 } }
        );

        let late = QueryBuilder::from_expr(
            QueryBuilder::root("Movie")
                .filter(Expr::lambda("m", m().member("Year").gt(Expr::constant(1))))
                .build(),
        )
        .vector_search(
            Expr::lambda("m", m().member("Embedding")),
            Expr::constant(vec![0.1f64, 0.2, 0.3]),
            Expr::constant(5),
            None,
        )
        .build();
        let err = translate(&late).unwrap_err();
        assert_eq!(err.code, ErrorCode::TranslationFailed);
    }

    #[test]
    fn test_navigation_to_other_collection_fails() {
        let model = ModelBuilder::new()
            .entity("Movie", |e| {
                e.collection("movies")
                    .property("Id", ScalarKind::ObjectId)
                    .key(["Id"])
                    .reference("Studio", "Studio", prax_model::NavigationKind::Reference);
            })
            .entity("Studio", |e| {
                e.collection("studios")
                    .property("Id", ScalarKind::ObjectId)
                    .key(["Id"]);
            })
            .build()
            .unwrap();
        let query = QueryBuilder::root("Movie")
            .filter(Expr::lambda("m", m().member("Studio").eq(Expr::null())))
            .build();
        let err = translate_with(&model, &query, ParameterValues::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::TranslationFailed);
        assert!(err.message.contains("Studio"));
    }
}
