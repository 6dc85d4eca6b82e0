//! Compilation of shaper expressions into result-building closures.
//!
//! The compiler removes every projection binding and value-buffer read from
//! a shaper, replacing them with direct reads from the documents the
//! database returns. The result is a tree of closures built once per
//! compiled query and run once per result document.
//!
//! Two parent-linked chains mirror each other:
//!
//! * a compile-time [`Scope`] records which document a node reads from
//!   (the result document, an included sub-document or an array element)
//! * a run-time [`Frame`] holds the document itself, the ordinal of array
//!   elements and the entity that owns nested documents

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};
use indexmap::IndexMap;
use prax_model::{Model, PropertyStorage};
use prax_query::eval::{self, truthy};
use prax_query::expr::{
    BinaryOp, CollectionShaper, Expr, IncludeExpr, Materialize, Method, ProjectionBinding,
    ValueBuffer,
};
use prax_query::projection::SCORE_FIELD;
use prax_query::shaper::shaper_type;
use prax_query::{EntityId, MongoQueryExpression, QueryError, QueryResult, TypeRef, Value};
use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::codec::{Codec, document_to_value, lookup};
use crate::context::MaterializationContext;

/// Entry point of a compiled shaper.
pub type ShaperFn =
    Arc<dyn Fn(&mut MaterializationContext, &Document) -> QueryResult<Value> + Send + Sync>;

type Node = Arc<dyn Fn(&mut MaterializationContext, &Frame<'_>) -> QueryResult<Value> + Send + Sync>;

fn node<F>(f: F) -> Node
where
    F: Fn(&mut MaterializationContext, &Frame<'_>) -> QueryResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Run-time document context.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    document: Option<&'a Document>,
    ordinal: Option<usize>,
    owner: Option<EntityId>,
    parent: Option<&'a Frame<'a>>,
}

impl<'a> Frame<'a> {
    /// Frame of a result document.
    pub fn root(document: &'a Document) -> Self {
        Self {
            document: Some(document),
            ordinal: None,
            owner: None,
            parent: None,
        }
    }

    fn nested<'b>(
        &'b self,
        document: Option<&'b Document>,
        ordinal: Option<usize>,
        owner: Option<EntityId>,
    ) -> Frame<'b> {
        Frame {
            document,
            ordinal,
            owner,
            parent: Some(self),
        }
    }

    /// Document of this frame.
    pub fn document(&self) -> Option<&'a Document> {
        self.document
    }

    /// Position of the element in its array, for array elements.
    pub fn ordinal(&self) -> Option<usize> {
        self.ordinal
    }

    /// The result document at the root of the chain.
    pub fn result_document(&self) -> Option<&'a Document> {
        let mut frame = self;
        while let Some(parent) = frame.parent {
            frame = parent;
        }
        frame.document
    }

    /// Owning entities, nearest first.
    fn owners(&self) -> Vec<EntityId> {
        let mut owners = vec![];
        let mut current = Some(self);
        while let Some(frame) = current {
            owners.extend(frame.owner);
            current = frame.parent;
        }
        owners
    }
}

/// Compile-time document context.
#[derive(Debug, Clone)]
enum ScopeKind {
    /// The result document.
    Result,
    /// Related data of an include on the named entity type.
    Include(SmolStr),
    /// An element of an embedded array.
    Element,
}

#[derive(Debug, Clone)]
struct Scope<'s> {
    kind: ScopeKind,
    parent: Option<&'s Scope<'s>>,
}

impl<'s> Scope<'s> {
    fn root() -> Self {
        Self {
            kind: ScopeKind::Result,
            parent: None,
        }
    }

    fn child<'c>(&'c self, kind: ScopeKind) -> Scope<'c> {
        Scope {
            kind,
            parent: Some(self),
        }
    }

    /// Entity types owning the current document, nearest first.
    fn owners(&self) -> Vec<SmolStr> {
        let mut owners = vec![];
        let mut current = Some(self);
        while let Some(scope) = current {
            if let ScopeKind::Include(owner) = &scope.kind {
                owners.push(owner.clone());
            }
            current = scope.parent;
        }
        owners
    }
}

/// Where a compiled node finds its document.
#[derive(Debug, Clone)]
enum Buffer {
    /// A field of the result document; the document itself when `None`.
    Result(Option<SmolStr>),
    /// A sub-document of the enclosing document.
    Nested(SmolStr),
    /// The array element of the enclosing frame.
    Current,
}

impl Buffer {
    fn bson<'f>(&self, frame: &Frame<'f>) -> QueryResult<Option<&'f Bson>> {
        let (document, element) = match self {
            Self::Result(alias) => (frame.result_document(), alias.as_deref()),
            Self::Nested(element) => (frame.document(), Some(element.as_str())),
            Self::Current => return Ok(None),
        };
        let Some(document) = document else {
            return Ok(None);
        };
        Ok(element.and_then(|e| document.get(e)))
    }

    fn document<'f>(&self, frame: &Frame<'f>) -> QueryResult<Option<&'f Document>> {
        match self {
            Self::Result(None) => Ok(frame.result_document()),
            Self::Current => Ok(frame.document()),
            _ => match self.bson(frame)? {
                None | Some(Bson::Null | Bson::Undefined) => Ok(None),
                Some(Bson::Document(document)) => Ok(Some(document)),
                Some(other) => Err(QueryError::deserialization(format!(
                    "Expected a document at {}, found {:?}",
                    self,
                    other.element_type()
                ))),
            },
        }
    }

    fn array<'f>(&self, frame: &Frame<'f>) -> QueryResult<&'f [Bson]> {
        match self.bson(frame)? {
            None | Some(Bson::Null | Bson::Undefined) => Ok(&[]),
            Some(Bson::Array(items)) => Ok(items),
            Some(other) => Err(QueryError::deserialization(format!(
                "Expected an array at {}, found {:?}",
                self,
                other.element_type()
            ))),
        }
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result(None) => f.write_str("the result document"),
            Self::Result(Some(alias)) => write!(f, "result field '{}'", alias),
            Self::Nested(element) => write!(f, "element '{}'", element),
            Self::Current => f.write_str("the current array element"),
        }
    }
}

/// How one property of a materialized entity is read.
#[derive(Clone)]
enum Read {
    Element {
        path: Vec<SmolStr>,
        codec: Codec,
        default: Value,
    },
    Ordinal,
    OwnerKey {
        hops: Vec<SmolStr>,
        default: Value,
    },
    Computed(Node),
}

impl Read {
    fn run(&self, ctx: &mut MaterializationContext, frame: &Frame<'_>) -> QueryResult<Value> {
        match self {
            Self::Element {
                path,
                codec,
                default,
            } => match frame.document().and_then(|d| lookup(d, path)) {
                Some(bson) if !matches!(bson, Bson::Null | Bson::Undefined) => codec.decode(bson),
                _ => Ok(default.clone()),
            },
            Self::Ordinal => Ok(Value::Int32(
                frame.ordinal().map(|o| o as i32).unwrap_or_default(),
            )),
            Self::OwnerKey { hops, default } => {
                for (owner, principal) in frame.owners().into_iter().zip(hops) {
                    let value = ctx.entity(owner)?.property(principal);
                    if !value.is_null() {
                        return Ok(value.clone());
                    }
                }
                Ok(default.clone())
            }
            Self::Computed(node) => node(ctx, frame),
        }
    }
}

struct Variant {
    entity_type: SmolStr,
    discriminator: Option<SmolStr>,
    reads: Vec<(SmolStr, Read)>,
}

struct Include {
    navigation: SmolStr,
    related: Node,
}

/// A compiled shaper.
#[derive(Clone)]
pub struct CompiledShaper {
    shaper: ShaperFn,
    result_type: TypeRef,
}

impl CompiledShaper {
    /// Shape one result document.
    pub fn shape(&self, ctx: &mut MaterializationContext, document: &Document) -> QueryResult<Value> {
        (self.shaper)(ctx, document)
    }

    /// The compiled entry point.
    pub fn shaper(&self) -> &ShaperFn {
        &self.shaper
    }

    /// Static type of shaped values.
    pub fn result_type(&self) -> &TypeRef {
        &self.result_type
    }
}

impl fmt::Debug for CompiledShaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledShaper")
            .field("result_type", &self.result_type)
            .finish_non_exhaustive()
    }
}

/// Compiles shaper expressions against one query's projection.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use bson::doc;
/// use prax_model::{ModelBuilder, ScalarKind};
/// use prax_mongodb::{MaterializationContext, ShaperCompiler};
/// use prax_query::{inject_materializers, Expr, ParameterValues, QueryBuilder, QueryableMethodCapture, Value};
///
/// let model = ModelBuilder::new()
///     .entity("Movie", |e| {
///         e.collection("movies")
///             .property("Id", ScalarKind::Int32)
///             .property("Title", ScalarKind::String)
///             .key(["Id"]);
///     })
///     .build()
///     .unwrap();
///
/// let query = QueryBuilder::root("Movie")
///     .select(Expr::lambda("m", Expr::param("m").member("Title")))
///     .build();
/// let shaped = QueryableMethodCapture::new(&model).translate(&query).unwrap();
/// let shaper = inject_materializers(&model, shaped.shaper).unwrap();
/// let compiled = ShaperCompiler::new(&model, &shaped.query).compile(&shaper).unwrap();
///
/// let mut ctx = MaterializationContext::new(Arc::new(model), ParameterValues::new());
/// let value = compiled.shape(&mut ctx, &doc! { "_v": "Up" }).unwrap();
/// assert_eq!(value, Value::from("Up"));
/// ```
pub struct ShaperCompiler<'a> {
    model: &'a Model,
    query: &'a MongoQueryExpression,
}

impl<'a> ShaperCompiler<'a> {
    /// Create a compiler.
    pub fn new(model: &'a Model, query: &'a MongoQueryExpression) -> Self {
        Self { model, query }
    }

    /// Compile a shaper with materializers already injected.
    pub fn compile(&self, shaper: &Expr) -> QueryResult<CompiledShaper> {
        let root = self.node(shaper, &Scope::root())?;
        let result_type = shaper_type(shaper);
        debug!(entity = %self.query.entity_type, result = %result_type, "Shaper compiled");
        Ok(CompiledShaper {
            shaper: Arc::new(move |ctx, document| root(ctx, &Frame::root(document))),
            result_type,
        })
    }

    fn node(&self, expr: &Expr, scope: &Scope<'_>) -> QueryResult<Node> {
        trace!(kind = expr.kind(), "Compiling shaper node");
        match expr {
            Expr::Constant(value) => {
                let value = value.clone();
                Ok(node(move |_, _| Ok(value.clone())))
            }
            Expr::QueryParameter { name, .. } => {
                let name = name.clone();
                Ok(node(move |ctx, _| {
                    ctx.parameters()
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| QueryError::missing_parameter(name.as_str()))
                }))
            }
            Expr::ProjectionBinding(binding) => self.binding(binding),
            Expr::Field(field) => {
                let path = field.path.clone();
                let codec = Codec::for_type(&field.ty);
                let default = default_value(&field.ty);
                Ok(node(move |_, frame| {
                    read(frame.result_document().and_then(|d| lookup(d, &path)), &codec, &default)
                }))
            }
            Expr::New { type_name, args }
            | Expr::MemberInit {
                type_name,
                bindings: args,
            } => {
                let fields = args
                    .iter()
                    .map(|arg| Ok((arg.name.clone(), self.node(&arg.expr, scope)?)))
                    .collect::<QueryResult<Vec<_>>>()?;
                let type_name = type_name.clone();
                Ok(node(move |ctx, frame| {
                    let mut values = IndexMap::with_capacity(fields.len());
                    for (name, field) in &fields {
                        values.insert(name.clone(), field(ctx, frame)?);
                    }
                    Ok(Value::Record {
                        type_name: type_name.clone(),
                        fields: values,
                    })
                }))
            }
            Expr::List(items) => {
                let items = self.nodes(items, scope)?;
                Ok(node(move |ctx, frame| {
                    items
                        .iter()
                        .map(|item| item(ctx, frame))
                        .collect::<QueryResult<Vec<_>>>()
                        .map(Value::List)
                }))
            }
            Expr::Binary { op, left, right } => {
                let op = *op;
                let left = self.node(left, scope)?;
                let right = self.node(right, scope)?;
                Ok(node(move |ctx, frame| {
                    let l = left(ctx, frame)?;
                    match op {
                        BinaryOp::AndAlso if !truthy(&l) => Ok(Value::Bool(false)),
                        BinaryOp::OrElse if truthy(&l) => Ok(Value::Bool(true)),
                        BinaryOp::AndAlso | BinaryOp::OrElse => {
                            Ok(Value::Bool(truthy(&right(ctx, frame)?)))
                        }
                        BinaryOp::Coalesce if !l.is_null() => Ok(l),
                        _ => eval::binary(op, &l, &right(ctx, frame)?),
                    }
                }))
            }
            Expr::Unary { op, operand } => {
                let op = *op;
                let operand = self.node(operand, scope)?;
                Ok(node(move |ctx, frame| eval::unary(op, operand(ctx, frame)?)))
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = self.node(test, scope)?;
                let if_true = self.node(if_true, scope)?;
                let if_false = self.node(if_false, scope)?;
                Ok(node(move |ctx, frame| {
                    if truthy(&test(ctx, frame)?) {
                        if_true(ctx, frame)
                    } else {
                        if_false(ctx, frame)
                    }
                }))
            }
            Expr::Call {
                method: Method::VectorSearchScore,
                ..
            } => {
                let codec = Codec::scalar(prax_model::ScalarKind::Double);
                Ok(node(move |_, frame| {
                    read(
                        frame.result_document().and_then(|d| d.get(SCORE_FIELD)),
                        &codec,
                        &Value::Double(0.0),
                    )
                }))
            }
            Expr::Call { method, args } => {
                let method = method.clone();
                let args = self.nodes(args, scope)?;
                Ok(node(move |ctx, frame| {
                    let values = args
                        .iter()
                        .map(|arg| arg(ctx, frame))
                        .collect::<QueryResult<Vec<_>>>()?;
                    eval::call(&method, &values)
                }))
            }
            Expr::Member { expr: target, member } => {
                let target = self.node(target, scope)?;
                let member = member.clone();
                Ok(node(move |ctx, frame| match target(ctx, frame)? {
                    Value::Entity(id) => Ok(ctx.entity(id)?.property(&member).clone()),
                    value => eval::member(&value, &member),
                }))
            }
            Expr::Materialize(_) | Expr::Include(_) => self.entity(expr, scope),
            Expr::CollectionShaper(collection) => self.collection(collection, scope),
            Expr::StructuralShaper(shaper) => Err(QueryError::internal(format!(
                "structural shaper for `{}` reached compilation without a materializer",
                shaper.entity_type
            ))),
            Expr::ValueBufferRead(read) => Err(QueryError::internal(format!(
                "value buffer read of `{}.{}` outside of a materializer",
                read.entity_type, read.property
            ))),
            Expr::Parameter(_)
            | Expr::Lambda { .. }
            | Expr::QueryRoot(_)
            | Expr::Query { .. }
            | Expr::EntityProjection(_)
            | Expr::ObjectArray(_)
            | Expr::NotTranslated(_) => Err(QueryError::translation_failed_because(
                expr,
                "the projection cannot be evaluated on the client",
            )),
        }
    }

    fn nodes(&self, exprs: &[Expr], scope: &Scope<'_>) -> QueryResult<Vec<Node>> {
        exprs.iter().map(|e| self.node(e, scope)).collect()
    }

    fn binding(&self, binding: &ProjectionBinding) -> QueryResult<Node> {
        let entry = self.query.resolve(&binding.target)?;
        if entry.alias.is_empty() {
            return Ok(node(|_, frame| {
                Ok(frame
                    .result_document()
                    .map(document_to_value)
                    .unwrap_or(Value::Null))
            }));
        }
        let alias = entry.alias.clone();
        let codec = Codec::for_type(&binding.ty);
        let default = default_value(&binding.ty);
        Ok(node(move |_, frame| {
            read(frame.result_document().and_then(|d| d.get(&alias)), &codec, &default)
        }))
    }

    fn buffer(&self, buffer: &ValueBuffer, scope: &Scope<'_>) -> QueryResult<Buffer> {
        match (buffer, &scope.kind) {
            (ValueBuffer::Binding(binding), _) => {
                let entry = self.query.resolve(&binding.target)?;
                Ok(Buffer::Result(
                    (!entry.alias.is_empty()).then(|| entry.alias.clone()),
                ))
            }
            (ValueBuffer::Nested { element }, ScopeKind::Include(_)) => {
                Ok(Buffer::Nested(element.clone()))
            }
            (ValueBuffer::CurrentElement, ScopeKind::Element) => Ok(Buffer::Current),
            (other, _) => Err(QueryError::internal(format!(
                "value buffer {:?} is not reachable from {:?}",
                other, scope.kind
            ))),
        }
    }

    /// Compile a materializer together with the includes wrapped around it.
    fn entity(&self, expr: &Expr, scope: &Scope<'_>) -> QueryResult<Node> {
        let mut includes: Vec<&IncludeExpr> = vec![];
        let mut current = expr;
        let materialize: &Materialize = loop {
            match current {
                Expr::Include(include) => {
                    includes.push(include);
                    current = &include.entity;
                }
                Expr::Materialize(materialize) => break materialize,
                other => {
                    return Err(QueryError::internal(format!(
                        "include over a {} instead of an entity",
                        other.kind()
                    )));
                }
            }
        };
        // Innermost include first, so base type navigations load first.
        includes.reverse();

        let buffer = self.buffer(&materialize.value_buffer, scope)?;
        let nullable = materialize.nullable;
        let declared = materialize.entity_type.clone();
        let discriminator_element = materialize.discriminator_element.clone();
        let variants = materialize
            .variants
            .iter()
            .map(|variant| {
                let reads = variant
                    .reads
                    .iter()
                    .map(|r| Ok((r.property.clone(), self.read(&r.read, scope)?)))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Variant {
                    entity_type: variant.entity_type.clone(),
                    discriminator: variant.discriminator.clone(),
                    reads,
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;
        if variants.is_empty() {
            return Err(QueryError::internal(format!(
                "materializer for `{}` has no variants",
                declared
            )));
        }

        let related_scope = scope.child(ScopeKind::Include(declared.clone()));
        let includes = includes
            .into_iter()
            .map(|include| {
                Ok(Include {
                    navigation: include.navigation.clone(),
                    related: self.node(&include.related, &related_scope)?,
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(node(move |ctx, frame| {
            let Some(document) = buffer.document(frame)? else {
                if nullable {
                    return Ok(Value::Null);
                }
                return Err(QueryError::deserialization(format!(
                    "No document for required entity `{}` at {}",
                    declared, buffer
                )));
            };

            let variant = select_variant(&variants, discriminator_element.as_deref(), document, &declared)?;
            let ordinal = match buffer {
                Buffer::Current => frame.ordinal(),
                _ => None,
            };

            let entity_frame = frame.nested(Some(document), ordinal, None);
            let mut properties = IndexMap::with_capacity(variant.reads.len());
            for (property, read) in &variant.reads {
                properties.insert(property.clone(), read.run(ctx, &entity_frame)?);
            }
            let id = ctx.add_entity(variant.entity_type.clone(), properties);

            let include_frame = frame.nested(Some(document), ordinal, Some(id));
            for include in &includes {
                let related = (include.related)(ctx, &include_frame)?;
                ctx.fix_up(id, &include.navigation, &related)?;
            }
            Ok(Value::Entity(id))
        }))
    }

    fn read(&self, read: &Expr, scope: &Scope<'_>) -> QueryResult<Read> {
        let Expr::ValueBufferRead(buffer_read) = read else {
            return Ok(Read::Computed(self.node(read, scope)?));
        };
        let (_, property) = self
            .model
            .find_property(&buffer_read.entity_type, &buffer_read.property)
            .ok_or_else(|| {
                QueryError::translation_failed_because(
                    read,
                    format!("`{}` has no property `{}`", buffer_read.entity_type, buffer_read.property),
                )
            })?;
        let default = Value::default_for(property.kind, property.nullable);

        Ok(match &property.storage {
            PropertyStorage::Element(_) => Read::Element {
                path: self
                    .model
                    .element_path(&buffer_read.entity_type, &buffer_read.property)
                    .unwrap_or_default(),
                codec: Codec::for_type(&buffer_read.ty),
                default,
            },
            PropertyStorage::Ordinal => Read::Ordinal,
            PropertyStorage::OwnerKey => Read::OwnerKey {
                hops: self.owner_key_hops(&buffer_read.entity_type, &buffer_read.property, scope),
                default,
            },
        })
    }

    /// Principal properties mirrored by an owned key property, one per
    /// enclosing owner, stopping at the first stored one.
    fn owner_key_hops(&self, entity_type: &str, property: &str, scope: &Scope<'_>) -> Vec<SmolStr> {
        let mut hops = vec![];
        let mut ty = SmolStr::new(entity_type);
        let mut dependent = SmolStr::new(property);

        for owner in scope.owners() {
            let Some(ownership) = self.model.entity(&ty).and_then(|t| t.ownership.as_ref()) else {
                break;
            };
            if !self.model.hierarchy(&owner).any(|t| t.name == ownership.owner) {
                break;
            }
            let Some(principal) = ownership.principal_for(&dependent) else {
                break;
            };
            hops.push(principal.clone());

            let stored = self
                .model
                .find_property(&owner, principal)
                .is_some_and(|(_, p)| p.storage != PropertyStorage::OwnerKey);
            if stored {
                break;
            }
            dependent = principal.clone();
            ty = owner;
        }
        hops
    }

    fn collection(&self, collection: &CollectionShaper, scope: &Scope<'_>) -> QueryResult<Node> {
        let buffer = match &collection.value_buffer {
            ValueBuffer::CurrentElement => {
                return Err(QueryError::internal(format!(
                    "collection of `{}` cannot read the current element",
                    collection.entity_type
                )));
            }
            other => self.buffer(other, scope)?,
        };
        let element_scope = scope.child(ScopeKind::Element);
        let element = self.node(&collection.element, &element_scope)?;

        Ok(node(move |ctx, frame| {
            let items = buffer.array(frame)?;
            let mut values = Vec::with_capacity(items.len());
            for (ordinal, item) in items.iter().enumerate() {
                let Bson::Document(document) = item else {
                    return Err(QueryError::deserialization(format!(
                        "Expected documents in {}, found {:?}",
                        buffer,
                        item.element_type()
                    )));
                };
                let element_frame = frame.nested(Some(document), Some(ordinal), None);
                values.push(element(ctx, &element_frame)?);
            }
            Ok(Value::List(values))
        }))
    }
}

fn select_variant<'v>(
    variants: &'v [Variant],
    discriminator_element: Option<&str>,
    document: &Document,
    declared: &str,
) -> QueryResult<&'v Variant> {
    let value = discriminator_element.and_then(|element| document.get_str(element).ok());
    let Some(value) = value else {
        return Ok(&variants[0]);
    };
    variants
        .iter()
        .find(|v| v.discriminator.as_deref() == Some(value))
        .ok_or_else(|| {
            QueryError::deserialization(format!(
                "Unknown discriminator value '{}' for entity type `{}`",
                value, declared
            ))
        })
}

fn default_value(ty: &TypeRef) -> Value {
    match ty {
        TypeRef::Scalar { kind, nullable } => Value::default_for(*kind, *nullable),
        _ => Value::Null,
    }
}

fn read(bson: Option<&Bson>, codec: &Codec, default: &Value) -> QueryResult<Value> {
    match bson {
        Some(bson) if !matches!(bson, Bson::Null | Bson::Undefined) => codec.decode(bson),
        _ => Ok(default.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use prax_model::{ModelBuilder, ScalarKind};
    use prax_query::expr::ProjectionMember;
    use prax_query::{
        ErrorCode, ParameterValues, QueryBuilder, QueryableMethodCapture, inject_materializers,
    };
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        ModelBuilder::new()
            .entity("Customer", |e| {
                e.collection("customers")
                    .property("Id", ScalarKind::Int32)
                    .property("Name", ScalarKind::String)
                    .key(["Id"])
                    .discriminator("Type", "Customer")
                    .owns_one("Address", "Address", |a| {
                        a.property("City", ScalarKind::String);
                    })
                    .owns_many("Orders", "Order", |o| {
                        o.property("Total", ScalarKind::Double)
                            .owner_navigation("Customer")
                            .owns_many("Lines", "OrderLine", |l| {
                                l.property("Sku", ScalarKind::String);
                            });
                    });
            })
            .entity("VipCustomer", |e| {
                e.derives_from("Customer")
                    .discriminator("Type", "Vip")
                    .property("Tier", ScalarKind::Int32);
            })
            .build()
            .unwrap()
    }

    fn compile(model: &Model, query: &Expr) -> (MongoQueryExpression, CompiledShaper) {
        let shaped = QueryableMethodCapture::new(model).translate(query).unwrap();
        let shaper = inject_materializers(model, shaped.shaper).unwrap();
        let compiled = ShaperCompiler::new(model, &shaped.query)
            .compile(&shaper)
            .unwrap();
        (shaped.query, compiled)
    }

    fn context(model: &Model) -> MaterializationContext {
        MaterializationContext::new(Arc::new(model.clone()), ParameterValues::new())
    }

    fn customer_document() -> Document {
        doc! {
            "_id": 7,
            "Name": "Ada",
            "Type": "Customer",
            "Address": { "City": "Paris" },
            "Orders": [
                { "Total": 10.0, "Lines": [ { "Sku": "a" }, { "Sku": "b" } ] },
                { "Total": 20.0 },
                { "Total": 30.0 },
            ],
        }
    }

    #[test]
    fn test_entity_with_owned_navigations() {
        let model = model();
        let (_, shaper) = compile(&model, &QueryBuilder::root("Customer").build());
        let mut ctx = context(&model);

        let value = shaper.shape(&mut ctx, &customer_document()).unwrap();
        let customer = ctx.entity(value.as_entity().unwrap()).unwrap();
        assert_eq!(customer.entity_type, "Customer");
        assert_eq!(customer.property("Id"), &Value::Int32(7));
        assert_eq!(customer.property("Name"), &Value::from("Ada"));

        let address = customer.reference("Address").unwrap();
        assert_eq!(ctx.entity(address).unwrap().property("City"), &Value::from("Paris"));

        let orders = customer.collection("Orders").to_vec();
        assert_eq!(orders.len(), 3);
        let totals: Vec<&Value> = orders
            .iter()
            .map(|o| ctx.entity(*o).unwrap().property("Total"))
            .collect();
        assert_eq!(
            totals,
            vec![&Value::Double(10.0), &Value::Double(20.0), &Value::Double(30.0)]
        );
    }

    #[test]
    fn test_array_ordinals_are_stable() {
        let model = model();
        let (_, shaper) = compile(&model, &QueryBuilder::root("Customer").build());
        let mut ctx = context(&model);
        let document = customer_document();

        for _ in 0..2 {
            let value = shaper.shape(&mut ctx, &document).unwrap();
            let customer = ctx.entity(value.as_entity().unwrap()).unwrap();
            let ordinals: Vec<Value> = customer
                .collection("Orders")
                .iter()
                .map(|o| ctx.entity(*o).unwrap().property("__synthesizedOrdinal").clone())
                .collect();
            assert_eq!(ordinals, vec![Value::Int32(0), Value::Int32(1), Value::Int32(2)]);
        }
    }

    #[test]
    fn test_owner_key_falls_back_to_ancestors() {
        let model = model();
        let (_, shaper) = compile(&model, &QueryBuilder::root("Customer").build());
        let mut ctx = context(&model);

        let value = shaper.shape(&mut ctx, &customer_document()).unwrap();
        let customer = ctx.entity(value.as_entity().unwrap()).unwrap();
        let first_order = customer.collection("Orders")[0];
        let order = ctx.entity(first_order).unwrap();
        assert_eq!(order.property("CustomerId"), &Value::Int32(7));
        assert_eq!(order.reference("Customer"), value.as_entity());

        let line = ctx.entity(order.collection("Lines")[1]).unwrap();
        assert_eq!(line.property("OrderCustomerId"), &Value::Int32(7));
        assert_eq!(line.property("Order__synthesizedOrdinal"), &Value::Int32(0));
        assert_eq!(line.property("__synthesizedOrdinal"), &Value::Int32(1));
    }

    #[test]
    fn test_owned_reference_keys_resolve_to_root() {
        let model = ModelBuilder::new()
            .entity("Movie", |e| {
                e.collection("movies")
                    .property("Id", ScalarKind::Int32)
                    .key(["Id"])
                    .owns_one("Info", "MovieInfo", |i| {
                        i.property("Studio", ScalarKind::String)
                            .owns_one("Budget", "Budget", |b| {
                                b.property("Amount", ScalarKind::Double);
                            });
                    });
            })
            .build()
            .unwrap();
        let (_, shaper) = compile(&model, &QueryBuilder::root("Movie").build());
        let mut ctx = context(&model);

        let value = shaper
            .shape(
                &mut ctx,
                &doc! { "_id": 7, "Info": { "Studio": "Ghibli", "Budget": { "Amount": 2.5 } } },
            )
            .unwrap();
        let movie = ctx.entity(value.as_entity().unwrap()).unwrap();
        let info = ctx.entity(movie.reference("Info").unwrap()).unwrap();
        assert_eq!(info.property("MovieId"), &Value::Int32(7));

        let budget = ctx.entity(info.reference("Budget").unwrap()).unwrap();
        assert_eq!(budget.property("MovieInfoMovieId"), &Value::Int32(7));
        assert_eq!(budget.property("Amount"), &Value::Double(2.5));
    }

    #[test]
    fn test_discriminator_selects_variant() {
        let model = model();
        let (_, shaper) = compile(&model, &QueryBuilder::root("Customer").build());
        let mut ctx = context(&model);

        let vip = shaper
            .shape(&mut ctx, &doc! { "_id": 1, "Name": "Bo", "Type": "Vip", "Tier": 3 })
            .unwrap();
        let vip = ctx.entity(vip.as_entity().unwrap()).unwrap();
        assert_eq!(vip.entity_type, "VipCustomer");
        assert_eq!(vip.property("Tier"), &Value::Int32(3));

        let err = shaper
            .shape(&mut ctx, &doc! { "_id": 2, "Type": "Ghost" })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DeserializationError);
    }

    #[test]
    fn test_record_projection_and_parameters() {
        let model = model();
        let query = QueryBuilder::root("Customer")
            .select(Expr::lambda(
                "c",
                Expr::new_record(
                    "Row",
                    [
                        ("Name", Expr::param("c").member("Name")),
                        ("City", Expr::param("c").member("Address").member("City")),
                        (
                            "Tag",
                            Expr::query_param("__tag_0", TypeRef::scalar(ScalarKind::String)),
                        ),
                    ],
                ),
            ))
            .build();
        let (_, shaper) = compile(&model, &query);

        let mut ctx = MaterializationContext::new(
            Arc::new(model.clone()),
            ParameterValues::new().with("__tag_0", "gold"),
        );
        let value = shaper
            .shape(&mut ctx, &doc! { "Name": "Ada", "City": "Paris" })
            .unwrap();
        assert_eq!(value.field("Name"), Some(&Value::from("Ada")));
        assert_eq!(value.field("City"), Some(&Value::from("Paris")));
        assert_eq!(value.field("Tag"), Some(&Value::from("gold")));

        let mut missing = context(&model);
        let err = shaper
            .shape(&mut missing, &doc! { "Name": "Ada" })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingParameter);
    }

    #[test]
    fn test_scalar_round_trip() {
        let model = model();
        let query = QueryBuilder::root("Customer")
            .select(Expr::lambda("c", Expr::param("c").member("Name")))
            .build();
        let (query, shaper) = compile(&model, &query);
        assert_eq!(query.projection()[0].alias, "_v");

        let mut ctx = context(&model);
        assert_eq!(
            shaper.shape(&mut ctx, &doc! { "_v": "Ada" }).unwrap(),
            Value::from("Ada")
        );
        assert_eq!(shaper.shape(&mut ctx, &doc! {}).unwrap(), Value::Null);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let model = model();
        let shaped = QueryableMethodCapture::new(&model)
            .translate(&QueryBuilder::root("Customer").build())
            .unwrap();
        let shaper = inject_materializers(&model, shaped.shaper).unwrap();
        let compiler = ShaperCompiler::new(&model, &shaped.query);
        let first = compiler.compile(&shaper).unwrap();
        let second = compiler.compile(&shaper).unwrap();

        let mut a = context(&model);
        let mut b = context(&model);
        let document = customer_document();
        first.shape(&mut a, &document).unwrap();
        second.shape(&mut b, &document).unwrap();
        assert_eq!(a.entities(), b.entities());
        assert_eq!(first.result_type(), second.result_type());
    }

    #[test]
    fn test_unresolved_binding_fails_compilation() {
        let model = model();
        let query = MongoQueryExpression::new("customers", "Customer");
        let binding = Expr::ProjectionBinding(ProjectionBinding::member(
            ProjectionMember::from_names(["Missing"]),
            TypeRef::scalar(ScalarKind::Int32),
        ));
        let err = ShaperCompiler::new(&model, &query).compile(&binding).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnresolvedProjectionBinding);
    }

    #[test]
    fn test_uninjected_shaper_is_rejected() {
        let model = model();
        let shaped = QueryableMethodCapture::new(&model)
            .translate(&QueryBuilder::root("Customer").build())
            .unwrap();
        let err = ShaperCompiler::new(&model, &shaped.query)
            .compile(&shaped.shaper)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
