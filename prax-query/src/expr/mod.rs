//! Tagged-union expression IR.
//!
//! One [`Expr`] type carries the host's query description, the shaper
//! built from it and every intermediate form produced by the rewriting
//! passes. Passes are written as exhaustive `match`es, through
//! [`ExprVisitor`] for read-only walks and [`ExprRewriter`] for rebuilding.
//!
//! ```rust
//! use prax_query::expr::Expr;
//!
//! // x => x.Year > 2000
//! let predicate = Expr::lambda("x", Expr::param("x").member("Year").gt(Expr::constant(2000)));
//! assert_eq!(predicate.to_string(), "x => (x.Year > 2000)");
//! ```

mod nodes;
mod visitor;

use std::fmt;

use prax_model::ScalarKind;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub use nodes::{
    BindingTarget, CollectionShaper, EntityProjection, FieldRef, IncludeExpr, Materialize,
    MaterializeVariant, ObjectArrayProjection, ProjectionBinding, ProjectionMember, PropertyRead,
    StructuralShaper, ValueBuffer, ValueBufferRead, dotted,
};
pub use visitor::{
    ExprRewriter, ExprVisitor, ParameterReplacer, contains, free_parameters, rewrite_children,
    walk_expr,
};

use crate::operators::QueryOperator;
use crate::types::TypeRef;
use crate::value::Value;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Coalesce,
}

impl BinaryOp {
    /// Operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::AndAlso => "&&",
            Self::OrElse => "||",
            Self::Coalesce => "??",
        }
    }

    /// Check if the operator is a comparison.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::LessThan
                | Self::LessThanOrEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
        )
    }

    /// The comparison with its operands swapped (`a < b` is `b > a`).
    pub fn flip(&self) -> Self {
        match self {
            Self::LessThan => Self::GreaterThan,
            Self::LessThanOrEqual => Self::GreaterThanOrEqual,
            Self::GreaterThan => Self::LessThan,
            Self::GreaterThanOrEqual => Self::LessThanOrEqual,
            other => *other,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    /// Conversion to a scalar kind.
    Convert(ScalarKind),
}

/// Non-queryable methods the IR knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// `EF.Property(entity, "Name")`: property access by name.
    EfProperty,
    /// `object.Equals(a, b)`.
    ObjectEquals,
    /// `s.Contains(sub)`.
    StringContains,
    /// `s.StartsWith(prefix)`.
    StartsWith,
    /// `s.EndsWith(suffix)`.
    EndsWith,
    /// `s.ToLower()`.
    ToLower,
    /// `s.ToUpper()`.
    ToUpper,
    /// `list.Contains(item)`.
    ListContains,
    /// `new DateTime(year, month, day[, hour, minute, second])`.
    MakeDateTime,
    /// `Mql.VectorSearchScore(entity)`.
    VectorSearchScore,
    /// Any other method; never translated.
    Other(SmolStr),
}

impl Method {
    /// Method name.
    pub fn name(&self) -> &str {
        match self {
            Self::EfProperty => "EF.Property",
            Self::ObjectEquals => "object.Equals",
            Self::StringContains => "Contains",
            Self::StartsWith => "StartsWith",
            Self::EndsWith => "EndsWith",
            Self::ToLower => "ToLower",
            Self::ToUpper => "ToUpper",
            Self::ListContains => "Contains",
            Self::MakeDateTime => "new DateTime",
            Self::VectorSearchScore => "Mql.VectorSearchScore",
            Self::Other(name) => name,
        }
    }
}

/// A named argument of a record construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberArg {
    /// Member name.
    pub name: SmolStr,
    /// Member value.
    pub expr: Expr,
}

impl MemberArg {
    /// Create a member argument.
    pub fn new(name: impl Into<SmolStr>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value.
    Constant(Value),
    /// Reference to a lambda parameter.
    Parameter(SmolStr),
    /// Runtime parameter placeholder, filled per execution.
    QueryParameter {
        /// Parameter name.
        name: SmolStr,
        /// Declared type.
        ty: TypeRef,
    },
    /// Member access.
    Member {
        /// Accessed object.
        expr: Box<Expr>,
        /// Member name.
        member: SmolStr,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// `test ? if_true : if_false`.
    Conditional {
        /// Condition.
        test: Box<Expr>,
        /// Value when true.
        if_true: Box<Expr>,
        /// Value when false.
        if_false: Box<Expr>,
    },
    /// Non-queryable method call.
    Call {
        /// Method.
        method: Method,
        /// Arguments, receiver first for instance methods.
        args: Vec<Expr>,
    },
    /// Lambda abstraction.
    Lambda {
        /// Parameter names.
        params: Vec<SmolStr>,
        /// Body.
        body: Box<Expr>,
    },
    /// Record construction with constructor arguments (`new { A = .., B = .. }`).
    New {
        /// Record type name.
        type_name: SmolStr,
        /// Named arguments in order.
        args: Vec<MemberArg>,
    },
    /// Record construction with member initializers (`new T { A = .. }`).
    MemberInit {
        /// Record type name.
        type_name: SmolStr,
        /// Member bindings in order.
        bindings: Vec<MemberArg>,
    },
    /// List literal.
    List(Vec<Expr>),
    /// The root sequence of an entity type's collection.
    QueryRoot(SmolStr),
    /// Queryable operator call.
    Query {
        /// Operator.
        op: QueryOperator,
        /// Source sequence.
        source: Box<Expr>,
        /// Operator arguments.
        args: Vec<Expr>,
    },
    /// Stored field reference.
    Field(FieldRef),
    /// Embedded or root document reference.
    EntityProjection(EntityProjection),
    /// Embedded array reference.
    ObjectArray(ObjectArrayProjection),
    /// Value bound to a projection entry.
    ProjectionBinding(ProjectionBinding),
    /// Entity shaper.
    StructuralShaper(StructuralShaper),
    /// Owned collection shaper.
    CollectionShaper(CollectionShaper),
    /// Navigation include.
    Include(IncludeExpr),
    /// Entity materializer.
    Materialize(Materialize),
    /// Property read inside a materializer.
    ValueBufferRead(ValueBufferRead),
    /// Marker for a construct that could not be translated.
    NotTranslated(SmolStr),
}

impl Expr {
    /// Literal value.
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    /// Null literal.
    pub fn null() -> Self {
        Self::Constant(Value::Null)
    }

    /// Lambda parameter reference.
    pub fn param(name: impl Into<SmolStr>) -> Self {
        Self::Parameter(name.into())
    }

    /// Runtime parameter placeholder.
    pub fn query_param(name: impl Into<SmolStr>, ty: TypeRef) -> Self {
        Self::QueryParameter {
            name: name.into(),
            ty,
        }
    }

    /// Single-parameter lambda.
    pub fn lambda(param: impl Into<SmolStr>, body: Expr) -> Self {
        Self::Lambda {
            params: vec![param.into()],
            body: Box::new(body),
        }
    }

    /// Root sequence of an entity type.
    pub fn root(entity: impl Into<SmolStr>) -> Self {
        Self::QueryRoot(entity.into())
    }

    /// Record construction.
    pub fn new_record<I, S>(type_name: impl Into<SmolStr>, args: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<SmolStr>,
    {
        Self::New {
            type_name: type_name.into(),
            args: args
                .into_iter()
                .map(|(name, expr)| MemberArg::new(name, expr))
                .collect(),
        }
    }

    /// Method call.
    pub fn call(method: Method, args: Vec<Expr>) -> Self {
        Self::Call { method, args }
    }

    /// `EF.Property(entity, name)`.
    pub fn ef_property(entity: Expr, name: &str) -> Self {
        Self::call(Method::EfProperty, vec![entity, Self::constant(name)])
    }

    /// `object.Equals(a, b)`.
    pub fn object_equals(a: Expr, b: Expr) -> Self {
        Self::call(Method::ObjectEquals, vec![a, b])
    }

    /// `new DateTime(year, month, day)`.
    pub fn date(year: i32, month: i32, day: i32) -> Self {
        Self::call(
            Method::MakeDateTime,
            vec![
                Self::constant(year),
                Self::constant(month),
                Self::constant(day),
            ],
        )
    }

    /// `Mql.VectorSearchScore(entity)`.
    pub fn vector_search_score(entity: Expr) -> Self {
        Self::call(Method::VectorSearchScore, vec![entity])
    }

    /// Member access on this expression.
    pub fn member(self, name: impl Into<SmolStr>) -> Self {
        Self::Member {
            expr: Box::new(self),
            member: name.into(),
        }
    }

    /// Binary operation with this expression on the left.
    pub fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `self == right`.
    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::Equal, right)
    }

    /// `self != right`.
    pub fn ne(self, right: Expr) -> Self {
        self.binary(BinaryOp::NotEqual, right)
    }

    /// `self > right`.
    pub fn gt(self, right: Expr) -> Self {
        self.binary(BinaryOp::GreaterThan, right)
    }

    /// `self >= right`.
    pub fn gte(self, right: Expr) -> Self {
        self.binary(BinaryOp::GreaterThanOrEqual, right)
    }

    /// `self < right`.
    pub fn lt(self, right: Expr) -> Self {
        self.binary(BinaryOp::LessThan, right)
    }

    /// `self <= right`.
    pub fn lte(self, right: Expr) -> Self {
        self.binary(BinaryOp::LessThanOrEqual, right)
    }

    /// `self && right`.
    pub fn and(self, right: Expr) -> Self {
        self.binary(BinaryOp::AndAlso, right)
    }

    /// `self || right`.
    pub fn or(self, right: Expr) -> Self {
        self.binary(BinaryOp::OrElse, right)
    }

    /// `self + right`.
    pub fn add(self, right: Expr) -> Self {
        self.binary(BinaryOp::Add, right)
    }

    /// `self * right`.
    pub fn mul(self, right: Expr) -> Self {
        self.binary(BinaryOp::Multiply, right)
    }

    /// `!self`.
    pub fn not(self) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// `self.StartsWith(prefix)`.
    pub fn starts_with(self, prefix: Expr) -> Self {
        Self::call(Method::StartsWith, vec![self, prefix])
    }

    /// `self.Contains(sub)` on strings.
    pub fn contains_str(self, sub: Expr) -> Self {
        Self::call(Method::StringContains, vec![self, sub])
    }

    /// Get the constant value, if this is a constant.
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Self::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Split a single-parameter lambda into its parameter and body.
    pub fn as_lambda(&self) -> Option<(&SmolStr, &Expr)> {
        match self {
            Self::Lambda { params, body } if params.len() == 1 => Some((&params[0], body)),
            _ => None,
        }
    }

    /// Short name of the node kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Constant(_) => "Constant",
            Self::Parameter(_) => "Parameter",
            Self::QueryParameter { .. } => "QueryParameter",
            Self::Member { .. } => "Member",
            Self::Binary { .. } => "Binary",
            Self::Unary { .. } => "Unary",
            Self::Conditional { .. } => "Conditional",
            Self::Call { .. } => "Call",
            Self::Lambda { .. } => "Lambda",
            Self::New { .. } => "New",
            Self::MemberInit { .. } => "MemberInit",
            Self::List(_) => "List",
            Self::QueryRoot(_) => "QueryRoot",
            Self::Query { .. } => "Query",
            Self::Field(_) => "Field",
            Self::EntityProjection(_) => "EntityProjection",
            Self::ObjectArray(_) => "ObjectArray",
            Self::ProjectionBinding(_) => "ProjectionBinding",
            Self::StructuralShaper(_) => "StructuralShaper",
            Self::CollectionShaper(_) => "CollectionShaper",
            Self::Include(_) => "Include",
            Self::Materialize(_) => "Materialize",
            Self::ValueBufferRead(_) => "ValueBufferRead",
            Self::NotTranslated(_) => "NotTranslated",
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

fn write_members(f: &mut fmt::Formatter<'_>, args: &[MemberArg]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{} = {}", arg.name, arg.expr)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{}", v),
            Self::Parameter(name) => f.write_str(name),
            Self::QueryParameter { name, .. } => write!(f, "@{}", name),
            Self::Member { expr, member } => write!(f, "{}.{}", expr, member),
            Self::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
                UnaryOp::Convert(kind) => write!(f, "({}){}", kind, operand),
            },
            Self::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            Self::Call { method, args } => {
                write!(f, "{}(", method.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Lambda { params, body } => {
                if params.len() == 1 {
                    write!(f, "{} => {}", params[0], body)
                } else {
                    let names: Vec<&str> = params.iter().map(SmolStr::as_str).collect();
                    write!(f, "({}) => {}", names.join(", "), body)
                }
            }
            Self::New { type_name, args } => {
                write!(f, "new {} {{ ", type_name)?;
                write_members(f, args)?;
                f.write_str(" }")
            }
            Self::MemberInit {
                type_name,
                bindings,
            } => {
                write!(f, "new {}() {{ ", type_name)?;
                write_members(f, bindings)?;
                f.write_str(" }")
            }
            Self::List(items) => {
                f.write_str("[")?;
                write_args(f, items)?;
                f.write_str("]")
            }
            Self::QueryRoot(entity) => write!(f, "DbSet<{}>", entity),
            Self::Query { op, source, args } => {
                write!(f, "{}.{}(", source, op)?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Field(field) => write!(f, "Field({})", field.dotted()),
            Self::EntityProjection(p) => {
                write!(f, "EntityProjection({}, {})", p.entity_type, dotted(&p.path))
            }
            Self::ObjectArray(p) => write!(f, "ObjectArray({}, {})", p.entity_type, dotted(&p.path)),
            Self::ProjectionBinding(b) => write!(f, "ProjectionBinding({})", b),
            Self::StructuralShaper(s) => write!(f, "StructuralShaper({})", s.entity_type),
            Self::CollectionShaper(s) => write!(f, "CollectionShaper({})", s.entity_type),
            Self::Include(i) => write!(f, "{}.Include({})", i.entity, i.navigation),
            Self::Materialize(m) => write!(f, "Materialize({})", m.entity_type),
            Self::ValueBufferRead(r) => write!(f, "ValueBufferRead({}.{})", r.entity_type, r.property),
            Self::NotTranslated(construct) => write!(f, "NotTranslated({})", construct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_query_chain() {
        let query = Expr::Query {
            op: QueryOperator::Where,
            source: Box::new(Expr::root("Movie")),
            args: vec![Expr::lambda(
                "m",
                Expr::param("m").member("Title").eq(Expr::constant("Up")),
            )],
        };
        assert_eq!(
            query.to_string(),
            r#"DbSet<Movie>.Where(m => (m.Title == "Up"))"#
        );
    }

    #[test]
    fn test_flip_comparison() {
        assert_eq!(BinaryOp::LessThan.flip(), BinaryOp::GreaterThan);
        assert_eq!(BinaryOp::Equal.flip(), BinaryOp::Equal);
        assert!(BinaryOp::NotEqual.is_comparison());
        assert!(!BinaryOp::Add.is_comparison());
    }

    #[test]
    fn test_as_lambda() {
        let lambda = Expr::lambda("x", Expr::param("x"));
        let (param, body) = lambda.as_lambda().unwrap();
        assert_eq!(param, "x");
        assert_eq!(body, &Expr::param("x"));
        assert!(Expr::null().as_lambda().is_none());
    }
}
