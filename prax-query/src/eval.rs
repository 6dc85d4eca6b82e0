//! Client-side evaluation of closed sub-expressions.
//!
//! A sub-expression is *closed* when it depends on nothing that varies per
//! document: no lambda parameters, no query parameters, no stored fields and
//! no shapers. Closed sub-expressions are folded to constants during
//! projection binding. The operator helpers here are shared with the shaper
//! compiler, which applies them to values read from documents.

use std::cmp::Ordering;

use chrono::{TimeZone, Utc};
use prax_model::ScalarKind;

use crate::error::{QueryError, QueryResult};
use crate::expr::{BinaryOp, Expr, ExprVisitor, Method, UnaryOp, walk_expr};
use crate::parameters::ParameterValues;
use crate::value::Value;

/// Check whether `expr` can be evaluated without a document.
pub fn is_closed(expr: &Expr) -> bool {
    struct Closed(bool);

    impl ExprVisitor for Closed {
        fn visit_expr(&mut self, expr: &Expr) {
            if !self.0 {
                return;
            }
            match expr {
                Expr::Parameter(_)
                | Expr::QueryParameter { .. }
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
                | Expr::NotTranslated(_) => self.0 = false,
                Expr::Call {
                    method: Method::Other(_) | Method::VectorSearchScore | Method::EfProperty,
                    ..
                } => self.0 = false,
                _ => walk_expr(self, expr),
            }
        }
    }

    let mut closed = Closed(true);
    closed.visit_expr(expr);
    closed.0
}

/// Evaluate `expr` if it is closed and every operation succeeds.
pub fn try_evaluate(expr: &Expr) -> Option<Value> {
    if !is_closed(expr) {
        return None;
    }
    evaluate(expr, None).ok()
}

/// Evaluate `expr`, resolving query parameters from `parameters`.
pub fn evaluate(expr: &Expr, parameters: Option<&ParameterValues>) -> QueryResult<Value> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),
        Expr::QueryParameter { name, .. } => parameters
            .and_then(|p| p.get(name))
            .cloned()
            .ok_or_else(|| QueryError::missing_parameter(name.as_str())),
        Expr::Member { expr: target, member: name } => {
            let value = evaluate(target, parameters)?;
            member(&value, name)
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::AndAlso => {
                if !truthy(&evaluate(left, parameters)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&evaluate(right, parameters)?)))
            }
            BinaryOp::OrElse => {
                if truthy(&evaluate(left, parameters)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&evaluate(right, parameters)?)))
            }
            _ => binary(
                *op,
                &evaluate(left, parameters)?,
                &evaluate(right, parameters)?,
            ),
        },
        Expr::Unary { op, operand } => unary(*op, evaluate(operand, parameters)?),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            if truthy(&evaluate(test, parameters)?) {
                evaluate(if_true, parameters)
            } else {
                evaluate(if_false, parameters)
            }
        }
        Expr::Call { method, args } => {
            let values = args
                .iter()
                .map(|a| evaluate(a, parameters))
                .collect::<QueryResult<Vec<_>>>()?;
            call(method, &values)
        }
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|i| evaluate(i, parameters))
                .collect::<QueryResult<_>>()?,
        )),
        Expr::New { type_name, args } | Expr::MemberInit {
            type_name,
            bindings: args,
        } => {
            let mut fields = indexmap::IndexMap::with_capacity(args.len());
            for arg in args {
                fields.insert(arg.name.clone(), evaluate(&arg.expr, parameters)?);
            }
            Ok(Value::Record {
                type_name: type_name.clone(),
                fields,
            })
        }
        other => Err(QueryError::translation_failed_because(
            other,
            "the expression cannot be evaluated on the client",
        )),
    }
}

/// Truthiness of a condition value; only `true` is true.
pub fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Read a member of a value.
pub fn member(value: &Value, name: &str) -> QueryResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    value.member(name).ok_or_else(|| {
        QueryError::translation_failed_because(
            format!("{}.{}", value.type_name(), name),
            "unknown member",
        )
    })
}

fn overflow(op: BinaryOp) -> QueryError {
    QueryError::invalid_data_type(format!("Arithmetic overflow in `{}`", op.symbol()))
}

fn integer_op(op: BinaryOp, a: i64, b: i64) -> QueryResult<i64> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide => {
            if b == 0 {
                return Err(QueryError::invalid_data_type("Division by zero"));
            }
            a.checked_div(b)
        }
        BinaryOp::Modulo => {
            if b == 0 {
                return Err(QueryError::invalid_data_type("Division by zero"));
            }
            a.checked_rem(b)
        }
        _ => None,
    };
    result.ok_or_else(|| overflow(op))
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        _ => a % b,
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> QueryResult<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::String(a), b) if op == BinaryOp::Add => Ok(Value::String(format!("{}{}", a, plain(b)))),
        (a, Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(format!("{}{}", plain(a), b))),
        (Value::Int32(a), Value::Int32(b)) => {
            let result = integer_op(op, i64::from(*a), i64::from(*b))?;
            i32::try_from(result)
                .map(Value::Int32)
                .map_err(|_| overflow(op))
        }
        (a, b) if a.as_i64().is_some() && b.as_i64().is_some() => {
            let (a, b) = (a.as_i64().unwrap_or_default(), b.as_i64().unwrap_or_default());
            integer_op(op, a, b).map(Value::Int64)
        }
        (a, b) if a.is_numeric() && b.is_numeric() => Ok(Value::Double(float_op(
            op,
            a.as_f64().unwrap_or_default(),
            b.as_f64().unwrap_or_default(),
        ))),
        (a, b) => Err(QueryError::invalid_data_type(format!(
            "Operator `{}` cannot be applied to {} and {}",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Apply a binary operator to two values.
///
/// Comparisons involving null are false; `Coalesce` yields the right value
/// only when the left one is null.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> QueryResult<Value> {
    let ordered = |accept: fn(Ordering) -> bool| Value::Bool(left.compare(right).is_some_and(accept));
    Ok(match op {
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulo => return arithmetic(op, left, right),
        BinaryOp::Equal => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEqual => Value::Bool(!left.loose_eq(right)),
        BinaryOp::LessThan => ordered(Ordering::is_lt),
        BinaryOp::LessThanOrEqual => ordered(Ordering::is_le),
        BinaryOp::GreaterThan => ordered(Ordering::is_gt),
        BinaryOp::GreaterThanOrEqual => ordered(Ordering::is_ge),
        BinaryOp::AndAlso => Value::Bool(truthy(left) && truthy(right)),
        BinaryOp::OrElse => Value::Bool(truthy(left) || truthy(right)),
        BinaryOp::Coalesce => {
            if left.is_null() {
                right.clone()
            } else {
                left.clone()
            }
        }
    })
}

/// Apply a unary operator.
pub fn unary(op: UnaryOp, value: Value) -> QueryResult<Value> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Int32(v)) => v
            .checked_neg()
            .map(Value::Int32)
            .ok_or_else(|| overflow(BinaryOp::Subtract)),
        (UnaryOp::Negate, Value::Int64(v)) => v
            .checked_neg()
            .map(Value::Int64)
            .ok_or_else(|| overflow(BinaryOp::Subtract)),
        (UnaryOp::Negate, Value::Double(v)) => Ok(Value::Double(-v)),
        (UnaryOp::Convert(kind), value) => value.coerce(kind),
        (op, value) => Err(QueryError::invalid_data_type(format!(
            "Operator {:?} cannot be applied to {}",
            op,
            value.type_name()
        ))),
    }
}

fn string_arg<'v>(method: &Method, args: &'v [Value], index: usize) -> QueryResult<Option<&'v str>> {
    match args.get(index) {
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        _ => Err(QueryError::invalid_data_type(format!(
            "`{}` expects a string argument at position {}",
            method.name(),
            index
        ))),
    }
}

fn int_arg(method: &Method, args: &[Value], index: usize, default: i64) -> QueryResult<i64> {
    match args.get(index) {
        None => Ok(default),
        Some(v) => v.as_i64().ok_or_else(|| {
            QueryError::invalid_data_type(format!(
                "`{}` expects an integer argument at position {}",
                method.name(),
                index
            ))
        }),
    }
}

/// Invoke a known method on evaluated arguments.
pub fn call(method: &Method, args: &[Value]) -> QueryResult<Value> {
    match method {
        Method::ObjectEquals => {
            let (a, b) = (args.first(), args.get(1));
            Ok(Value::Bool(match (a, b) {
                (Some(a), Some(b)) => a.loose_eq(b),
                _ => false,
            }))
        }
        Method::StringContains | Method::StartsWith | Method::EndsWith => {
            let (Some(s), Some(sub)) = (string_arg(method, args, 0)?, string_arg(method, args, 1)?)
            else {
                return Ok(Value::Null);
            };
            Ok(Value::Bool(match method {
                Method::StringContains => s.contains(sub),
                Method::StartsWith => s.starts_with(sub),
                _ => s.ends_with(sub),
            }))
        }
        Method::ToLower | Method::ToUpper => Ok(match string_arg(method, args, 0)? {
            None => Value::Null,
            Some(s) if *method == Method::ToLower => Value::String(s.to_lowercase()),
            Some(s) => Value::String(s.to_uppercase()),
        }),
        Method::ListContains => {
            let item = args.get(1).unwrap_or(&Value::Null);
            Ok(Value::Bool(
                args.first()
                    .and_then(Value::as_list)
                    .is_some_and(|items| items.iter().any(|i| i.loose_eq(item))),
            ))
        }
        Method::MakeDateTime => {
            let part = |i: usize, default: i64| -> QueryResult<u32> {
                u32::try_from(int_arg(method, args, i, default)?).map_err(|_| {
                    QueryError::invalid_data_type("Date components must be non-negative")
                })
            };
            let year = i32::try_from(int_arg(method, args, 0, 1)?)
                .map_err(|_| QueryError::invalid_data_type("Year is out of range"))?;
            Utc.with_ymd_and_hms(year, part(1, 1)?, part(2, 1)?, part(3, 0)?, part(4, 0)?, part(5, 0)?)
                .single()
                .map(Value::DateTime)
                .ok_or_else(|| QueryError::invalid_data_type("Invalid date components"))
        }
        Method::EfProperty | Method::VectorSearchScore | Method::Other(_) => Err(
            QueryError::translation_failed_because(method.name(), "the method can only be translated to the server"),
        ),
    }
}

/// Result type of a numeric aggregate over values of `kind`.
pub fn sum_kind(kind: ScalarKind) -> ScalarKind {
    match kind {
        ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::Double => kind,
        _ => ScalarKind::Double,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRef;
    use chrono::Datelike;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_closed_detection() {
        assert!(is_closed(&Expr::date(2024, 1, 1)));
        assert!(is_closed(&Expr::constant(1).add(Expr::constant(2))));
        assert!(!is_closed(&Expr::param("x").member("Year")));
        assert!(!is_closed(&Expr::query_param(
            "__p_0",
            TypeRef::scalar(ScalarKind::Int32)
        )));
    }

    #[test]
    fn test_fold_date_construction() {
        let value = try_evaluate(&Expr::date(2024, 1, 1)).unwrap();
        match value {
            Value::DateTime(d) => {
                assert_eq!((d.year(), d.month(), d.day()), (2024, 1, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_promotion_and_overflow() {
        assert_eq!(
            binary(BinaryOp::Add, &Value::Int32(2), &Value::Int64(3)).unwrap(),
            Value::Int64(5)
        );
        assert_eq!(
            binary(BinaryOp::Multiply, &Value::Int32(2), &Value::Double(1.5)).unwrap(),
            Value::Double(3.0)
        );
        assert!(binary(BinaryOp::Add, &Value::Int32(i32::MAX), &Value::Int32(1)).is_err());
        assert_eq!(
            binary(BinaryOp::Add, &Value::from("a"), &Value::Int32(1)).unwrap(),
            Value::from("a1")
        );
    }

    #[test]
    fn test_null_comparisons_are_false() {
        assert_eq!(
            binary(BinaryOp::LessThan, &Value::Null, &Value::Int32(1)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            binary(BinaryOp::Equal, &Value::Null, &Value::Null).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary(BinaryOp::Coalesce, &Value::Null, &Value::Int32(7)).unwrap(),
            Value::Int32(7)
        );
    }

    #[test]
    fn test_missing_parameter() {
        let expr = Expr::query_param("__p_0", TypeRef::scalar(ScalarKind::Int32));
        let err = evaluate(&expr, None).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::MissingParameter);

        let params = ParameterValues::new().with("__p_0", 4);
        assert_eq!(evaluate(&expr, Some(&params)).unwrap(), Value::Int32(4));
    }

    #[test]
    fn test_parameters_bind_by_exact_name() {
        let expr = Expr::query_param("year", TypeRef::scalar(ScalarKind::Int32));
        let params = ParameterValues::new().with("year", 1999).with("__year", 2001);
        assert_eq!(evaluate(&expr, Some(&params)).unwrap(), Value::Int32(1999));

        let err = evaluate(&expr, Some(&ParameterValues::new().with("__year", 2001))).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::MissingParameter);
    }

    #[test]
    fn test_string_methods() {
        let expr = Expr::constant("Hello").starts_with(Expr::constant("He"));
        assert_eq!(try_evaluate(&expr), Some(Value::Bool(true)));
        assert_eq!(
            call(&Method::ToUpper, &[Value::from("abc")]).unwrap(),
            Value::from("ABC")
        );
    }
}
