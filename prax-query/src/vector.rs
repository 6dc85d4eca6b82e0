//! Vector search options.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{QueryError, QueryResult};
use crate::eval::evaluate;
use crate::expr::Expr;
use crate::parameters::ParameterValues;
use crate::value::Value;

/// Record type name used when options travel inside an expression.
pub const VECTOR_OPTIONS_TYPE: &str = "VectorQueryOptions";

/// Options of a `VectorSearch` call.
///
/// `exact` and `number_of_candidates` are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorQueryOptions {
    /// Name of the index to search; resolved from the model when absent.
    pub index_name: Option<SmolStr>,
    /// Candidates considered by approximate search.
    pub number_of_candidates: Option<i64>,
    /// Run an exact (ENN) search.
    pub exact: bool,
    /// Filter applied before scoring, as a predicate lambda.
    pub pre_filter: Option<Expr>,
}

impl VectorQueryOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Search the named index.
    pub fn index(mut self, name: impl Into<SmolStr>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Set the candidate count.
    pub fn candidates(mut self, count: i64) -> Self {
        self.number_of_candidates = Some(count);
        self
    }

    /// Request exact search.
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    /// Filter documents before scoring.
    pub fn pre_filter(mut self, predicate: Expr) -> Self {
        self.pre_filter = Some(predicate);
        self
    }

    /// Reject mutually exclusive settings.
    pub fn validate(&self) -> QueryResult<()> {
        if self.exact && self.number_of_candidates.is_some() {
            return Err(QueryError::conflicting_vector_options());
        }
        Ok(())
    }

    /// Encode the options as a record construction expression.
    pub fn to_expr(&self) -> Expr {
        let mut args = vec![];
        if let Some(name) = &self.index_name {
            args.push(("IndexName", Expr::constant(name.as_str())));
        }
        if let Some(count) = self.number_of_candidates {
            args.push(("NumberOfCandidates", Expr::constant(count)));
        }
        if self.exact {
            args.push(("Exact", Expr::constant(true)));
        }
        if let Some(filter) = &self.pre_filter {
            args.push(("PreFilter", filter.clone()));
        }
        Expr::new_record(VECTOR_OPTIONS_TYPE, args)
    }

    /// Decode options from the argument of a `VectorSearch` call.
    ///
    /// A null constant means default options. Members other than the
    /// pre-filter are evaluated, so they may reference query parameters.
    pub fn from_expr(expr: &Expr, parameters: Option<&ParameterValues>) -> QueryResult<Self> {
        let args = match expr {
            Expr::Constant(Value::Null) => return Ok(Self::default()),
            Expr::New { type_name, args } | Expr::MemberInit {
                type_name,
                bindings: args,
            } if type_name == VECTOR_OPTIONS_TYPE => args,
            other => {
                return Err(QueryError::translation_failed_because(
                    other,
                    "vector search options must be a VectorQueryOptions construction",
                ));
            }
        };

        let mut options = Self::default();
        for arg in args {
            match arg.name.as_str() {
                "PreFilter" => {
                    if !matches!(arg.expr, Expr::Constant(Value::Null)) {
                        options.pre_filter = Some(arg.expr.clone());
                    }
                }
                "IndexName" => {
                    options.index_name = match evaluate(&arg.expr, parameters)? {
                        Value::Null => None,
                        Value::String(s) => Some(SmolStr::new(s)),
                        other => return Err(option_type_error("IndexName", &other)),
                    }
                }
                "NumberOfCandidates" => {
                    options.number_of_candidates = match evaluate(&arg.expr, parameters)? {
                        Value::Null => None,
                        other => Some(
                            other
                                .as_i64()
                                .ok_or_else(|| option_type_error("NumberOfCandidates", &other))?,
                        ),
                    }
                }
                "Exact" => {
                    options.exact = match evaluate(&arg.expr, parameters)? {
                        Value::Null => false,
                        Value::Bool(b) => b,
                        other => return Err(option_type_error("Exact", &other)),
                    }
                }
                other => {
                    return Err(QueryError::translation_failed_because(
                        format!("{}.{}", VECTOR_OPTIONS_TYPE, other),
                        "unknown vector search option",
                    ));
                }
            }
        }
        Ok(options)
    }
}

fn option_type_error(option: &str, value: &Value) -> QueryError {
    QueryError::invalid_data_type(format!(
        "Vector search option `{}` cannot be {}",
        option,
        value.type_name()
    ))
}
