//! Fluent construction of queryable operator chains.
//!
//! # Example
//!
//! ```rust
//! use prax_query::{Expr, QueryBuilder, QueryOperator};
//!
//! let query = QueryBuilder::root("Movie")
//!     .filter(Expr::lambda("m", Expr::param("m").member("Year").gt(Expr::constant(2000))))
//!     .order_by(Expr::lambda("m", Expr::param("m").member("Title")))
//!     .take(Expr::constant(10))
//!     .build();
//!
//! let Expr::Query { op, .. } = &query else { unreachable!() };
//! assert_eq!(*op, QueryOperator::Take);
//! ```

use smol_str::SmolStr;

use crate::expr::Expr;
use crate::operators::QueryOperator;
use crate::vector::VectorQueryOptions;

/// Builds an [`Expr`] operator chain one call at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    expr: Expr,
}

impl QueryBuilder {
    /// Start from the root sequence of an entity type.
    pub fn root(entity: impl Into<SmolStr>) -> Self {
        Self {
            expr: Expr::root(entity),
        }
    }

    /// Continue an existing chain.
    pub fn from_expr(expr: Expr) -> Self {
        Self { expr }
    }

    /// Apply any operator.
    pub fn call(self, op: QueryOperator, args: Vec<Expr>) -> Self {
        Self {
            expr: Expr::Query {
                op,
                source: Box::new(self.expr),
                args,
            },
        }
    }

    fn terminal(self, op: QueryOperator, args: Vec<Expr>) -> Expr {
        self.call(op, args).expr
    }

    /// `Where(predicate)`.
    pub fn filter(self, predicate: Expr) -> Self {
        self.call(QueryOperator::Where, vec![predicate])
    }

    /// `Select(selector)`.
    pub fn select(self, selector: Expr) -> Self {
        self.call(QueryOperator::Select, vec![selector])
    }

    /// `OrderBy(key)`.
    pub fn order_by(self, key: Expr) -> Self {
        self.call(QueryOperator::OrderBy, vec![key])
    }

    /// `OrderByDescending(key)`.
    pub fn order_by_descending(self, key: Expr) -> Self {
        self.call(QueryOperator::OrderByDescending, vec![key])
    }

    /// `ThenBy(key)`.
    pub fn then_by(self, key: Expr) -> Self {
        self.call(QueryOperator::ThenBy, vec![key])
    }

    /// `ThenByDescending(key)`.
    pub fn then_by_descending(self, key: Expr) -> Self {
        self.call(QueryOperator::ThenByDescending, vec![key])
    }

    /// `Skip(count)`.
    pub fn skip(self, count: Expr) -> Self {
        self.call(QueryOperator::Skip, vec![count])
    }

    /// `Take(count)`.
    pub fn take(self, count: Expr) -> Self {
        self.call(QueryOperator::Take, vec![count])
    }

    /// `Distinct()`.
    pub fn distinct(self) -> Self {
        self.call(QueryOperator::Distinct, vec![])
    }

    /// `OfType<T>()`.
    pub fn of_type(self, entity: &str) -> Self {
        self.call(QueryOperator::OfType, vec![Expr::constant(entity)])
    }

    /// `Include(navigation)`, as a member chain lambda or a dotted path constant.
    pub fn include(self, navigation: Expr) -> Self {
        self.call(QueryOperator::Include, vec![navigation])
    }

    /// `VectorSearch(selector, vector, limit, options)`.
    pub fn vector_search(
        self,
        selector: Expr,
        vector: Expr,
        limit: Expr,
        options: Option<VectorQueryOptions>,
    ) -> Self {
        let options = options.map(|o| o.to_expr()).unwrap_or_else(Expr::null);
        self.call(
            QueryOperator::VectorSearch,
            vec![selector, vector, limit, options],
        )
    }

    /// The chain built so far.
    pub fn build(self) -> Expr {
        self.expr
    }

    /// `First()`.
    pub fn first(self) -> Expr {
        self.terminal(QueryOperator::First, vec![])
    }

    /// `First(predicate)`.
    pub fn first_where(self, predicate: Expr) -> Expr {
        self.terminal(QueryOperator::First, vec![predicate])
    }

    /// `FirstOrDefault()`.
    pub fn first_or_default(self) -> Expr {
        self.terminal(QueryOperator::FirstOrDefault, vec![])
    }

    /// `FirstOrDefault(predicate)`.
    pub fn first_or_default_where(self, predicate: Expr) -> Expr {
        self.terminal(QueryOperator::FirstOrDefault, vec![predicate])
    }

    /// `Single()`.
    pub fn single(self) -> Expr {
        self.terminal(QueryOperator::Single, vec![])
    }

    /// `SingleOrDefault()`.
    pub fn single_or_default(self) -> Expr {
        self.terminal(QueryOperator::SingleOrDefault, vec![])
    }

    /// `Last()`.
    pub fn last(self) -> Expr {
        self.terminal(QueryOperator::Last, vec![])
    }

    /// `LastOrDefault()`.
    pub fn last_or_default(self) -> Expr {
        self.terminal(QueryOperator::LastOrDefault, vec![])
    }

    /// `ElementAt(index)`.
    pub fn element_at(self, index: Expr) -> Expr {
        self.terminal(QueryOperator::ElementAt, vec![index])
    }

    /// `ElementAtOrDefault(index)`.
    pub fn element_at_or_default(self, index: Expr) -> Expr {
        self.terminal(QueryOperator::ElementAtOrDefault, vec![index])
    }

    /// `Count()`.
    pub fn count(self) -> Expr {
        self.terminal(QueryOperator::Count, vec![])
    }

    /// `Count(predicate)`.
    pub fn count_where(self, predicate: Expr) -> Expr {
        self.terminal(QueryOperator::Count, vec![predicate])
    }

    /// `LongCount()`.
    pub fn long_count(self) -> Expr {
        self.terminal(QueryOperator::LongCount, vec![])
    }

    /// `Any()`.
    pub fn any(self) -> Expr {
        self.terminal(QueryOperator::Any, vec![])
    }

    /// `Any(predicate)`.
    pub fn any_where(self, predicate: Expr) -> Expr {
        self.terminal(QueryOperator::Any, vec![predicate])
    }

    /// `All(predicate)`.
    pub fn all(self, predicate: Expr) -> Expr {
        self.terminal(QueryOperator::All, vec![predicate])
    }

    /// `Contains(item)`.
    pub fn contains(self, item: Expr) -> Expr {
        self.terminal(QueryOperator::Contains, vec![item])
    }

    /// `Sum()` over a scalar sequence.
    pub fn sum(self) -> Expr {
        self.terminal(QueryOperator::Sum, vec![])
    }

    /// `Sum(selector)`.
    pub fn sum_by(self, selector: Expr) -> Expr {
        self.terminal(QueryOperator::Sum, vec![selector])
    }

    /// `Average(selector)`.
    pub fn average_by(self, selector: Expr) -> Expr {
        self.terminal(QueryOperator::Average, vec![selector])
    }

    /// `Min(selector)`.
    pub fn min_by(self, selector: Expr) -> Expr {
        self.terminal(QueryOperator::Min, vec![selector])
    }

    /// `Max(selector)`.
    pub fn max_by(self, selector: Expr) -> Expr {
        self.terminal(QueryOperator::Max, vec![selector])
    }
}

impl From<QueryBuilder> for Expr {
    fn from(builder: QueryBuilder) -> Self {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chain_order() {
        let query = QueryBuilder::root("Movie")
            .skip(Expr::constant(1))
            .take(Expr::constant(2))
            .count();
        assert_eq!(query.to_string(), "DbSet<Movie>.Skip(1).Take(2).Count()");
    }

    #[test]
    fn test_vector_search_defaults_options_to_null() {
        let query = QueryBuilder::root("Movie")
            .vector_search(
                Expr::lambda("m", Expr::param("m").member("Embedding")),
                Expr::constant(vec![0.1f64, 0.2]),
                Expr::constant(5),
                None,
            )
            .build();
        let Expr::Query { args, .. } = query else {
            panic!("expected query");
        };
        assert_eq!(args.len(), 4);
        assert_eq!(args[3], Expr::null());
    }
}
