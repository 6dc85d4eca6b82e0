//! Query operators and result cardinality classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// How many results a query produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCardinality {
    /// Exactly one value; an empty result is an error.
    Single,
    /// At most one value; an empty result yields the default.
    SingleOrDefault,
    /// Any number of values.
    Enumerable,
}

/// Overload shape of an operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Overload {
    /// Called with no lambda argument.
    WithoutPredicate,
    /// Called with a predicate or selector lambda.
    WithPredicate,
}

/// A queryable operator applied to a source sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryOperator {
    Where,
    Select,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Skip,
    Take,
    Distinct,
    OfType,
    Include,
    VectorSearch,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
    ElementAt,
    ElementAtOrDefault,
    Count,
    LongCount,
    Any,
    All,
    Contains,
    Sum,
    Average,
    Min,
    Max,
    /// An operator the provider does not translate (e.g. `GroupBy`, `Join`).
    Unsupported(SmolStr),
}

/// The fixed cardinality table.
///
/// Operators missing from the table are [`ResultCardinality::Enumerable`].
pub const CARDINALITY_TABLE: &[(&str, Overload, ResultCardinality)] = {
    use Overload::*;
    use ResultCardinality::*;
    &[
        ("First", WithoutPredicate, Single),
        ("First", WithPredicate, Single),
        ("FirstOrDefault", WithoutPredicate, SingleOrDefault),
        ("FirstOrDefault", WithPredicate, SingleOrDefault),
        ("Single", WithoutPredicate, Single),
        ("Single", WithPredicate, Single),
        ("SingleOrDefault", WithoutPredicate, SingleOrDefault),
        ("SingleOrDefault", WithPredicate, SingleOrDefault),
        ("Last", WithoutPredicate, Single),
        ("Last", WithPredicate, Single),
        ("LastOrDefault", WithoutPredicate, SingleOrDefault),
        ("LastOrDefault", WithPredicate, SingleOrDefault),
        ("ElementAt", WithoutPredicate, Single),
        ("ElementAtOrDefault", WithoutPredicate, SingleOrDefault),
        ("Count", WithoutPredicate, Single),
        ("Count", WithPredicate, Single),
        ("LongCount", WithoutPredicate, Single),
        ("LongCount", WithPredicate, Single),
        ("Any", WithoutPredicate, Single),
        ("Any", WithPredicate, Single),
        ("All", WithPredicate, Single),
        ("Contains", WithoutPredicate, Single),
        ("Sum", WithoutPredicate, Single),
        ("Sum", WithPredicate, Single),
        ("Average", WithoutPredicate, Single),
        ("Average", WithPredicate, Single),
        ("Min", WithoutPredicate, Single),
        ("Min", WithPredicate, Single),
        ("Max", WithoutPredicate, Single),
        ("Max", WithPredicate, Single),
    ]
};

impl QueryOperator {
    /// Look up an operator by name; unknown names are [`QueryOperator::Unsupported`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "Where" => Self::Where,
            "Select" => Self::Select,
            "OrderBy" => Self::OrderBy,
            "OrderByDescending" => Self::OrderByDescending,
            "ThenBy" => Self::ThenBy,
            "ThenByDescending" => Self::ThenByDescending,
            "Skip" => Self::Skip,
            "Take" => Self::Take,
            "Distinct" => Self::Distinct,
            "OfType" => Self::OfType,
            "Include" => Self::Include,
            "VectorSearch" => Self::VectorSearch,
            "First" => Self::First,
            "FirstOrDefault" => Self::FirstOrDefault,
            "Single" => Self::Single,
            "SingleOrDefault" => Self::SingleOrDefault,
            "Last" => Self::Last,
            "LastOrDefault" => Self::LastOrDefault,
            "ElementAt" => Self::ElementAt,
            "ElementAtOrDefault" => Self::ElementAtOrDefault,
            "Count" => Self::Count,
            "LongCount" => Self::LongCount,
            "Any" => Self::Any,
            "All" => Self::All,
            "Contains" => Self::Contains,
            "Sum" => Self::Sum,
            "Average" => Self::Average,
            "Min" => Self::Min,
            "Max" => Self::Max,
            other => Self::Unsupported(SmolStr::new(other)),
        }
    }

    /// Operator name.
    pub fn name(&self) -> &str {
        match self {
            Self::Where => "Where",
            Self::Select => "Select",
            Self::OrderBy => "OrderBy",
            Self::OrderByDescending => "OrderByDescending",
            Self::ThenBy => "ThenBy",
            Self::ThenByDescending => "ThenByDescending",
            Self::Skip => "Skip",
            Self::Take => "Take",
            Self::Distinct => "Distinct",
            Self::OfType => "OfType",
            Self::Include => "Include",
            Self::VectorSearch => "VectorSearch",
            Self::First => "First",
            Self::FirstOrDefault => "FirstOrDefault",
            Self::Single => "Single",
            Self::SingleOrDefault => "SingleOrDefault",
            Self::Last => "Last",
            Self::LastOrDefault => "LastOrDefault",
            Self::ElementAt => "ElementAt",
            Self::ElementAtOrDefault => "ElementAtOrDefault",
            Self::Count => "Count",
            Self::LongCount => "LongCount",
            Self::Any => "Any",
            Self::All => "All",
            Self::Contains => "Contains",
            Self::Sum => "Sum",
            Self::Average => "Average",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Unsupported(name) => name,
        }
    }

    /// Check if the provider translates this operator.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// Operators that end the chain and pick one element.
    pub fn is_element_operator(&self) -> bool {
        matches!(
            self,
            Self::First
                | Self::FirstOrDefault
                | Self::Single
                | Self::SingleOrDefault
                | Self::Last
                | Self::LastOrDefault
                | Self::ElementAt
                | Self::ElementAtOrDefault
        )
    }

    /// Operators that reduce the sequence to one scalar.
    pub fn is_scalar_aggregate(&self) -> bool {
        matches!(
            self,
            Self::Count
                | Self::LongCount
                | Self::Any
                | Self::All
                | Self::Contains
                | Self::Sum
                | Self::Average
                | Self::Min
                | Self::Max
        )
    }

    /// Operators after which no other operator may follow.
    pub fn is_terminal(&self) -> bool {
        self.is_element_operator() || self.is_scalar_aggregate()
    }

    /// Operators whose single argument is a lambda predicate or selector.
    pub fn takes_lambda(&self) -> bool {
        !matches!(
            self,
            Self::Skip
                | Self::Take
                | Self::Distinct
                | Self::OfType
                | Self::ElementAt
                | Self::ElementAtOrDefault
                | Self::Contains
                | Self::Unsupported(_)
        )
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify the result cardinality of a call through [`CARDINALITY_TABLE`].
pub fn classify(operator: &QueryOperator, overload: Overload) -> ResultCardinality {
    let name = operator.name();
    CARDINALITY_TABLE
        .iter()
        .find(|(op, shape, _)| *op == name && *shape == overload)
        .map(|(_, _, cardinality)| *cardinality)
        .unwrap_or(ResultCardinality::Enumerable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_documented_rows() {
        use Overload::*;
        assert_eq!(
            classify(&QueryOperator::First, WithoutPredicate),
            ResultCardinality::Single
        );
        assert_eq!(
            classify(&QueryOperator::FirstOrDefault, WithPredicate),
            ResultCardinality::SingleOrDefault
        );
        assert_eq!(
            classify(&QueryOperator::Where, WithPredicate),
            ResultCardinality::Enumerable
        );
        assert_eq!(
            classify(&QueryOperator::Count, WithoutPredicate),
            ResultCardinality::Single
        );
    }

    #[test]
    fn test_unknown_operator_round_trips_name() {
        let op = QueryOperator::from_name("GroupBy");
        assert_eq!(op, QueryOperator::Unsupported("GroupBy".into()));
        assert!(!op.is_supported());
        assert_eq!(op.to_string(), "GroupBy");
        assert_eq!(
            classify(&op, Overload::WithPredicate),
            ResultCardinality::Enumerable
        );
    }

    #[test]
    fn test_names_match_table_entries() {
        for (name, _, _) in CARDINALITY_TABLE {
            assert!(QueryOperator::from_name(name).is_supported(), "{}", name);
        }
    }
}
