//! Per-execution parameter values and query context.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::value::Value;

/// Values of the runtime parameters of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterValues {
    values: IndexMap<SmolStr, Value>,
}

impl ParameterValues {
    /// Create an empty set of values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value.
    pub fn set(&mut self, name: impl Into<SmolStr>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Set a value, builder style.
    pub fn with(mut self, name: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Get a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no values are set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over name/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &Value)> {
        self.values.iter()
    }
}

/// State shared by one execution of a compiled query.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// Runtime parameter values.
    pub parameters: ParameterValues,
    /// Whether parameter values may appear in logs.
    pub sensitive_data_logging: bool,
}

impl QueryContext {
    /// Create a context with the given parameters.
    pub fn new(parameters: ParameterValues) -> Self {
        Self {
            parameters,
            sensitive_data_logging: false,
        }
    }

    /// Allow parameter values in logs.
    pub fn with_sensitive_data_logging(mut self, enabled: bool) -> Self {
        self.sensitive_data_logging = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_values() {
        let params = ParameterValues::new().with("__p_0", 1).with("__p_1", "x");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("__p_1"), Some(&Value::from("x")));
        assert!(params.get("missing").is_none());
        let names: Vec<_> = params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["__p_0", "__p_1"]);
    }
}
