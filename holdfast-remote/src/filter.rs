//! Equality filters for remote queries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conjunction of `column = value` conditions with an optional row limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl Filter {
    /// A filter that matches every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter with a single `column = value` condition.
    pub fn by(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().eq(column, value)
    }

    /// Adds a `column = value` condition.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// Caps the number of rows returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the row limit, if any.
    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Returns the conditions in insertion order.
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Returns true if `row` satisfies every condition.
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(col, expected)| row.get(col) == Some(expected))
    }

    /// Conditions rendered as `(column, value)` strings, for cache keys.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .conditions
            .iter()
            .map(|(c, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (c.clone(), v)
            })
            .collect();
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&json!({"a": 1})));
    }

    #[test]
    fn conditions_are_conjunctive() {
        let f = Filter::by("id", "e1").eq("user_id", "u1");
        assert!(f.matches(&json!({"id": "e1", "user_id": "u1", "x": 0})));
        assert!(!f.matches(&json!({"id": "e1", "user_id": "u2"})));
        assert!(!f.matches(&json!({"user_id": "u1"})));
    }

    #[test]
    fn params_include_limit() {
        let f = Filter::by("goal_id", 7).limit(10);
        assert_eq!(
            f.params(),
            vec![
                ("goal_id".to_string(), "7".to_string()),
                ("limit".to_string(), "10".to_string())
            ]
        );
    }
}
