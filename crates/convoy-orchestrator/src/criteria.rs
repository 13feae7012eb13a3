//! Named success predicates evaluated against phase results.

use std::collections::HashMap;

/// A pure check over a phase's result document.
pub type Criterion = fn(&serde_json::Value) -> bool;

/// Registry of success criteria, keyed by the names templates declare.
#[derive(Clone)]
pub struct CriteriaTable {
    criteria: HashMap<String, Criterion>,
}

impl Default for CriteriaTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CriteriaTable {
    /// A table with no criteria at all.
    pub fn empty() -> Self {
        Self {
            criteria: HashMap::new(),
        }
    }

    /// Table holding the built-in criteria.
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        table.register("requirements_documented", requirements_documented);
        table.register("design_approved", |r| flag(r, "approved"));
        table.register("code_compiles", |r| flag(r, "compiled"));
        table.register("tests_passing", tests_passing);
        table.register("no_critical_issues", no_critical_issues);
        table.register("performance_acceptable", performance_acceptable);
        table.register("deployment_verified", |r| flag(r, "deployed"));
        table
    }

    /// Add or replace a criterion.
    pub fn register(&mut self, name: impl Into<String>, criterion: Criterion) {
        self.criteria.insert(name.into(), criterion);
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.criteria.contains_key(name)
    }

    /// `None` when no criterion has this name.
    pub fn evaluate(&self, name: &str, result: &serde_json::Value) -> Option<bool> {
        self.criteria.get(name).map(|check| check(result))
    }

    /// First declared criterion that does not hold. Unknown names fail.
    pub fn first_failure<'a>(&self, names: &'a [String], result: &serde_json::Value) -> Option<&'a str> {
        names
            .iter()
            .find(|name| self.evaluate(name, result) != Some(true))
            .map(String::as_str)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.criteria.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn flag(result: &serde_json::Value, key: &str) -> bool {
    result.get(key).and_then(serde_json::Value::as_bool) == Some(true)
}

fn number(result: &serde_json::Value, key: &str) -> Option<f64> {
    result.get(key).and_then(serde_json::Value::as_f64)
}

fn requirements_documented(result: &serde_json::Value) -> bool {
    result
        .get("requirements")
        .and_then(serde_json::Value::as_array)
        .is_some_and(|reqs| !reqs.is_empty())
}

fn tests_passing(result: &serde_json::Value) -> bool {
    number(result, "test_pass_rate").is_some_and(|rate| rate > 0.9)
}

fn no_critical_issues(result: &serde_json::Value) -> bool {
    match result.get("critical_issues") {
        Some(serde_json::Value::Array(issues)) => issues.is_empty(),
        Some(serde_json::Value::Number(n)) => n.as_u64() == Some(0),
        Some(_) => false,
        None => true,
    }
}

fn performance_acceptable(result: &serde_json::Value) -> bool {
    number(result, "performance_score").is_some_and(|score| score >= 0.7)
}
