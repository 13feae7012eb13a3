//! Strategy oracle: an opaque, possibly probabilistic decision maker.

use crate::types::Strategy;
use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyResult, Priority};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Run metadata handed to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    /// Priority tier of the work.
    pub priority: Priority,
    /// In `[0, 1]`.
    pub urgency: f64,
    /// In `[0, 1]`.
    pub complexity: f64,
    /// Agents that would take part, when known.
    pub participants: usize,
    /// Labels the caller will accept. Empty means any strategy label.
    pub options: Vec<String>,
    /// Free-form caller data.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Default for DecisionContext {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            urgency: 0.5,
            complexity: 0.5,
            participants: 1,
            options: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }
}

impl DecisionContext {
    /// Read `priority`, `urgency` and `complexity` out of run parameters.
    pub fn from_parameters(parameters: &serde_json::Value) -> Self {
        let mut ctx = Self::default();
        if let Some(priority) = parameters
            .get("priority")
            .and_then(|p| serde_json::from_value::<Priority>(p.clone()).ok())
        {
            ctx.priority = priority;
        }
        if let Some(urgency) = parameters.get("urgency").and_then(serde_json::Value::as_f64) {
            ctx.urgency = urgency.clamp(0.0, 1.0);
        }
        if let Some(complexity) = parameters.get("complexity").and_then(serde_json::Value::as_f64) {
            ctx.complexity = complexity.clamp(0.0, 1.0);
        }
        ctx.metadata = parameters.clone();
        ctx
    }

    /// Set the participant count.
    pub fn with_participants(mut self, participants: usize) -> Self {
        self.participants = participants;
        self
    }

    /// Restrict the labels the oracle may return.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// A label plus the oracle's confidence in it, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Chosen option.
    pub label: String,
    /// In `[0, 1]`.
    pub confidence: f64,
}

impl Decision {
    /// Decision with `confidence` clamped to `[0, 1]`.
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// The decision as a strategy, if the label names one.
    pub fn strategy(&self) -> Option<Strategy> {
        Strategy::from_label(&self.label)
    }
}

/// External decision maker. Callers must not assume determinism.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Pick a label for `decision_type` given `context`.
    async fn decide(&self, decision_type: &str, context: &DecisionContext) -> ConvoyResult<Decision>;
}

/// Returns a fixed label per decision type. For tests and dry runs.
#[derive(Debug, Clone)]
pub struct FixedOracle {
    default: Decision,
    per_type: HashMap<String, Decision>,
}

impl FixedOracle {
    /// Oracle answering `label` for every decision type.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            default: Decision::new(label, 1.0),
            per_type: HashMap::new(),
        }
    }

    /// Oracle answering `strategy` for every decision type.
    pub fn strategy(strategy: Strategy) -> Self {
        Self::new(strategy.as_str())
    }

    /// Answer `decision_type` with `label` instead of the default.
    pub fn with(mut self, decision_type: impl Into<String>, label: impl Into<String>) -> Self {
        self.per_type
            .insert(decision_type.into(), Decision::new(label, 1.0));
        self
    }
}

#[async_trait]
impl DecisionOracle for FixedOracle {
    async fn decide(&self, decision_type: &str, _context: &DecisionContext) -> ConvoyResult<Decision> {
        Ok(self
            .per_type
            .get(decision_type)
            .unwrap_or(&self.default)
            .clone())
    }
}

/// Records every request and answers from a script, then fails.
#[derive(Default)]
pub struct ScriptedOracle {
    answers: Mutex<Vec<Decision>>,
    calls: Mutex<Vec<(String, DecisionContext)>>,
}

impl ScriptedOracle {
    /// Oracle replaying `labels` in order.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut answers: Vec<Decision> = labels.into_iter().map(|l| Decision::new(l, 1.0)).collect();
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Decision types asked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, decision_type: &str, context: &DecisionContext) -> ConvoyResult<Decision> {
        self.calls
            .lock()
            .push((decision_type.to_string(), context.clone()));
        self.answers
            .lock()
            .pop()
            .ok_or_else(|| ConvoyError::ServiceUnavailable("decision oracle exhausted".into()))
    }
}

/// Weighted random choice over the offered labels.
///
/// Every option starts at weight 1. Urgency favours `parallel`, complexity
/// favours `hierarchical`, a large fleet favours `distributed`, and `critical`
/// priority favours `sequential`.
#[derive(Debug, Clone, Default)]
pub struct WeightedOracle;

impl WeightedOracle {
    /// Weighted random oracle.
    pub fn new() -> Self {
        Self
    }

    fn weights(context: &DecisionContext) -> Vec<(String, f64)> {
        let options: Vec<String> = if context.options.is_empty() {
            Strategy::ALL.iter().map(|s| s.as_str().to_string()).collect()
        } else {
            context.options.clone()
        };
        options
            .into_iter()
            .map(|label| {
                let boost = match label.as_str() {
                    "parallel" => context.urgency * 2.0,
                    "hierarchical" => context.complexity * 2.0,
                    "distributed" if context.participants >= 3 => 1.0,
                    "sequential" if context.priority == Priority::Critical => 1.5,
                    _ => 0.0,
                };
                (label, 1.0 + boost)
            })
            .collect()
    }
}

#[async_trait]
impl DecisionOracle for WeightedOracle {
    async fn decide(&self, decision_type: &str, context: &DecisionContext) -> ConvoyResult<Decision> {
        let weights = Self::weights(context);
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if weights.is_empty() || total <= 0.0 {
            return Err(ConvoyError::ServiceUnavailable(format!(
                "no options for decision {decision_type}"
            )));
        }
        let mut pick = rand::thread_rng().gen_range(0.0..total);
        for (label, weight) in &weights {
            if pick < *weight {
                return Ok(Decision::new(label.clone(), weight / total));
            }
            pick -= weight;
        }
        let (label, weight) = &weights[weights.len() - 1];
        Ok(Decision::new(label.clone(), weight / total))
    }
}
