//! Role handlers: the code that actually performs an agent's work.

use crate::types::AgentRole;
use async_trait::async_trait;
use convoy_core::{AgentId, ConvoyResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a handler gets to see about the work it is asked to do.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Phase name, job type or collaboration task.
    pub task: String,
    /// Agent doing the work.
    pub agent_id: AgentId,
    /// Role the agent is working as.
    pub role: AgentRole,
    /// Set when the work belongs to a workflow run.
    pub run_id: Option<Uuid>,
    /// Caller-supplied parameters or job data.
    pub parameters: serde_json::Value,
    /// Results of earlier phases (or dependency jobs), keyed by name.
    pub prior_results: serde_json::Map<String, serde_json::Value>,
    /// Strategy-specific extras such as a partner's result.
    pub extra: serde_json::Value,
}

impl TaskContext {
    /// Context with empty parameters and no run.
    pub fn new(task: impl Into<String>, agent_id: AgentId, role: AgentRole) -> Self {
        Self {
            task: task.into(),
            agent_id,
            role,
            run_id: None,
            parameters: serde_json::Value::Null,
            prior_results: serde_json::Map::new(),
            extra: serde_json::Value::Null,
        }
    }

    /// Tie the work to a workflow run.
    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Set the caller-supplied parameters.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Results of earlier phases, keyed by phase name.
    pub fn with_prior_results(mut self, prior: serde_json::Map<String, serde_json::Value>) -> Self {
        self.prior_results = prior;
        self
    }

    /// Strategy-specific extra input.
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }
}

/// Performs work on behalf of every agent of one role.
///
/// The returned JSON is the phase result that success criteria inspect. A
/// result carrying `"success": false` marks the work unsuccessful without
/// failing the call.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Do the work described by `ctx`.
    async fn execute(&self, ctx: TaskContext) -> ConvoyResult<serde_json::Value>;
}

/// Returns a fixed JSON document for every call.
#[derive(Debug, Clone)]
pub struct StaticHandler {
    result: serde_json::Value,
}

impl StaticHandler {
    /// Handler that returns `result` for every task.
    pub fn new(result: serde_json::Value) -> Self {
        Self { result }
    }
}

#[async_trait]
impl TaskHandler for StaticHandler {
    async fn execute(&self, _ctx: TaskContext) -> ConvoyResult<serde_json::Value> {
        Ok(self.result.clone())
    }
}

/// Role-keyed handler lookup. One handler per role; later registrations win.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<AgentRole, Arc<dyn TaskHandler>>>,
}

impl HandlerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `role`, replacing any earlier one.
    pub fn register(&self, role: AgentRole, handler: Arc<dyn TaskHandler>) {
        if self.handlers.write().insert(role, handler).is_some() {
            tracing::debug!(%role, "Replaced role handler");
        }
    }

    /// Handler for `role`, if registered.
    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(&role).cloned()
    }

    /// Roles that have a handler.
    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles: Vec<_> = self.handlers.read().keys().copied().collect();
        roles.sort();
        roles
    }
}
