//! Multi-agent collaboration on a single task, fanned out by strategy.
//!
//! Independent of template phase execution: phases always run in order,
//! while a collaboration request branches on its strategy.

use crate::engine::{WorkflowOrchestrator, ORCHESTRATOR_SENDER};
use crate::handler::TaskContext;
use crate::oracle::DecisionContext;
use crate::types::{DecisionRecord, Strategy};
use chrono::Utc;
use convoy_bus::{agent_channel_name, ChannelConfig, ChannelKind};
use convoy_core::{kinds, AgentId, BusMessage, ConvoyError, ConvoyResult};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A task to be worked on by several agents together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationRequest {
    /// Task label handed to every handler.
    pub task: String,
    /// Participants in order. The first one leads hierarchical work.
    pub agents: Vec<AgentId>,
    /// Parameters passed to each sub-task.
    #[serde(default)]
    pub input: Value,
    /// Skip the oracle and use this strategy.
    #[serde(default)]
    pub strategy: Option<Strategy>,
    /// Oracle input. Derived from `input` when absent.
    #[serde(default)]
    pub context: Option<DecisionContext>,
}

impl CollaborationRequest {
    /// A request with no input, leaving the strategy to the oracle.
    pub fn new(task: impl Into<String>, agents: Vec<AgentId>) -> Self {
        Self {
            task: task.into(),
            agents,
            input: Value::Null,
            strategy: None,
            context: None,
        }
    }

    /// Set the parameters passed to each sub-task.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Skip the oracle and use `strategy`.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// One agent's share of a collaboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    /// Agent that did the work.
    pub agent_id: AgentId,
    /// Handler result, when the handler returned one.
    pub result: Option<Value>,
    /// Error text when the sub-task failed outright.
    pub error: Option<String>,
    /// Wall time spent in the handler.
    pub duration_ms: u64,
}

impl Contribution {
    /// No error, and the handler did not report `"success": false`.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self
                .result
                .as_ref()
                .and_then(|r| r.get("success"))
                .and_then(Value::as_bool)
                != Some(false)
    }
}

/// What a collaboration produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationOutcome {
    /// Strategy that was executed.
    pub strategy: Strategy,
    /// Oracle decisions taken along the way.
    pub decisions: Vec<DecisionRecord>,
    /// One entry per sub-task, in agent order.
    pub contributions: Vec<Contribution>,
    /// Every contribution succeeded.
    pub success: bool,
}

impl WorkflowOrchestrator {
    /// Run `request.task` across its agents and join every sub-task before
    /// returning.
    pub async fn collaborate(&self, request: CollaborationRequest) -> ConvoyResult<CollaborationOutcome> {
        if request.agents.is_empty() {
            return Err(ConvoyError::AgentUnavailable(format!(
                "no agents supplied for {}",
                request.task
            )));
        }
        if let Some(unknown) = request
            .agents
            .iter()
            .find(|id| self.registry().get(**id).is_none())
        {
            return Err(ConvoyError::UnknownAgent(unknown.to_string()));
        }

        let context = request
            .context
            .clone()
            .unwrap_or_else(|| DecisionContext::from_parameters(&request.input))
            .with_participants(request.agents.len());
        let mut decisions = Vec::new();
        let strategy = match request.strategy {
            Some(strategy) => strategy,
            None => {
                let label = self.decide("collaboration_strategy", &context, &mut decisions).await;
                label
                    .as_deref()
                    .and_then(Strategy::from_label)
                    .unwrap_or(Strategy::Sequential)
            }
        };
        info!(task = %request.task, %strategy, agents = request.agents.len(), "Collaboration started");

        let contributions = match strategy {
            Strategy::Sequential => self.run_sequential(&request).await,
            Strategy::Parallel => self.run_parallel(&request).await,
            Strategy::Hierarchical => self.run_hierarchical(&request, &context, &mut decisions).await,
            Strategy::Distributed => self.run_distributed(&request).await,
            Strategy::Adaptive => self.run_adaptive(&request, &context, &mut decisions).await,
        };

        let success = !contributions.is_empty() && contributions.iter().all(Contribution::succeeded);
        info!(task = %request.task, %strategy, success, "Collaboration finished");
        Ok(CollaborationOutcome {
            strategy,
            decisions,
            contributions,
            success,
        })
    }

    /// Oracle call that records its decision. `None` on oracle failure.
    async fn decide(
        &self,
        decision_type: &str,
        context: &DecisionContext,
        decisions: &mut Vec<DecisionRecord>,
    ) -> Option<String> {
        match self.oracle().decide(decision_type, context).await {
            Ok(decision) => {
                decisions.push(DecisionRecord {
                    decision_type: decision_type.to_string(),
                    label: decision.label.clone(),
                    confidence: decision.confidence,
                    decided_at: Utc::now(),
                });
                Some(decision.label)
            }
            Err(e) => {
                warn!(decision_type, error = %e, "Oracle unavailable");
                None
            }
        }
    }

    /// One agent's sub-task. Failures are captured, never propagated.
    async fn contribute(&self, agent: AgentId, request: &CollaborationRequest, extra: Value) -> Contribution {
        let started = Instant::now();
        let outcome: ConvoyResult<Value> = async {
            let info = self
                .registry()
                .get(agent)
                .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
            let handler = self.registry().handler_for(info.role).ok_or_else(|| {
                ConvoyError::AgentUnavailable(format!("{} (no handler registered)", info.role))
            })?;
            let ctx = TaskContext::new(request.task.clone(), agent, info.role)
                .with_parameters(request.input.clone())
                .with_extra(extra);
            handler.execute(ctx).await
        }
        .await;
        let elapsed = started.elapsed();

        let success = matches!(&outcome, Ok(v) if v.get("success").and_then(Value::as_bool) != Some(false));
        if let Err(e) = self.registry().record_job(agent, success, elapsed) {
            debug!(agent_id = %agent, error = %e, "Could not record collaboration stats");
        }
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(result) => Contribution {
                agent_id: agent,
                result: Some(result),
                error: None,
                duration_ms,
            },
            Err(e) => {
                warn!(agent_id = %agent, task = %request.task, error = %e, "Collaboration sub-task failed");
                Contribution {
                    agent_id: agent,
                    result: None,
                    error: Some(e.to_string()),
                    duration_ms,
                }
            }
        }
    }

    fn completion_message(&self, request: &CollaborationRequest, contribution: &Contribution) -> BusMessage {
        BusMessage::new(
            kinds::TASK_COMPLETION,
            ORCHESTRATOR_SENDER,
            json!({
                "task": request.task,
                "agentId": contribution.agent_id,
                "result": contribution.result,
                "error": contribution.error,
            }),
        )
    }

    /// Each agent in turn; every result is handed to the next agent.
    async fn run_sequential(&self, request: &CollaborationRequest) -> Vec<Contribution> {
        let mut contributions: Vec<Contribution> = Vec::with_capacity(request.agents.len());
        for (index, agent) in request.agents.iter().enumerate() {
            let previous = contributions
                .last()
                .map(|c| json!({ "agentId": c.agent_id, "result": c.result }))
                .unwrap_or(Value::Null);
            let contribution = self
                .contribute(*agent, request, json!({ "previous": previous }))
                .await;
            if let Some(next) = request.agents.get(index + 1) {
                let message = self.completion_message(request, &contribution).to_agent(*next);
                self.bus().send(*next, &message);
            }
            contributions.push(contribution);
        }
        contributions
    }

    /// All agents at once, each reporting on its own `agent:<id>` channel.
    async fn run_parallel(&self, request: &CollaborationRequest) -> Vec<Contribution> {
        let contributions = join_all(
            request
                .agents
                .iter()
                .map(|agent| self.contribute(*agent, request, Value::Null)),
        )
        .await;
        for contribution in &contributions {
            let channel = agent_channel_name(contribution.agent_id);
            self.bus()
                .ensure_channel(ChannelConfig::new(channel.clone(), ChannelKind::Agent));
            let message = self
                .completion_message(request, contribution)
                .on_channel(channel.clone());
            self.bus().broadcast(&message, &channel);
        }
        contributions
    }

    /// The first agent leads: its oracle decision becomes context for the
    /// followers, which run concurrently.
    async fn run_hierarchical(
        &self,
        request: &CollaborationRequest,
        context: &DecisionContext,
        decisions: &mut Vec<DecisionRecord>,
    ) -> Vec<Contribution> {
        let leader = request.agents[0];
        let followers = &request.agents[1..];
        let directive = self
            .decide("hierarchical_delegation", context, decisions)
            .await
            .unwrap_or_else(|| "delegate".to_string());
        let confidence = decisions
            .last()
            .filter(|d| d.decision_type == "hierarchical_delegation")
            .map(|d| d.confidence)
            .unwrap_or(0.0);
        let extra = json!({ "leader": leader, "directive": directive, "confidence": confidence });

        if followers.is_empty() {
            return vec![self.contribute(leader, request, extra).await];
        }
        let mut contributions = vec![Contribution {
            agent_id: leader,
            result: Some(json!({ "directive": directive, "confidence": confidence })),
            error: None,
            duration_ms: 0,
        }];
        contributions.extend(
            join_all(
                followers
                    .iter()
                    .map(|agent| self.contribute(*agent, request, extra.clone())),
            )
            .await,
        );
        contributions
    }

    /// Every unordered pair collaborates independently; pairs run
    /// concurrently.
    async fn run_distributed(&self, request: &CollaborationRequest) -> Vec<Contribution> {
        let agents = &request.agents;
        if agents.len() == 1 {
            return vec![self.contribute(agents[0], request, Value::Null).await];
        }
        let mut pairs = Vec::new();
        for (i, a) in agents.iter().enumerate() {
            for b in &agents[i + 1..] {
                pairs.push((*a, *b));
            }
        }
        let per_pair = join_all(pairs.into_iter().map(|(a, b)| async move {
            let first = self
                .contribute(a, request, json!({ "partner": b }))
                .await;
            let second = self
                .contribute(
                    b,
                    request,
                    json!({ "partner": a, "partnerResult": first.result }),
                )
                .await;
            [first, second]
        }))
        .await;
        per_pair.into_iter().flatten().collect()
    }

    /// A further oracle call picks an ad-hoc approach for a single agent.
    async fn run_adaptive(
        &self,
        request: &CollaborationRequest,
        context: &DecisionContext,
        decisions: &mut Vec<DecisionRecord>,
    ) -> Vec<Contribution> {
        let approach = self
            .decide("adaptive_strategy", context, decisions)
            .await
            .unwrap_or_else(|| Strategy::Sequential.as_str().to_string());
        vec![
            self.contribute(request.agents[0], request, json!({ "adaptiveStrategy": approach }))
                .await,
        ]
    }
}
