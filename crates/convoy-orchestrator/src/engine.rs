use crate::config::OrchestratorConfig;
use crate::criteria::CriteriaTable;
use crate::handler::TaskContext;
use crate::oracle::{DecisionContext, DecisionOracle};
use crate::registry::AgentRegistry;
use crate::runs::{RunStore, WorkflowStats};
use crate::templates;
use crate::types::{
    DecisionRecord, Phase, PhaseOutcome, RunStatus, Strategy, WorkflowOutcome, WorkflowRun,
    WorkflowTemplate,
};
use chrono::Utc;
use convoy_bus::CommunicationBus;
use convoy_core::{kinds, BusMessage, ConvoyError, ConvoyResult, Priority, Shutdown};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sender name the orchestrator uses on the bus.
pub const ORCHESTRATOR_SENDER: &str = "orchestrator";

/// Drives workflow runs: template lookup, strategy selection, sequential
/// phase execution and archiving of every run that ends.
pub struct WorkflowOrchestrator {
    config: OrchestratorConfig,
    templates: RwLock<HashMap<String, Arc<WorkflowTemplate>>>,
    criteria: CriteriaTable,
    runs: RunStore,
    registry: AgentRegistry,
    bus: Arc<CommunicationBus>,
    oracle: Arc<dyn DecisionOracle>,
    shutdown: Shutdown,
}

impl WorkflowOrchestrator {
    /// Orchestrator with the built-in success criteria.
    pub fn new(
        config: OrchestratorConfig,
        registry: AgentRegistry,
        bus: Arc<CommunicationBus>,
        oracle: Arc<dyn DecisionOracle>,
    ) -> Self {
        Self::with_criteria(config, registry, bus, oracle, CriteriaTable::default())
    }

    /// Create with a custom success-criteria table.
    pub fn with_criteria(
        config: OrchestratorConfig,
        registry: AgentRegistry,
        bus: Arc<CommunicationBus>,
        oracle: Arc<dyn DecisionOracle>,
        criteria: CriteriaTable,
    ) -> Self {
        let runs = RunStore::new(config.history_capacity);
        Self {
            config,
            templates: RwLock::new(HashMap::new()),
            criteria,
            runs,
            registry,
            bus,
            oracle,
            shutdown: Shutdown::new(),
        }
    }

    /// The agent registry backing phase selection.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// The shared bus used for run events.
    pub fn bus(&self) -> &Arc<CommunicationBus> {
        &self.bus
    }

    pub(crate) fn oracle(&self) -> &Arc<dyn DecisionOracle> {
        &self.oracle
    }

    /// The signal flipped by [`shutdown`](Self::shutdown).
    pub fn shutdown_signal(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Store a template. Names are unique; re-registering is rejected.
    pub fn register_template(&self, template: WorkflowTemplate) -> ConvoyResult<()> {
        templates::validate(&template, &self.criteria)?;
        let mut store = self.templates.write();
        if store.contains_key(&template.name) {
            return Err(ConvoyError::DuplicateTemplate(template.name));
        }
        info!(
            template = %template.name,
            phases = template.phases.len(),
            "Template registered"
        );
        store.insert(template.name.clone(), Arc::new(template));
        Ok(())
    }

    /// A registered template by name.
    pub fn template(&self, name: &str) -> Option<Arc<WorkflowTemplate>> {
        self.templates.read().get(name).cloned()
    }

    /// Registered template names, sorted.
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// An active or archived run.
    pub fn run(&self, id: Uuid) -> Option<WorkflowRun> {
        self.runs.get(id)
    }

    /// Active runs, oldest first.
    pub fn active_runs(&self) -> Vec<WorkflowRun> {
        self.runs.active()
    }

    /// Archived runs, oldest first.
    pub fn history(&self) -> Vec<WorkflowRun> {
        self.runs.history()
    }

    /// Aggregate counts over active and archived runs.
    pub fn workflow_stats(&self) -> WorkflowStats {
        self.runs.stats()
    }

    /// Execute a registered template to completion.
    ///
    /// Only an unknown template or a shut-down orchestrator is an `Err`.
    /// Phase failures come back as an unsuccessful [`WorkflowOutcome`] and
    /// the run is archived either way.
    pub async fn start_workflow(&self, name: &str, parameters: Value) -> ConvoyResult<WorkflowOutcome> {
        if self.shutdown.is_triggered() {
            return Err(ConvoyError::ServiceUnavailable(
                "orchestrator is shutting down".into(),
            ));
        }
        let template = self
            .template(name)
            .ok_or_else(|| ConvoyError::UnknownWorkflowType(name.to_string()))?;

        let run = WorkflowRun::new(&template.name, parameters.clone());
        let run_id = run.id;
        let started = Instant::now();
        self.runs.insert_active(run);
        info!(run_id = %run_id, template = %template.name, "Orchestrator: run started");

        let strategy = self.choose_strategy(run_id, &template, &parameters).await;
        self.publish_update(
            run_id,
            "run_started",
            json!({ "template": template.name, "strategy": strategy }),
        );

        let mut listener = self.shutdown.listener();
        let result = tokio::select! {
            biased;
            () = listener.wait() => Err(ConvoyError::Interrupted("orchestrator shutdown".into())),
            res = self.execute_phases(run_id, &template, &parameters) => res,
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match result {
            Ok(results) => {
                let status = self
                    .runs
                    .archive(run_id, RunStatus::Completed, None)
                    .unwrap_or(RunStatus::Completed);
                if status == RunStatus::Completed {
                    info!(run_id = %run_id, duration_ms, "Orchestrator: run completed");
                    self.publish_update(run_id, "run_completed", json!({ "durationMs": duration_ms }));
                    WorkflowOutcome {
                        run_id,
                        success: true,
                        status,
                        result: Some(Value::Object(results)),
                        error: None,
                        duration_ms,
                    }
                } else {
                    // Shutdown archived the run between the last phase and here.
                    self.interrupted_outcome(run_id, duration_ms)
                }
            }
            Err(ConvoyError::Interrupted(reason)) => {
                self.runs
                    .archive(run_id, RunStatus::Interrupted, Some(reason.clone()));
                warn!(run_id = %run_id, %reason, "Orchestrator: run interrupted");
                self.interrupted_outcome(run_id, duration_ms)
            }
            Err(e) => {
                let message = e.to_string();
                let status = self
                    .runs
                    .archive(run_id, RunStatus::Failed, Some(message.clone()))
                    .unwrap_or(RunStatus::Failed);
                if status == RunStatus::Interrupted {
                    self.interrupted_outcome(run_id, duration_ms)
                } else {
                    error!(run_id = %run_id, kind = e.kind(), error = %message, "Orchestrator: run failed");
                    self.publish_update(run_id, "run_failed", json!({ "error": message }));
                    self.bus.publish(
                        BusMessage::new(
                            kinds::ERROR_REPORT,
                            ORCHESTRATOR_SENDER,
                            json!({ "runId": run_id, "kind": e.kind(), "error": message }),
                        )
                        .with_priority(Priority::High),
                    );
                    WorkflowOutcome {
                        run_id,
                        success: false,
                        status: RunStatus::Failed,
                        result: None,
                        error: Some(message),
                        duration_ms,
                    }
                }
            }
        };
        Ok(outcome)
    }

    fn interrupted_outcome(&self, run_id: Uuid, duration_ms: u64) -> WorkflowOutcome {
        WorkflowOutcome {
            run_id,
            success: false,
            status: RunStatus::Interrupted,
            result: None,
            error: Some(ConvoyError::Interrupted("orchestrator shutdown".into()).to_string()),
            duration_ms,
        }
    }

    /// Ask the oracle how collaboration work in this run should fan out.
    /// Oracle failures fall back to sequential.
    async fn choose_strategy(
        &self,
        run_id: Uuid,
        template: &WorkflowTemplate,
        parameters: &Value,
    ) -> Strategy {
        let mut context = DecisionContext::from_parameters(parameters)
            .with_participants(template.phases.len());
        if parameters.get("complexity").is_none() {
            context.complexity = (template.phases.len() as f64 / 10.0).min(1.0);
        }

        let decision = match self.oracle.decide("execution_strategy", &context).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Strategy oracle unavailable, using sequential");
                self.runs
                    .update_active(run_id, |run| run.strategy = Some(Strategy::Sequential));
                return Strategy::Sequential;
            }
        };
        let strategy = decision.strategy().unwrap_or_else(|| {
            warn!(run_id = %run_id, label = %decision.label, "Unknown strategy label, using sequential");
            Strategy::Sequential
        });
        debug!(run_id = %run_id, %strategy, confidence = decision.confidence, "Strategy chosen");
        self.runs.update_active(run_id, |run| {
            run.strategy = Some(strategy);
            run.decisions.push(DecisionRecord {
                decision_type: "execution_strategy".into(),
                label: decision.label.clone(),
                confidence: decision.confidence,
                decided_at: Utc::now(),
            });
        });
        strategy
    }

    /// Phases in declared order. Any error aborts the run.
    async fn execute_phases(
        &self,
        run_id: Uuid,
        template: &WorkflowTemplate,
        parameters: &Value,
    ) -> ConvoyResult<Map<String, Value>> {
        let mut results = Map::new();
        let mut succeeded: HashMap<&str, bool> = HashMap::new();

        for (index, phase) in template.phases.iter().enumerate() {
            if let Some(missing) = phase
                .dependencies
                .iter()
                .find(|dep| succeeded.get(dep.as_str()) != Some(&true))
            {
                return Err(ConvoyError::DependencyNotMet {
                    phase: phase.name.clone(),
                    dependency: missing.clone(),
                });
            }

            let (value, success) = self.execute_phase(run_id, phase, &results, parameters).await?;

            self.runs.update_active(run_id, |run| run.current_phase = index + 1);
            succeeded.insert(phase.name.as_str(), success);
            results.insert(phase.name.clone(), value);
        }
        Ok(results)
    }

    async fn execute_phase(
        &self,
        run_id: Uuid,
        phase: &Phase,
        prior: &Map<String, Value>,
        parameters: &Value,
    ) -> ConvoyResult<(Value, bool)> {
        let lease = self
            .registry
            .acquire(phase.role, run_id)
            .ok_or_else(|| ConvoyError::AgentUnavailable(phase.role.to_string()))?;
        let agent_id = lease.agent_id();
        let handler = self.registry.handler_for(phase.role).ok_or_else(|| {
            ConvoyError::AgentUnavailable(format!("{} (no handler registered)", phase.role))
        })?;

        info!(run_id = %run_id, phase = %phase.name, agent_id = %agent_id, "Orchestrator: phase started");
        self.publish_update(
            run_id,
            "phase_started",
            json!({ "phase": phase.name, "agentId": agent_id }),
        );

        let ctx = TaskContext::new(phase.name.clone(), agent_id, phase.role)
            .with_run(run_id)
            .with_parameters(parameters.clone())
            .with_prior_results(prior.clone());
        let started = Instant::now();
        let outcome = match phase.timeout().or_else(|| self.config.phase_timeout()) {
            Some(limit) => match tokio::time::timeout(limit, handler.execute(ctx)).await {
                Ok(res) => res,
                Err(_) => Err(ConvoyError::PhaseTimeout {
                    phase: phase.name.clone(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => handler.execute(ctx).await,
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                lease.complete(false);
                self.log_phase(run_id, phase, agent_id, false, json!({ "error": e.to_string() }), duration_ms);
                return Err(e);
            }
        };

        let success = value
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if success {
            if let Some(failed) = self.criteria.first_failure(&phase.success_criteria, &value) {
                warn!(run_id = %run_id, phase = %phase.name, criterion = failed, "Success criterion failed");
                lease.complete(false);
                self.log_phase(run_id, phase, agent_id, false, value, duration_ms);
                return Err(ConvoyError::SuccessCriteriaNotMet(phase.name.clone()));
            }
        } else {
            warn!(run_id = %run_id, phase = %phase.name, "Phase reported unsuccessful result");
        }
        lease.complete(success);

        self.log_phase(run_id, phase, agent_id, success, value.clone(), duration_ms);
        self.publish_update(
            run_id,
            "phase_completed",
            json!({ "phase": phase.name, "success": success, "durationMs": duration_ms }),
        );
        info!(run_id = %run_id, phase = %phase.name, success, duration_ms, "Orchestrator: phase completed");
        Ok((value, success))
    }

    fn log_phase(
        &self,
        run_id: Uuid,
        phase: &Phase,
        agent_id: Uuid,
        success: bool,
        result: Value,
        duration_ms: u64,
    ) {
        self.runs.update_active(run_id, |run| {
            run.phase_log.push(PhaseOutcome {
                phase: phase.name.clone(),
                agent_id: Some(agent_id),
                success,
                result,
                duration_ms,
                finished_at: Utc::now(),
            });
        });
    }

    fn publish_update(&self, run_id: Uuid, event: &str, extra: Value) {
        let mut content = json!({ "event": event, "runId": run_id });
        if let (Some(obj), Value::Object(more)) = (content.as_object_mut(), extra) {
            obj.extend(more);
        }
        self.bus.publish(BusMessage::new(
            kinds::WORKFLOW_UPDATE,
            ORCHESTRATOR_SENDER,
            content,
        ));
    }

    /// Interrupt every active run, then stop the bus.
    ///
    /// In-flight `start_workflow` calls return an interrupted outcome. New
    /// runs are refused afterwards.
    pub async fn shutdown(&self) {
        info!("Orchestrator: shutting down");
        self.shutdown.trigger();
        let interrupted = self.runs.interrupt_all("orchestrator shutdown");
        for run_id in &interrupted {
            self.publish_update(*run_id, "run_interrupted", json!({}));
        }
        self.bus.shutdown().await;
        info!(interrupted = interrupted.len(), "Orchestrator: shutdown complete");
    }
}
