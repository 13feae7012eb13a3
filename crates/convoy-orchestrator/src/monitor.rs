use crate::config::MonitorConfig;
use crate::engine::WorkflowOrchestrator;
use crate::runs::WorkflowStats;
use crate::types::{AgentInfo, AgentStatus};
use chrono::{DateTime, Utc};
use convoy_bus::{BoundedBuffer, BusStats};
use convoy_core::{kinds, AgentId, BusMessage, Priority, Shutdown, ShutdownListener};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Agents need this many finished jobs before a low success rate alerts.
const ALERT_MIN_JOBS: u64 = 3;

/// One sample of the agent fleet.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSample {
    /// When the sample was taken.
    pub taken_at: DateTime<Utc>,
    /// Idle agents.
    pub idle: usize,
    /// Busy agents.
    pub busy: usize,
    /// Offline agents.
    pub offline: usize,
    /// Mean success rate over all agents. `0.0` with no agents.
    pub average_success_rate: f64,
    /// Per-agent snapshot.
    pub agents: Vec<AgentInfo>,
    /// Agents below the alert success rate.
    pub underperforming: Vec<AgentId>,
}

/// One sample of workflow run statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSample {
    /// When the sample was taken.
    pub taken_at: DateTime<Utc>,
    /// Run counts and averages at sample time.
    pub stats: WorkflowStats,
}

/// One sample of bus health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    /// When the sample was taken.
    pub taken_at: DateTime<Utc>,
    /// Bus counters at sample time.
    pub bus: BusStats,
    /// Runs still in progress.
    pub active_runs: usize,
    /// Whether the bus pump is running.
    pub bus_running: bool,
    /// No send failures since the previous health sample.
    pub healthy: bool,
}

struct Samples {
    agents: BoundedBuffer<AgentSample>,
    workflows: BoundedBuffer<WorkflowSample>,
    health: BoundedBuffer<HealthSample>,
    last_failed_sends: u64,
}

/// Read-only sampler of registry, orchestrator and bus state.
///
/// Three independent cadences (agents, workflows, health); each category
/// keeps only its newest `max_samples` records. Stops on [`stop`](Self::stop)
/// or with the orchestrator's shutdown signal.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    orchestrator: Arc<WorkflowOrchestrator>,
    samples: Mutex<Samples>,
    stop: Shutdown,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceMonitor {
    /// Monitor over `orchestrator`. Call [`Self::start`] to begin sampling.
    pub fn new(config: MonitorConfig, orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        let cap = config.max_samples.max(1);
        Self {
            config,
            orchestrator,
            samples: Mutex::new(Samples {
                agents: BoundedBuffer::new(cap),
                workflows: BoundedBuffer::new(cap),
                health: BoundedBuffer::new(cap),
                last_failed_sends: 0,
            }),
            stop: Shutdown::new(),
            task: Mutex::new(None),
        }
    }

    /// Snapshot every registered agent. Reads only; see [`Self::raise_alerts`].
    pub fn sample_agents(&self) -> AgentSample {
        let agents = self.orchestrator.registry().snapshot();
        let count = |status| agents.iter().filter(|a| a.status == status).count();
        let average_success_rate = if agents.is_empty() {
            0.0
        } else {
            agents.iter().map(|a| a.stats.success_rate).sum::<f64>() / agents.len() as f64
        };
        let underperforming = agents
            .iter()
            .filter(|a| self.is_underperforming(a))
            .map(|a| a.id)
            .collect();
        let sample = AgentSample {
            taken_at: Utc::now(),
            idle: count(AgentStatus::Idle),
            busy: count(AgentStatus::Busy),
            offline: count(AgentStatus::Offline),
            average_success_rate,
            agents,
            underperforming,
        };

        self.samples.lock().agents.push(sample.clone());
        sample
    }

    fn is_underperforming(&self, agent: &AgentInfo) -> bool {
        agent.stats.total_jobs() >= ALERT_MIN_JOBS
            && agent.stats.success_rate < self.config.alert_success_rate
    }

    /// Publish a `performance_alert` for each underperforming agent in a
    /// sample. Called by the sampling loop after each agent sample.
    pub fn raise_alerts(&self, sample: &AgentSample) -> usize {
        let mut raised = 0;
        for agent in sample
            .agents
            .iter()
            .filter(|a| sample.underperforming.contains(&a.id))
        {
            warn!(agent_id = %agent.id, success_rate = agent.stats.success_rate, "Agent underperforming");
            self.orchestrator.bus().publish(
                BusMessage::new(
                    kinds::PERFORMANCE_ALERT,
                    "monitor",
                    serde_json::json!({
                        "agentId": agent.id,
                        "role": agent.role,
                        "successRate": agent.stats.success_rate,
                    }),
                )
                .with_priority(Priority::High),
            );
            raised += 1;
        }
        raised
    }

    /// Record the current workflow stats.
    pub fn sample_workflows(&self) -> WorkflowSample {
        let sample = WorkflowSample {
            taken_at: Utc::now(),
            stats: self.orchestrator.workflow_stats(),
        };
        self.samples.lock().workflows.push(sample.clone());
        sample
    }

    /// Record the current bus health.
    pub fn sample_health(&self) -> HealthSample {
        let bus = self.orchestrator.bus();
        let stats = bus.stats();
        let mut samples = self.samples.lock();
        let healthy = stats.failed_sends <= samples.last_failed_sends;
        samples.last_failed_sends = stats.failed_sends;
        let sample = HealthSample {
            taken_at: Utc::now(),
            active_runs: self.orchestrator.active_runs().len(),
            bus_running: bus.is_running(),
            healthy,
            bus: stats,
        };
        samples.health.push(sample.clone());
        sample
    }

    /// Retained agent samples, oldest first.
    pub fn agent_samples(&self) -> Vec<AgentSample> {
        self.samples.lock().agents.to_vec()
    }

    /// Retained workflow samples, oldest first.
    pub fn workflow_samples(&self) -> Vec<WorkflowSample> {
        self.samples.lock().workflows.to_vec()
    }

    /// Retained health samples, oldest first.
    pub fn health_samples(&self) -> Vec<HealthSample> {
        self.samples.lock().health.to_vec()
    }

    /// Latest sample of each category, for status endpoints.
    pub fn to_json(&self) -> serde_json::Value {
        let samples = self.samples.lock();
        serde_json::json!({
            "agents": samples.agents.iter().last(),
            "workflows": samples.workflows.iter().last(),
            "health": samples.health.iter().last(),
            "samples": {
                "agents": samples.agents.len(),
                "workflows": samples.workflows.len(),
                "health": samples.health.len(),
            }
        })
    }

    /// Spawn the sampling loop. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let orchestrator_down = self.orchestrator.shutdown_signal().listener();
        let stopped = self.stop.listener();
        *task = Some(tokio::spawn(async move {
            monitor.run(orchestrator_down, stopped).await
        }));
    }

    async fn run(&self, mut orchestrator_down: ShutdownListener, mut stopped: ShutdownListener) {
        let mut agents = interval(self.config.agent_interval());
        let mut workflows = interval(self.config.workflow_interval());
        let mut health = interval(self.config.health_interval());
        for timer in [&mut agents, &mut workflows, &mut health] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        info!(
            agent_secs = self.config.agent_interval_secs,
            workflow_secs = self.config.workflow_interval_secs,
            health_secs = self.config.health_interval_secs,
            "Performance monitor started"
        );

        loop {
            tokio::select! {
                biased;
                () = orchestrator_down.wait() => break,
                () = stopped.wait() => break,
                _ = health.tick() => {
                    let sample = self.sample_health();
                    if !sample.healthy {
                        warn!(failed_sends = sample.bus.failed_sends, "Bus reported send failures");
                    }
                }
                _ = agents.tick() => {
                    let sample = self.sample_agents();
                    let alerts = self.raise_alerts(&sample);
                    debug!(idle = sample.idle, busy = sample.busy, alerts, "Agent sample");
                }
                _ = workflows.tick() => {
                    let sample = self.sample_workflows();
                    debug!(active = sample.stats.active, "Workflow sample");
                }
            }
        }
        info!("Performance monitor stopped");
    }

    /// Whether the sampling loop is alive.
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the sampling loop and wait for it to exit.
    pub async fn stop(&self) {
        self.stop.trigger();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Performance monitor ended abnormally");
            }
        }
    }
}
