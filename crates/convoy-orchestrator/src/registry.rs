//! Agent registry: role-tagged agents, best-agent selection, per-agent job
//! queues and busy/idle leasing.

use crate::handler::{HandlerTable, TaskContext, TaskHandler};
use crate::job_queue::JobQueue;
use crate::types::{AgentInfo, AgentRole, AgentStats, AgentStatus, Job, JobStatus};
use chrono::{DateTime, Utc};
use convoy_core::{AgentId, ConvoyError, ConvoyResult, Priority};
use parking_lot::Mutex;
use convoy_bus::BoundedBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scores closer than this are a tie; the earlier-registered agent wins.
const SCORE_EPSILON: f64 = 1e-9;
const JOB_LOG_CAPACITY: usize = 500;

/// Static job-type to preferred-role map used by best-agent selection.
pub fn preferred_role(job_type: &str) -> Option<AgentRole> {
    let role = match job_type {
        "requirements_analysis" => AgentRole::Analyst,
        "architecture_design" | "system_design" => AgentRole::Architect,
        "code_generation" | "implementation" | "bug_fix" | "refactoring" => AgentRole::Developer,
        "asset_creation" | "ui_design" => AgentRole::Designer,
        "testing" | "test_generation" => AgentRole::Tester,
        "code_review" => AgentRole::Reviewer,
        "deployment" => AgentRole::Deployer,
        "coordination" | "planning" => AgentRole::Coordinator,
        _ => return None,
    };
    Some(role)
}

/// Queue relevance derived from a job's priority tier.
pub fn priority_relevance(priority: Priority) -> f64 {
    match priority {
        Priority::Normal => 1.0,
        Priority::High => 2.0,
        Priority::Critical => 3.0,
    }
}

struct AgentEntry {
    id: AgentId,
    role: AgentRole,
    capabilities: Vec<String>,
    status: AgentStatus,
    current_job: Option<Uuid>,
    stats: AgentStats,
    registered_at: DateTime<Utc>,
    queue: JobQueue,
}

impl AgentEntry {
    /// `10` for a role match, plus `5 × success rate`, plus `2 × rating`,
    /// minus `2 × queue length`.
    fn score(&self, preferred: Option<AgentRole>) -> f64 {
        let role_bonus = if preferred == Some(self.role) { 10.0 } else { 0.0 };
        role_bonus + self.stats.success_rate * 5.0 + self.stats.rating * 2.0
            - self.queue.len() as f64 * 2.0
    }

    fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id,
            role: self.role,
            capabilities: self.capabilities.clone(),
            status: self.status,
            current_job: self.current_job,
            queue_len: self.queue.len(),
            stats: self.stats.clone(),
            registered_at: self.registered_at,
        }
    }
}

struct RegistryState {
    /// Registration order; selection ties resolve to the earliest entry.
    agents: Vec<AgentEntry>,
    job_log: BoundedBuffer<Job>,
}

impl RegistryState {
    fn agent(&self, id: AgentId) -> Option<&AgentEntry> {
        self.agents.iter().find(|a| a.id == id)
    }

    fn agent_mut(&mut self, id: AgentId) -> Option<&mut AgentEntry> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    fn best_idle(&self, preferred: Option<AgentRole>, only_role: Option<AgentRole>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, agent) in self.agents.iter().enumerate() {
            if agent.status != AgentStatus::Idle {
                continue;
            }
            if only_role.is_some_and(|role| role != agent.role) {
                continue;
            }
            let score = agent.score(preferred);
            match best {
                Some((_, top)) if score <= top + SCORE_EPSILON => {}
                _ => best = Some((index, score)),
            }
        }
        best.map(|(index, _)| index)
    }

    fn log_job(&mut self, job: Job) {
        self.job_log.push(job);
    }

    /// Return the agent to idle, or hand it its next queued job.
    fn release_and_next(&mut self, id: AgentId) -> Option<Job> {
        let entry = self.agent_mut(id)?;
        entry.current_job = None;
        if entry.status == AgentStatus::Offline {
            return None;
        }
        match entry.queue.pop() {
            Some(job) => {
                entry.status = AgentStatus::Busy;
                entry.current_job = Some(job.id);
                Some(job)
            }
            None => {
                entry.status = AgentStatus::Idle;
                None
            }
        }
    }
}

struct Inner {
    state: Mutex<RegistryState>,
    handlers: HandlerTable,
}

impl Inner {
    async fn run_job(&self, agent: AgentId, mut job: Job) -> Option<Job> {
        let lookup = {
            let state = self.state.lock();
            state.agent(agent).map(|entry| {
                let mut prior = serde_json::Map::new();
                let mut unmet = None;
                for dep in &job.dependencies {
                    match state
                        .job_log
                        .iter()
                        .find(|j| j.id == *dep && j.status == JobStatus::Completed)
                    {
                        Some(done) => {
                            prior.insert(
                                dep.to_string(),
                                done.result.clone().unwrap_or(serde_json::Value::Null),
                            );
                        }
                        None => {
                            unmet = Some(*dep);
                            break;
                        }
                    }
                }
                (entry.role, prior, unmet)
            })
        };
        let Some((role, prior, unmet)) = lookup else {
            warn!(agent_id = %agent, "Agent vanished before its job ran");
            return None;
        };

        job.assigned_agent = Some(agent);
        if let Some(dep) = unmet {
            warn!(job_id = %job.id, dependency = %dep, "Skipping job with incomplete dependency");
            job.status = JobStatus::Skipped;
            job.error = Some(format!("dependency {dep} has not completed"));
            return self.settle(agent, job, None);
        }

        job.status = JobStatus::Running;
        let started = Instant::now();
        let ctx = TaskContext::new(job.kind.clone(), agent, role)
            .with_parameters(job.data.clone())
            .with_prior_results(prior);
        let result = match self.handlers.get(role) {
            Some(handler) => handler.execute(ctx).await,
            None => Err(ConvoyError::AgentUnavailable(format!(
                "{role} (no handler registered)"
            ))),
        };

        match result {
            Ok(value) => {
                let ok = value
                    .get("success")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true);
                job.status = if ok {
                    JobStatus::Completed
                } else {
                    JobStatus::Failed
                };
                job.result = Some(value);
            }
            Err(e) => {
                warn!(job_id = %job.id, agent_id = %agent, error = %e, "Job failed");
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
        job.completed_at = Some(Utc::now());
        debug!(job_id = %job.id, status = ?job.status, "Job finished");
        self.settle(agent, job, Some(started.elapsed()))
    }

    fn settle(&self, agent: AgentId, job: Job, elapsed: Option<Duration>) -> Option<Job> {
        let mut state = self.state.lock();
        if let Some(elapsed) = elapsed {
            if let Some(entry) = state.agent_mut(agent) {
                entry.stats.record(job.status == JobStatus::Completed, elapsed);
            }
        }
        state.log_job(job);
        state.release_and_next(agent)
    }
}

fn spawn_worker(inner: Arc<Inner>, agent: AgentId, job: Job) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next = Some(job);
        while let Some(job) = next.take() {
            next = inner.run_job(agent, job).await;
        }
    })
}

/// Start the next job handed out on release, or put it back when no
/// runtime is available to run it.
fn resume(inner: &Arc<Inner>, agent: AgentId, next: Option<Job>) {
    let Some(job) = next else { return };
    match tokio::runtime::Handle::try_current() {
        Ok(_) => {
            spawn_worker(Arc::clone(inner), agent, job);
        }
        Err(_) => {
            let mut state = inner.state.lock();
            if let Some(entry) = state.agent_mut(agent) {
                entry.queue.push(job, f64::MAX);
                entry.status = AgentStatus::Idle;
                entry.current_job = None;
            }
        }
    }
}

/// Exclusive use of an agent for one unit of work.
///
/// Completing the lease records the outcome in the agent's statistics.
/// Dropping it without an outcome still returns the agent to idle.
pub struct AgentLease {
    inner: Arc<Inner>,
    agent_id: AgentId,
    role: AgentRole,
    started: Instant,
    settled: bool,
}

impl AgentLease {
    /// Leased agent.
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Role the agent was leased for.
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Release the agent and fold the outcome into its statistics.
    pub fn complete(mut self, success: bool) {
        self.settle(Some(success));
    }

    fn settle(&mut self, outcome: Option<bool>) {
        if self.settled {
            return;
        }
        self.settled = true;
        let next = {
            let mut state = self.inner.state.lock();
            if let Some(success) = outcome {
                if let Some(entry) = state.agent_mut(self.agent_id) {
                    entry.stats.record(success, self.started.elapsed());
                }
            }
            state.release_and_next(self.agent_id)
        };
        resume(&self.inner, self.agent_id, next);
    }
}

impl Drop for AgentLease {
    fn drop(&mut self) {
        if !self.settled {
            debug!(agent_id = %self.agent_id, "Lease dropped without outcome");
            self.settle(None);
        }
    }
}

/// Registry of every agent in the fleet. Cheap to clone.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<Inner>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RegistryState {
                    agents: Vec::new(),
                    job_log: BoundedBuffer::new(JOB_LOG_CAPACITY),
                }),
                handlers: HandlerTable::new(),
            }),
        }
    }

    /// Register a new idle agent and return its id.
    pub fn register(&self, role: AgentRole, capabilities: Vec<String>) -> AgentId {
        let id = Uuid::new_v4();
        self.insert(id, role, capabilities);
        id
    }

    /// Register an agent under an existing id, e.g. its bus connection id.
    pub fn register_with_id(
        &self,
        id: AgentId,
        role: AgentRole,
        capabilities: Vec<String>,
    ) -> ConvoyResult<()> {
        if self.inner.state.lock().agent(id).is_some() {
            return Err(ConvoyError::Config(format!("agent {id} already registered")));
        }
        self.insert(id, role, capabilities);
        Ok(())
    }

    fn insert(&self, id: AgentId, role: AgentRole, capabilities: Vec<String>) {
        self.inner.state.lock().agents.push(AgentEntry {
            id,
            role,
            capabilities,
            status: AgentStatus::Idle,
            current_job: None,
            stats: AgentStats::default(),
            registered_at: Utc::now(),
            queue: JobQueue::new(),
        });
        info!(agent_id = %id, %role, "Agent registered");
    }

    /// Register the handler used for every agent of `role`.
    pub fn register_handler(&self, role: AgentRole, handler: Arc<dyn TaskHandler>) {
        self.inner.handlers.register(role, handler);
    }

    /// Handler for `role`, if registered.
    pub fn handler_for(&self, role: AgentRole) -> Option<Arc<dyn TaskHandler>> {
        self.inner.handlers.get(role)
    }

    /// Roles that have a handler.
    pub fn handler_roles(&self) -> Vec<AgentRole> {
        self.inner.handlers.roles()
    }

    /// Highest-scoring idle agent for a job, or `None` if every agent is
    /// busy or offline.
    pub fn select_best_agent(&self, job: &Job) -> Option<AgentId> {
        let state = self.inner.state.lock();
        let preferred = preferred_role(&job.kind);
        state
            .best_idle(preferred, None)
            .map(|index| state.agents[index].id)
    }

    /// Mark the best idle agent of `role` busy and hand back a lease on it.
    pub fn acquire(&self, role: AgentRole, job_id: Uuid) -> Option<AgentLease> {
        let mut state = self.inner.state.lock();
        let index = state.best_idle(Some(role), Some(role))?;
        let entry = &mut state.agents[index];
        entry.status = AgentStatus::Busy;
        entry.current_job = Some(job_id);
        debug!(agent_id = %entry.id, %role, "Agent leased");
        Some(AgentLease {
            inner: Arc::clone(&self.inner),
            agent_id: entry.id,
            role,
            started: Instant::now(),
            settled: false,
        })
    }

    /// Queue a job on an agent. An idle agent starts it at once; the
    /// returned handle resolves once that agent's queue runs dry.
    /// Outside a Tokio runtime the job stays queued and the agent idle.
    pub fn enqueue(
        &self,
        agent: AgentId,
        mut job: Job,
        relevance: f64,
    ) -> ConvoyResult<Option<JoinHandle<()>>> {
        let start = {
            let mut state = self.inner.state.lock();
            let entry = state
                .agent_mut(agent)
                .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
            job.assigned_agent = Some(agent);
            entry.queue.push(job, relevance);
            if entry.status != AgentStatus::Idle {
                debug!(agent_id = %agent, queued = entry.queue.len(), "Job queued behind running work");
                return Ok(None);
            }
            if tokio::runtime::Handle::try_current().is_err() {
                debug!(agent_id = %agent, queued = entry.queue.len(), "No runtime, job left queued");
                return Ok(None);
            }
            let Some(next) = entry.queue.pop() else {
                return Ok(None);
            };
            entry.status = AgentStatus::Busy;
            entry.current_job = Some(next.id);
            next
        };
        Ok(Some(spawn_worker(Arc::clone(&self.inner), agent, start)))
    }

    /// Pick the best idle agent for a job and queue it there.
    pub fn dispatch(&self, job: Job) -> ConvoyResult<(AgentId, Option<JoinHandle<()>>)> {
        let agent = self.select_best_agent(&job).ok_or_else(|| {
            ConvoyError::AgentUnavailable(
                preferred_role(&job.kind)
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| job.kind.clone()),
            )
        })?;
        let relevance = priority_relevance(job.priority);
        let handle = self.enqueue(agent, job, relevance)?;
        Ok((agent, handle))
    }

    /// Fold an out-of-band outcome into an agent's statistics.
    pub fn record_job(&self, agent: AgentId, success: bool, duration: Duration) -> ConvoyResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state
            .agent_mut(agent)
            .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
        entry.stats.record(success, duration);
        Ok(())
    }

    /// Replace an agent's statistics, e.g. when restoring a fleet.
    pub fn seed_stats(&self, agent: AgentId, stats: AgentStats) -> ConvoyResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state
            .agent_mut(agent)
            .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
        entry.stats = stats;
        Ok(())
    }

    /// Take an agent out of selection. Running work finishes normally.
    pub fn set_offline(&self, agent: AgentId) -> ConvoyResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state
            .agent_mut(agent)
            .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
        entry.status = AgentStatus::Offline;
        info!(agent_id = %agent, "Agent offline");
        Ok(())
    }

    /// Bring an offline agent back and start any work queued meanwhile.
    pub fn set_online(&self, agent: AgentId) -> ConvoyResult<()> {
        let next = {
            let mut state = self.inner.state.lock();
            let entry = state
                .agent_mut(agent)
                .ok_or_else(|| ConvoyError::UnknownAgent(agent.to_string()))?;
            if entry.status != AgentStatus::Offline {
                return Ok(());
            }
            if entry.current_job.is_some() {
                // Still finishing work; the worker picks up the queue.
                entry.status = AgentStatus::Busy;
                return Ok(());
            }
            entry.status = AgentStatus::Idle;
            state.release_and_next(agent)
        };
        info!(agent_id = %agent, "Agent online");
        resume(&self.inner, agent, next);
        Ok(())
    }

    /// Snapshot of one agent.
    pub fn get(&self, agent: AgentId) -> Option<AgentInfo> {
        self.inner.state.lock().agent(agent).map(AgentEntry::info)
    }

    /// Every agent in registration order.
    pub fn snapshot(&self) -> Vec<AgentInfo> {
        self.inner
            .state
            .lock()
            .agents
            .iter()
            .map(AgentEntry::info)
            .collect()
    }

    /// Registered agent count.
    pub fn len(&self) -> usize {
        self.inner.state.lock().agents.len()
    }

    /// No agents registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Agents currently in `status`.
    pub fn count_with_status(&self, status: AgentStatus) -> usize {
        self.inner
            .state
            .lock()
            .agents
            .iter()
            .filter(|a| a.status == status)
            .count()
    }

    /// Jobs waiting on `agent`, in run order.
    pub fn queued_jobs(&self, agent: AgentId) -> Option<Vec<Job>> {
        self.inner.state.lock().agent(agent).map(|a| a.queue.jobs())
    }

    /// Recently finished jobs, oldest first.
    pub fn recent_jobs(&self) -> Vec<Job> {
        self.inner.state.lock().job_log.to_vec()
    }
}
