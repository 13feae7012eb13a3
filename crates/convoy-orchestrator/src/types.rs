use chrono::{DateTime, Utc};
use convoy_core::{AgentId, Priority};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Role of each agent in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Splits work and coordinates other agents.
    Coordinator,
    /// Gathers and documents requirements.
    Analyst,
    /// Produces designs and architecture.
    Architect,
    /// Writes code.
    Developer,
    /// Produces assets and UI.
    Designer,
    /// Writes and runs tests.
    Tester,
    /// Reviews work for quality.
    Reviewer,
    /// Ships builds.
    Deployer,
}

impl AgentRole {
    /// Every role, in declaration order.
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Coordinator,
        AgentRole::Analyst,
        AgentRole::Architect,
        AgentRole::Developer,
        AgentRole::Designer,
        AgentRole::Tester,
        AgentRole::Reviewer,
        AgentRole::Deployer,
    ];
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Coordinator => write!(f, "coordinator"),
            AgentRole::Analyst => write!(f, "analyst"),
            AgentRole::Architect => write!(f, "architect"),
            AgentRole::Developer => write!(f, "developer"),
            AgentRole::Designer => write!(f, "designer"),
            AgentRole::Tester => write!(f, "tester"),
            AgentRole::Reviewer => write!(f, "reviewer"),
            AgentRole::Deployer => write!(f, "deployer"),
        }
    }
}

/// Availability of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Free to take work.
    Idle,
    /// Working on a job or phase.
    Busy,
    /// Excluded from selection.
    Offline,
}

/// Rolling per-agent statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Successful jobs.
    pub jobs_completed: u64,
    /// Failed jobs.
    pub jobs_failed: u64,
    /// Running mean over finished jobs.
    pub average_duration_ms: f64,
    /// Completed over total; 1.0 before the first job.
    pub success_rate: f64,
    /// Bounded to `[1, 10]`.
    pub rating: f64,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self {
            jobs_completed: 0,
            jobs_failed: 0,
            average_duration_ms: 0.0,
            success_rate: 1.0,
            rating: 5.0,
        }
    }
}

impl AgentStats {
    /// Lowest rating an agent can fall to.
    pub const MIN_RATING: f64 = 1.0;
    /// Highest rating an agent can reach.
    pub const MAX_RATING: f64 = 10.0;

    /// Fold one finished job into the running figures.
    pub fn record(&mut self, success: bool, duration: Duration) {
        if success {
            self.jobs_completed += 1;
            self.rating = (self.rating + 0.1).min(Self::MAX_RATING);
        } else {
            self.jobs_failed += 1;
            self.rating = (self.rating - 0.5).max(Self::MIN_RATING);
        }
        let total = (self.jobs_completed + self.jobs_failed) as f64;
        let ms = duration.as_secs_f64() * 1000.0;
        self.average_duration_ms += (ms - self.average_duration_ms) / total;
        self.success_rate = self.jobs_completed as f64 / total;
    }

    /// Finished jobs, successful or not.
    pub fn total_jobs(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

/// Serializable view of a registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent id, shared with its bus connection.
    pub id: AgentId,
    /// Role used for selection.
    pub role: AgentRole,
    /// Free-form capability tags.
    pub capabilities: Vec<String>,
    /// Current availability.
    pub status: AgentStatus,
    /// Job or run phase the agent is working on.
    pub current_job: Option<Uuid>,
    /// Jobs waiting behind the current one.
    pub queue_len: usize,
    /// Performance statistics.
    pub stats: AgentStats,
    /// When the agent joined the registry.
    pub registered_at: DateTime<Utc>,
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in an agent queue.
    Queued,
    /// Handler is executing.
    Running,
    /// Handler succeeded.
    Completed,
    /// Handler errored or reported failure.
    Failed,
    /// A dependency never completed.
    Skipped,
}

/// A unit of work queued on a specific agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job id.
    pub id: Uuid,
    /// Job type, used for preferred-role selection.
    #[serde(rename = "type")]
    pub kind: String,
    /// Priority tier, mapped to queue relevance.
    #[serde(default)]
    pub priority: Priority,
    /// Input handed to the handler.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Jobs that must have completed before this one runs.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Current lifecycle state.
    #[serde(default = "default_job_status")]
    pub status: JobStatus,
    /// Agent the job was queued on.
    #[serde(default)]
    pub assigned_agent: Option<AgentId>,
    /// Handler result once finished.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error text when the job failed or was skipped.
    #[serde(default)]
    pub error: Option<String>,
    /// When the job was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the job finished.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_job_status() -> JobStatus {
    JobStatus::Queued
}

impl Job {
    /// Queued normal-priority job with no dependencies.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            priority: Priority::Normal,
            data,
            dependencies: Vec::new(),
            status: JobStatus::Queued,
            assigned_agent: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Set the priority tier.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Require these jobs to complete first.
    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }
}

/// Advisory duration estimate for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationRange {
    /// Lower bound.
    pub min_secs: u64,
    /// Upper bound.
    pub max_secs: u64,
}

/// One ordered step of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Unique within the template.
    pub name: String,
    /// Role an agent needs to run the phase.
    pub role: AgentRole,
    /// Phases that must have a successful result earlier in the same run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Names of predicates evaluated against the phase result.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Advisory estimate, reported only.
    #[serde(default)]
    pub estimated_duration: Option<DurationRange>,
    /// Overrides the orchestrator's default phase timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Advisory only. Phases always run in declaration order.
    #[serde(default)]
    pub parallel: bool,
}

impl Phase {
    /// Phase with no dependencies or criteria.
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            role,
            dependencies: Vec::new(),
            success_criteria: Vec::new(),
            estimated_duration: None,
            timeout_secs: None,
            parallel: false,
        }
    }

    /// Require earlier phases to have succeeded.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Add named success criteria.
    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a duration estimate.
    pub fn with_estimate(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.estimated_duration = Some(DurationRange { min_secs, max_secs });
        self
    }

    /// Override the default phase timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Per-phase timeout override, if set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// A named, ordered sequence of phases. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Unique template name.
    pub name: String,
    /// Human-readable summary.
    #[serde(default)]
    pub description: String,
    /// Phases in execution order.
    pub phases: Vec<Phase>,
}

impl WorkflowTemplate {
    /// Template with an empty description.
    pub fn new(name: impl Into<String>, phases: Vec<Phase>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            phases,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Phases still executing.
    Active,
    /// Every phase succeeded.
    Completed,
    /// A phase failed, timed out or could not find an agent.
    Failed,
    /// Stopped by shutdown. Not a failure.
    Interrupted,
}

impl RunStatus {
    /// Whether the run has been archived.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Active)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Active => write!(f, "active"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Execution strategy for agent collaboration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One agent after another, each seeing the previous result.
    Sequential,
    /// All agents at once.
    Parallel,
    /// A leader picks a directive for the followers.
    Hierarchical,
    /// Every pair of agents works together.
    Distributed,
    /// The oracle picks a strategy for a single agent.
    Adaptive,
}

impl Strategy {
    /// Every strategy, in declaration order.
    pub const ALL: [Strategy; 5] = [
        Strategy::Sequential,
        Strategy::Parallel,
        Strategy::Hierarchical,
        Strategy::Distributed,
        Strategy::Adaptive,
    ];

    /// Lowercase label, as used by oracles.
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Parallel => "parallel",
            Strategy::Hierarchical => "hierarchical",
            Strategy::Distributed => "distributed",
            Strategy::Adaptive => "adaptive",
        }
    }

    /// Parse an oracle label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == label)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision returned by the oracle, kept on the run for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Kind of decision asked for.
    pub decision_type: String,
    /// Chosen label.
    pub label: String,
    /// Oracle confidence in `[0, 1]`.
    pub confidence: f64,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Result of one executed phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase name.
    pub phase: String,
    /// Agent that ran the phase, if one was leased.
    pub agent_id: Option<AgentId>,
    /// Phase passed its criteria.
    pub success: bool,
    /// Handler result, or the error payload.
    pub result: serde_json::Value,
    /// Wall time spent in the phase.
    pub duration_ms: u64,
    /// When the phase finished.
    pub finished_at: DateTime<Utc>,
}

/// One invocation of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Run id.
    pub id: Uuid,
    /// Template name.
    pub template: String,
    /// Parameters the run started with.
    pub parameters: serde_json::Value,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run was archived.
    pub ended_at: Option<DateTime<Utc>>,
    /// Index of the next phase to execute.
    pub current_phase: usize,
    /// Outcome of every executed phase, in order.
    pub phase_log: Vec<PhaseOutcome>,
    /// Oracle decisions taken for the run.
    pub decisions: Vec<DecisionRecord>,
    /// Execution strategy chosen at start.
    pub strategy: Option<Strategy>,
    /// Failure or interruption reason.
    pub error: Option<String>,
}

impl WorkflowRun {
    /// Active run at phase zero.
    pub fn new(template: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            template: template.into(),
            parameters,
            status: RunStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            current_phase: 0,
            phase_log: Vec::new(),
            decisions: Vec::new(),
            strategy: None,
            error: None,
        }
    }

    /// Run duration once archived.
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// What `start_workflow` returns to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    /// Run id.
    pub run_id: Uuid,
    /// Every phase succeeded.
    pub success: bool,
    /// Terminal status.
    pub status: RunStatus,
    /// Phase results keyed by phase name, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time of the run.
    pub duration_ms: u64,
}
