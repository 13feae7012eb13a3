//! Workflow runs end to end: success, criteria and dependency failures,
//! timeouts, shutdown interruption and agent selection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use convoy_bus::{BusConfig, CommunicationBus};
use convoy_core::{ConvoyResult, AgentId};
use convoy_orchestrator::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Test handlers
// ---------------------------------------------------------------------------

/// Returns a fixed result and counts invocations.
struct Spy {
    result: Value,
    calls: AtomicUsize,
}

impl Spy {
    fn new(result: Value) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for Spy {
    async fn execute(&self, ctx: TaskContext) -> ConvoyResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = self.result.clone();
        if let Some(obj) = out.as_object_mut() {
            obj.insert("phase".into(), json!(ctx.task));
            obj.insert("seen".into(), json!(ctx.prior_results.keys().collect::<Vec<_>>()));
        }
        Ok(out)
    }
}

/// Signals when entered, then never finishes.
struct Stuck {
    entered: Arc<Notify>,
}

#[async_trait]
impl TaskHandler for Stuck {
    async fn execute(&self, _ctx: TaskContext) -> ConvoyResult<Value> {
        self.entered.notify_one();
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

struct Slow(Duration);

#[async_trait]
impl TaskHandler for Slow {
    async fn execute(&self, _ctx: TaskContext) -> ConvoyResult<Value> {
        tokio::time::sleep(self.0).await;
        Ok(json!({}))
    }
}

fn orchestrator() -> Arc<WorkflowOrchestrator> {
    Arc::new(WorkflowOrchestrator::new(
        OrchestratorConfig::default(),
        AgentRegistry::new(),
        Arc::new(CommunicationBus::with_default_channels(BusConfig::default())),
        Arc::new(FixedOracle::strategy(Strategy::Sequential)),
    ))
}

fn two_phase(criteria_a: &[&str]) -> WorkflowTemplate {
    WorkflowTemplate::new(
        "two_phase",
        vec![
            Phase::new("A", AgentRole::Developer).with_criteria(criteria_a.iter().copied()),
            Phase::new("B", AgentRole::Tester).depends_on(["A"]),
        ],
    )
}

fn agent(orch: &WorkflowOrchestrator, role: AgentRole) -> AgentId {
    orch.registry().register(role, vec![])
}

// ---------------------------------------------------------------------------
// Completion and failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_phase_run_completes_and_is_archived() {
    let orch = orchestrator();
    let a = Spy::new(json!({"ok": true}));
    let b = Spy::new(json!({"ok": true}));
    orch.registry().register_handler(AgentRole::Developer, a.clone());
    orch.registry().register_handler(AgentRole::Tester, b.clone());
    agent(&orch, AgentRole::Developer);
    agent(&orch, AgentRole::Tester);
    orch.register_template(two_phase(&[])).unwrap();

    let outcome = orch.start_workflow("two_phase", json!({})).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.status, RunStatus::Completed);
    let result = outcome.result.unwrap();
    assert_eq!(result["A"]["phase"], "A");
    assert_eq!(result["B"]["seen"], json!(["A"]));

    assert!(orch.active_runs().is_empty());
    let run = orch.run(outcome.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.current_phase, 2);
    assert_eq!(run.phase_log.len(), 2);
    assert!(run.ended_at.is_some());
    assert_eq!((a.calls(), b.calls()), (1, 1));
}

#[tokio::test]
async fn failed_criterion_aborts_run_and_skips_later_phases() {
    let orch = orchestrator();
    let a = Spy::new(json!({"test_pass_rate": 0.5}));
    let b = Spy::new(json!({}));
    orch.registry().register_handler(AgentRole::Developer, a.clone());
    orch.registry().register_handler(AgentRole::Tester, b.clone());
    let dev = agent(&orch, AgentRole::Developer);
    agent(&orch, AgentRole::Tester);
    orch.register_template(two_phase(&["tests_passing"])).unwrap();

    let outcome = orch.start_workflow("two_phase", json!({})).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Success criteria not met for phase: A"));
    assert_eq!(b.calls(), 0);

    let history = orch.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, RunStatus::Failed);
    assert!(orch.active_runs().is_empty());

    let dev = orch.registry().get(dev).unwrap();
    assert_eq!(dev.status, AgentStatus::Idle);
    assert_eq!(dev.stats.jobs_failed, 1);
}

#[tokio::test]
async fn unsuccessful_result_fails_dependent_phase() {
    let orch = orchestrator();
    let b = Spy::new(json!({}));
    orch.registry()
        .register_handler(AgentRole::Developer, Spy::new(json!({"success": false})));
    orch.registry().register_handler(AgentRole::Tester, b.clone());
    agent(&orch, AgentRole::Developer);
    agent(&orch, AgentRole::Tester);
    orch.register_template(two_phase(&["tests_passing"])).unwrap();

    let outcome = orch.start_workflow("two_phase", json!({})).await.unwrap();
    assert_eq!(
        outcome.error.as_deref(),
        Some("Dependency not met for phase B: A")
    );
    assert_eq!(b.calls(), 0);
    let run = orch.run(outcome.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.phase_log[0].success);
}

#[tokio::test(start_paused = true)]
async fn phase_timeout_fails_run_and_releases_agent() {
    let orch = orchestrator();
    orch.registry()
        .register_handler(AgentRole::Developer, Arc::new(Slow(Duration::from_secs(10))));
    let dev = agent(&orch, AgentRole::Developer);
    orch.register_template(WorkflowTemplate::new(
        "slow",
        vec![Phase::new("build", AgentRole::Developer).with_timeout(Duration::from_secs(1))],
    ))
    .unwrap();

    let outcome = orch.start_workflow("slow", json!({})).await.unwrap();
    assert_eq!(
        outcome.error.as_deref(),
        Some("Phase build timed out after 1000ms")
    );
    let info = orch.registry().get(dev).unwrap();
    assert_eq!(info.status, AgentStatus::Idle);
    assert_eq!(info.stats.jobs_failed, 1);
    assert_eq!(orch.run(outcome.run_id).unwrap().status, RunStatus::Failed);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_interrupts_active_run() {
    let orch = orchestrator();
    let entered = Arc::new(Notify::new());
    orch.registry().register_handler(
        AgentRole::Developer,
        Arc::new(Stuck {
            entered: entered.clone(),
        }),
    );
    let dev = agent(&orch, AgentRole::Developer);
    orch.register_template(WorkflowTemplate::new(
        "forever",
        vec![Phase::new("build", AgentRole::Developer)],
    ))
    .unwrap();

    let running = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.start_workflow("forever", json!({})).await })
    };
    entered.notified().await;
    assert_eq!(orch.active_runs().len(), 1);
    let run_id = orch.active_runs()[0].id;

    orch.shutdown().await;

    let run = orch.run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Interrupted);
    assert!(run.ended_at.is_some());
    assert!(orch.active_runs().is_empty());
    assert!(orch.history().iter().any(|r| r.id == run_id));

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.status, RunStatus::Interrupted);
    assert!(!outcome.success);
    assert_eq!(orch.registry().get(dev).unwrap().status, AgentStatus::Idle);
    assert_eq!(orch.workflow_stats().interrupted, 1);
    assert_eq!(orch.workflow_stats().failed, 0);
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[test]
fn score_tie_goes_to_first_registered_agent() {
    let registry = AgentRegistry::new();
    let matching = registry.register(AgentRole::Tester, vec![]);
    let strong = registry.register(AgentRole::Developer, vec![]);
    registry
        .seed_stats(
            matching,
            AgentStats {
                success_rate: 0.5,
                rating: 5.0,
                ..AgentStats::default()
            },
        )
        .unwrap();
    registry
        .seed_stats(
            strong,
            AgentStats {
                success_rate: 0.9,
                rating: 9.0,
                ..AgentStats::default()
            },
        )
        .unwrap();

    assert_eq!(
        registry.select_best_agent(&Job::new("testing", json!({}))),
        Some(matching)
    );
}

#[tokio::test]
async fn default_templates_run_with_static_handlers() {
    let orch = orchestrator();
    let result = json!({
        "requirements": ["login"],
        "approved": true,
        "compiled": true,
        "test_pass_rate": 1.0,
        "critical_issues": 0,
        "deployed": true
    });
    for role in AgentRole::ALL {
        orch.registry()
            .register_handler(role, Arc::new(StaticHandler::new(result.clone())));
        agent(&orch, role);
    }
    for template in default_templates() {
        orch.register_template(template).unwrap();
    }
    for name in ["game_development", "bug_fix"] {
        let outcome = orch.start_workflow(name, json!({"priority": "high"})).await.unwrap();
        assert!(outcome.success, "{name}: {:?}", outcome.error);
    }
    assert_eq!(orch.workflow_stats().completed, 2);
}
