//! Active and archived workflow runs behind one lock.

use crate::types::{RunStatus, WorkflowRun};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use convoy_bus::BoundedBuffer;
use std::collections::HashMap;
use uuid::Uuid;

/// Aggregate counts over active and archived runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowStats {
    /// Runs still in progress.
    pub active: usize,
    /// Archived as completed.
    pub completed: usize,
    /// Archived as failed.
    pub failed: usize,
    /// Archived as interrupted.
    pub interrupted: usize,
    /// Mean duration of archived runs, in milliseconds.
    pub average_duration_ms: f64,
    /// Completed over completed plus failed. `0.0` before any decided run.
    pub success_rate: f64,
}

struct RunState {
    active: HashMap<Uuid, WorkflowRun>,
    history: BoundedBuffer<WorkflowRun>,
}

/// A run is either active or archived, never both; archiving is a single
/// critical section.
pub struct RunStore {
    state: Mutex<RunState>,
}

impl RunStore {
    /// Store keeping at most `history_capacity` archived runs.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RunState {
                active: HashMap::new(),
                history: BoundedBuffer::new(history_capacity),
            }),
        }
    }

    /// Track a newly started run.
    pub fn insert_active(&self, run: WorkflowRun) {
        self.state.lock().active.insert(run.id, run);
    }

    /// Mutate an active run in place. Returns `false` once it is archived.
    pub fn update_active(&self, id: Uuid, f: impl FnOnce(&mut WorkflowRun)) -> bool {
        match self.state.lock().active.get_mut(&id) {
            Some(run) => {
                f(run);
                true
            }
            None => false,
        }
    }

    /// Move a run into history with a terminal status. If it was already
    /// archived, leaves it untouched. Returns the status the run ended with.
    pub fn archive(&self, id: Uuid, status: RunStatus, error: Option<String>) -> Option<RunStatus> {
        let mut state = self.state.lock();
        match state.active.remove(&id) {
            Some(mut run) => {
                run.status = status;
                run.error = error;
                run.ended_at = Some(Utc::now());
                state.history.push(run);
                Some(status)
            }
            None => state
                .history
                .iter()
                .rev()
                .find(|r| r.id == id)
                .map(|r| r.status),
        }
    }

    /// Archive every active run as interrupted and return their ids.
    pub fn interrupt_all(&self, reason: &str) -> Vec<Uuid> {
        let mut state = self.state.lock();
        let runs: Vec<WorkflowRun> = state.active.drain().map(|(_, run)| run).collect();
        let now = Utc::now();
        let mut ids = Vec::with_capacity(runs.len());
        for mut run in runs {
            run.status = RunStatus::Interrupted;
            run.error = Some(reason.to_string());
            run.ended_at = Some(now);
            ids.push(run.id);
            state.history.push(run);
        }
        ids
    }

    /// An active or archived run.
    pub fn get(&self, id: Uuid) -> Option<WorkflowRun> {
        let state = self.state.lock();
        state
            .active
            .get(&id)
            .or_else(|| state.history.iter().find(|r| r.id == id))
            .cloned()
    }

    /// Whether the run is still active.
    pub fn is_active(&self, id: Uuid) -> bool {
        self.state.lock().active.contains_key(&id)
    }

    /// Active runs, oldest first.
    pub fn active(&self) -> Vec<WorkflowRun> {
        let mut runs: Vec<_> = self.state.lock().active.values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    /// Archived runs, oldest first.
    pub fn history(&self) -> Vec<WorkflowRun> {
        self.state.lock().history.to_vec()
    }

    /// Aggregate counts over active and archived runs.
    pub fn stats(&self) -> WorkflowStats {
        let state = self.state.lock();
        let mut stats = WorkflowStats {
            active: state.active.len(),
            ..WorkflowStats::default()
        };
        let mut total_ms = 0i64;
        let mut timed = 0usize;
        for run in state.history.iter() {
            match run.status {
                RunStatus::Completed => stats.completed += 1,
                RunStatus::Failed => stats.failed += 1,
                RunStatus::Interrupted => stats.interrupted += 1,
                RunStatus::Active => {}
            }
            if let Some(ms) = run.duration_ms() {
                total_ms += ms;
                timed += 1;
            }
        }
        if timed > 0 {
            stats.average_duration_ms = total_ms as f64 / timed as f64;
        }
        let decided = stats.completed + stats.failed;
        if decided > 0 {
            stats.success_rate = stats.completed as f64 / decided as f64;
        }
        stats
    }
}
