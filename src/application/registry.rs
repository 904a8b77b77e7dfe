//! In-memory runner registry (C8, §4.8). Tracks concurrent orchestrator
//! invocations; no persistence — restarting the process loses all runs
//! (consistent with `AgentRun` itself, §3.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::application::orchestrator::CancelFlag;
use crate::domain::agent_run::{AgentRun, RunMode, RunStatus};
use crate::domain::errors::CoreError;
use crate::domain::market::Frequency;

struct Entry {
    run: Arc<Mutex<AgentRun>>,
    cancel: CancelFlag,
}

/// Guards the whole map with a single mutex, per §4.8 and §5 "Shared
/// resources" — contention is expected to be negligible next to the I/O
/// each run itself performs.
#[derive(Default)]
pub struct RunnerRegistry {
    runs: Mutex<HashMap<Uuid, Entry>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run in `Pending` status and returns its id plus the
    /// shared handle the caller should hand to the orchestrator, and the
    /// cancellation flag it should poll.
    pub async fn create(&self, agent: impl Into<String>, frequency: Frequency, mode: RunMode) -> (Uuid, Arc<Mutex<AgentRun>>, CancelFlag) {
        let run = AgentRun::new(agent, frequency, mode);
        let run_id = run.run_id;
        let run = Arc::new(Mutex::new(run));
        let cancel = Arc::new(AtomicBool::new(false));
        self.runs.lock().await.insert(
            run_id,
            Entry {
                run: run.clone(),
                cancel: cancel.clone(),
            },
        );
        (run_id, run, cancel)
    }

    pub async fn get(&self, run_id: Uuid) -> Result<AgentRun, CoreError> {
        let runs = self.runs.lock().await;
        let entry = runs.get(&run_id).ok_or_else(|| CoreError::NotFound(run_id.to_string()))?;
        Ok(entry.run.lock().await.clone())
    }

    pub async fn list(&self) -> Vec<AgentRun> {
        let runs = self.runs.lock().await;
        let mut out = Vec::with_capacity(runs.len());
        for entry in runs.values() {
            out.push(entry.run.lock().await.clone());
        }
        out
    }

    /// Requests cancellation of a running run, or marks a pending one
    /// cancelled outright (§4.8). A no-op if the run is already terminal.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), CoreError> {
        let runs = self.runs.lock().await;
        let entry = runs.get(&run_id).ok_or_else(|| CoreError::NotFound(run_id.to_string()))?;
        let mut run = entry.run.lock().await;
        match run.status {
            RunStatus::Pending => {
                run.status = RunStatus::Cancelled;
                entry.cancel.store(true, Ordering::SeqCst);
            }
            RunStatus::Running => {
                entry.cancel.store(true, Ordering::SeqCst);
            }
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = RunnerRegistry::new();
        let (run_id, run, _cancel) = registry.create("agent-a", Frequency::Daily, RunMode::Backtest).await;
        {
            let mut r = run.lock().await;
            r.status = RunStatus::Running;
        }
        let fetched = registry.get(run_id).await.unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn cancel_pending_marks_cancelled_immediately() {
        let registry = RunnerRegistry::new();
        let (run_id, _run, cancel) = registry.create("agent-a", Frequency::Daily, RunMode::Backtest).await;
        registry.cancel(run_id).await.unwrap();
        let fetched = registry.get(run_id).await.unwrap();
        assert_eq!(fetched.status, RunStatus::Cancelled);
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_not_found() {
        let registry = RunnerRegistry::new();
        let err = registry.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_returns_all_created_runs() {
        let registry = RunnerRegistry::new();
        registry.create("agent-a", Frequency::Daily, RunMode::Backtest).await;
        registry.create("agent-b", Frequency::Hourly, RunMode::Live).await;
        assert_eq!(registry.list().await.len(), 2);
    }
}
