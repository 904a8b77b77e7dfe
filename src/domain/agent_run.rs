//! AgentRun: one invocation of the orchestrator. In-process only — not
//! persisted, lost on restart (intentional, §3.3).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::market::Frequency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Backtest,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    pub run_id: Uuid,
    pub agent: String,
    pub frequency: Frequency,
    pub mode: RunMode,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps_completed: u64,
    pub steps_total: Option<u64>,
    pub error_message: Option<String>,
}

impl AgentRun {
    pub fn new(agent: impl Into<String>, frequency: Frequency, mode: RunMode) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            agent: agent.into(),
            frequency,
            mode,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            steps_completed: 0,
            steps_total: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}
