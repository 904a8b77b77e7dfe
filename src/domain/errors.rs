use thiserror::Error;

/// Core error kinds, shared across the market store, ledger, ingestor, and
/// driver. Propagation policy: reads recover locally (fallback, retry);
/// writes surface on dual-failure; session-level errors mark the `AgentRun`
/// but never propagate to sibling runs.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing bar, missing agent, missing run.
    #[error("not found: {0}")]
    NotFound(String),

    /// Primary store down; reads fall back to the journal, writes are
    /// attempted against the journal and the error is surfaced regardless.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Vendor throttling. Retried with backoff; surfaces only once all
    /// attempts are exhausted.
    #[error("rate limited, retry after {retry_after_secs}s: {reason}")]
    RateLimited { retry_after_secs: u64, reason: String },

    /// Malformed action (non-integer amount, insufficient funds). Not fatal
    /// to the session; returned to the LLM tool layer so the model can react.
    #[error("validation error: {reason}")]
    ValidationError { reason: String },

    /// Run cancellation. Orderly exit, not an application failure.
    #[error("cancelled")]
    Cancelled,

    /// Unrecoverable: corrupted ledger invariant, or a journal I/O error on
    /// both dual-write paths at once. Aborts the current orchestrator run;
    /// does not crash the process.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound(e.to_string()),
            other => CoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Unavailable(e.to_string())
    }
}
