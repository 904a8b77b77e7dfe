//! Dual-write position ledger façade (C2, §3.2 invariant 6, §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::errors::CoreError;
use crate::domain::market::{Symbol, Timestamp};
use crate::domain::position::{Action, Position, PositionStep};
use crate::domain::repositories::{LedgerJournal, LedgerQuery, LedgerStore};

pub struct PositionLedger {
    primary: Arc<dyn LedgerStore>,
    journal: Arc<dyn LedgerJournal>,
}

impl PositionLedger {
    pub fn new(primary: Arc<dyn LedgerStore>, journal: Arc<dyn LedgerJournal>) -> Self {
        Self { primary, journal }
    }

    /// Writes one step to the primary, then to the journal. A failure in
    /// exactly one store is logged as a partial failure and not retried; a
    /// failure in both is `CoreError::Fatal` (§3.2 invariant 6, §9 "Open
    /// question" on dual-write fatality).
    pub async fn commit(
        &self,
        agent: &str,
        timestamp: Timestamp,
        action: Action,
        cash: Decimal,
        holdings: HashMap<Symbol, i64>,
    ) -> Result<i64, CoreError> {
        match self
            .primary
            .commit(agent, &timestamp, action.clone(), cash, holdings.clone())
            .await
        {
            Ok(step_id) => {
                let step = PositionStep {
                    agent: agent.to_string(),
                    timestamp,
                    step_id,
                    action,
                    cash,
                    holdings,
                };
                if let Err(e) = self.journal.append(&step).await {
                    warn!(agent, step_id, error = %e, "journal write failed after primary commit succeeded");
                }
                Ok(step_id)
            }
            Err(primary_err) => {
                warn!(agent, error = %primary_err, "primary ledger commit failed, attempting journal-only commit");
                let step_id = self.journal.max_step_id(agent).await.ok().flatten().map(|m| m + 1).unwrap_or(0);
                let step = PositionStep {
                    agent: agent.to_string(),
                    timestamp,
                    step_id,
                    action,
                    cash,
                    holdings,
                };
                match self.journal.append(&step).await {
                    Ok(()) => {
                        warn!(agent, step_id, "committed to journal only, primary store unavailable");
                        Ok(step_id)
                    }
                    Err(journal_err) => Err(CoreError::Fatal(format!(
                        "dual-write failure for {agent}: primary={primary_err}, journal={journal_err}"
                    ))),
                }
            }
        }
    }

    /// Readers prefer the primary and fall back to the journal on error
    /// (§3.2 invariant 6).
    pub async fn latest_at_or_before(&self, agent: &str, t: &Timestamp) -> Result<Option<PositionStep>, CoreError> {
        match self.primary.latest_at_or_before(agent, t).await {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(agent, error = %e, "primary ledger read failed, falling back to journal");
                self.journal.latest_at_or_before(agent, t).await
            }
        }
    }

    /// The state the driver sees at the start of `today`: the latest step
    /// strictly before it, or `None` if the agent has no history yet — the
    /// driver is responsible for seeding a fresh position in that case
    /// (§4.5 step 1).
    pub async fn opening_position(&self, agent: &str, today: &Timestamp) -> Result<Option<Position>, CoreError> {
        Ok(self.latest_at_or_before(agent, today).await?.map(|step| Position {
            cash: step.cash,
            holdings: step.holdings,
        }))
    }

    pub async fn max_step_id(&self, agent: &str) -> Result<Option<i64>, CoreError> {
        match self.primary.max_step_id(agent).await {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(agent, error = %e, "primary ledger read failed, falling back to journal");
                self.journal.max_step_id(agent).await
            }
        }
    }

    /// Commits a `no_trade` step carrying forward whatever
    /// `latest_at_or_before` returned (§4.4).
    pub async fn no_trade(&self, agent: &str, t: &Timestamp) -> Result<i64, CoreError> {
        let (cash, holdings) = match self.latest_at_or_before(agent, t).await? {
            Some(step) => (step.cash, step.holdings),
            None => (Decimal::ZERO, HashMap::new()),
        };
        self.commit(agent, *t, Action::NoTrade, cash, holdings).await
    }

    /// Every symbol held by `agent` in its latest step (§4.2 held-symbol union).
    pub async fn held_symbols(&self, agent: &str) -> Result<Vec<Symbol>, CoreError> {
        self.primary.held_symbols(agent).await
    }

    /// Every agent with committed history, for the ingestor's held-symbol union.
    pub async fn all_agents(&self) -> Result<Vec<String>, CoreError> {
        self.primary.all_agents().await
    }
}
