//! Timestamp scheduling over the step-loop driver (C6, §4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::application::driver::{AgentStepLoopDriver, StepLoopConfig, StepOutcome};
use crate::application::ledger::PositionLedger;
use crate::application::market_data::MarketDataFacade;
use crate::domain::agent_run::{AgentRun, RunStatus};
use crate::domain::errors::CoreError;
use crate::domain::market::{Frequency, Timestamp};
use crate::domain::repositories::MarketQuery;

/// What timestamps a backtest run should cover.
#[derive(Debug, Clone)]
pub enum BacktestRange {
    /// `timestamp_after(ledger tip)` through the newest bar in store (§4.6).
    AutoResume,
    Explicit { start: Timestamp, end: Timestamp },
}

/// Cooperative cancellation flag shared with the runner registry (§4.8).
/// Checked at driver-session boundaries only — an in-flight step always
/// finishes its current commit (§5 "Cancellation").
pub type CancelFlag = Arc<AtomicBool>;

pub struct Orchestrator {
    market: Arc<MarketDataFacade>,
    ledger: Arc<PositionLedger>,
    driver: Arc<AgentStepLoopDriver>,
}

impl Orchestrator {
    pub fn new(market: Arc<MarketDataFacade>, ledger: Arc<PositionLedger>, driver: Arc<AgentStepLoopDriver>) -> Self {
        Self { market, ledger, driver }
    }

    /// Resolves the backtest's iteration bounds into a concrete
    /// `(start, end)` pair, or `None` if there is nothing to do (§4.6
    /// "ledger tip already equals newest store timestamp").
    async fn resolve_range(
        &self,
        agent: &str,
        frequency: Frequency,
        range: &BacktestRange,
    ) -> Result<Option<(Timestamp, Timestamp)>, CoreError> {
        let Some(end) = self.market.max_timestamp(frequency).await? else {
            return Ok(None);
        };

        let start = match range {
            BacktestRange::Explicit { start, end: _ } => *start,
            BacktestRange::AutoResume => {
                let tip = self.ledger.latest_at_or_before(agent, &end).await?;
                match tip {
                    Some(step) if step.timestamp >= end => return Ok(None),
                    Some(step) => match self.market.next_trading_timestamp(frequency, Some(step.timestamp)).await? {
                        Some(next) => next,
                        None => return Ok(None),
                    },
                    None => match self.market.next_trading_timestamp(frequency, None).await? {
                        Some(first) => first,
                        None => return Ok(None),
                    },
                }
            }
        };

        let end = match range {
            BacktestRange::Explicit { start: _, end } => *end,
            BacktestRange::AutoResume => end,
        };

        if start > end {
            return Ok(None);
        }

        // A requested range starting before any available data is clamped
        // to the earliest available timestamp (§4.6 tie-break).
        let earliest = self
            .market
            .next_trading_timestamp(frequency, None)
            .await?
            .ok_or_else(|| CoreError::ValidationError {
                reason: "no trading timestamps available in store".to_string(),
            })?;
        let start = if start < earliest { earliest } else { start };

        Ok(Some((start, end)))
    }

    /// Iterates every trading timestamp in `range` for `agent`, invoking the
    /// driver at each one, updating `run` in place as it goes. Stops on the
    /// first `CoreError::Fatal` or on observing `cancel`.
    #[instrument(skip(self, config, run, cancel), fields(agent = %agent, frequency = ?frequency))]
    pub async fn run_backtest(
        &self,
        agent: &str,
        frequency: Frequency,
        range: BacktestRange,
        config: &StepLoopConfig,
        run: &Mutex<AgentRun>,
        cancel: &CancelFlag,
    ) -> Result<(), CoreError> {
        {
            let mut r = run.lock().await;
            r.status = RunStatus::Running;
        }

        let bounds = self.resolve_range(agent, frequency, &range).await;
        let (mut cursor, end) = match bounds {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                let mut r = run.lock().await;
                r.status = RunStatus::Completed;
                r.steps_total = Some(0);
                return Ok(());
            }
            Err(e) => {
                let mut r = run.lock().await;
                r.status = RunStatus::Failed;
                r.error_message = Some(e.to_string());
                return Err(e);
            }
        };

        loop {
            if cancel.load(Ordering::SeqCst) {
                let mut r = run.lock().await;
                r.status = RunStatus::Cancelled;
                info!(agent, "orchestrator run cancelled before next step");
                return Ok(());
            }

            match self.driver.run_step(agent, cursor, config).await {
                Ok(StepOutcome::Committed) => {
                    let mut r = run.lock().await;
                    r.steps_completed += 1;
                }
                Ok(StepOutcome::FailedWithSyntheticNoTrade { reason }) => {
                    warn!(agent, timestamp = %cursor, reason, "step failed, synthetic no_trade committed, continuing");
                    let mut r = run.lock().await;
                    r.steps_completed += 1;
                    r.error_message = Some(reason);
                }
                Err(e) => {
                    let mut r = run.lock().await;
                    r.status = RunStatus::Failed;
                    r.error_message = Some(e.to_string());
                    return Err(e);
                }
            }

            if cursor >= end {
                break;
            }
            match self.market.next_trading_timestamp(frequency, Some(cursor)).await? {
                Some(next) => cursor = next,
                None => break,
            }
        }

        let mut r = run.lock().await;
        if r.status != RunStatus::Cancelled {
            r.status = RunStatus::Completed;
        }
        Ok(())
    }

    /// Invokes the driver exactly once, for the scheduler's live-session
    /// mode (§4.6 "Live-session mode").
    #[instrument(skip(self, config, run), fields(agent = %agent, timestamp = %timestamp))]
    pub async fn run_live_session(
        &self,
        agent: &str,
        timestamp: Timestamp,
        config: &StepLoopConfig,
        run: &Mutex<AgentRun>,
    ) -> Result<(), CoreError> {
        {
            let mut r = run.lock().await;
            r.status = RunStatus::Running;
            r.steps_total = Some(1);
        }

        match self.driver.run_step(agent, timestamp, config).await {
            Ok(StepOutcome::Committed) => {
                let mut r = run.lock().await;
                r.steps_completed = 1;
                r.status = RunStatus::Completed;
                Ok(())
            }
            Ok(StepOutcome::FailedWithSyntheticNoTrade { reason }) => {
                let mut r = run.lock().await;
                r.steps_completed = 1;
                r.error_message = Some(reason);
                r.status = RunStatus::Completed;
                Ok(())
            }
            Err(e) => {
                let mut r = run.lock().await;
                r.status = RunStatus::Failed;
                r.error_message = Some(e.to_string());
                Err(e)
            }
        }
    }
}
