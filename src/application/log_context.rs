//! Structured logging helpers, replacing the source's `TradingLogger`
//! process-wide singleton (§9 "Global configuration"). Every call here takes
//! the context it needs as an argument instead of reading shared mutable
//! state; `tracing`'s span/field machinery carries it through to the
//! configured subscriber.

use rust_decimal::Decimal;
use tracing::info;

use crate::domain::market::{Frequency, Timestamp};
use crate::domain::position::Action;

fn describe_action(action: &Action) -> String {
    match action {
        Action::Buy { symbol, amount } => format!("buy {amount} {symbol}"),
        Action::Sell { symbol, amount } => format!("sell {amount} {symbol}"),
        Action::NoTrade => "no_trade".to_string(),
    }
}

/// One committed position step (mirrors the source's `log_trade`/`log_no_trade`).
pub fn log_step_committed(agent: &str, timestamp: &Timestamp, step_id: i64, action: &Action, cash: Decimal) {
    info!(
        agent,
        timestamp = %timestamp,
        step_id,
        action = %describe_action(action),
        %cash,
        "position step committed"
    );
}

/// A session that ended without a committed trade verb and fell back to the
/// synthetic `no_trade` sentinel (§4.5 step 6).
pub fn log_synthetic_no_trade(agent: &str, timestamp: &Timestamp) {
    info!(agent, timestamp = %timestamp, "session produced no trade verb, committing synthetic no_trade");
}

/// A session that failed after exhausting collaborator retries (§4.5
/// failure semantics).
pub fn log_session_failed(agent: &str, timestamp: &Timestamp, reason: &str) {
    tracing::warn!(agent, timestamp = %timestamp, reason, "session failed, committing synthetic no_trade");
}

/// One ingest cycle's outcome (mirrors the source's ingest summary logging).
pub fn log_ingest_summary(frequency: Frequency, symbols_attempted: usize, symbols_failed: usize, bars_written: u64) {
    info!(
        frequency = frequency.as_str(),
        symbols_attempted,
        symbols_failed,
        bars_written,
        "ingest cycle complete"
    );
}

/// A scheduler-fired execution (§4.7).
pub fn log_scheduled_execution(frequency: Frequency, timestamp: &Timestamp, agents: usize) {
    info!(
        frequency = frequency.as_str(),
        timestamp = %timestamp,
        agents,
        "scheduled execution fired"
    );
}
