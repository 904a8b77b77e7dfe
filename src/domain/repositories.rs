//! Persistence traits for the market store (C1) and position ledger (C2).
//!
//! Each concern is split into a `*Query` trait implemented identically by
//! the primary backend and its journal fallback (§4.1 "every primary query
//! has a journal-backed reimplementation with identical semantics"), and a
//! backend-specific trait that adds writes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::errors::CoreError;
use crate::domain::market::{Bar, Frequency, IndexBar, IndexWeight, Symbol, Timestamp};
use crate::domain::position::{Action, PositionStep};
use crate::domain::session::Message;
use rust_decimal::Decimal;

/// Read surface shared by the relational store and the market journal.
#[async_trait]
pub trait MarketQuery: Send + Sync {
    async fn open_prices(
        &self,
        symbols: &[Symbol],
        timestamp: &Timestamp,
    ) -> Result<HashMap<Symbol, Option<Decimal>>, CoreError>;

    async fn ohlcv(&self, symbol: &str, timestamp: &Timestamp) -> Result<Bar, CoreError>;

    /// Maximum stored timestamp strictly less than `t`, at `t`'s granularity.
    async fn previous_trading_timestamp(&self, timestamp: &Timestamp) -> Result<Option<Timestamp>, CoreError>;

    async fn is_trading_timestamp(&self, timestamp: &Timestamp) -> Result<bool, CoreError>;

    async fn all_trading_days(&self, frequency: Frequency) -> Result<Vec<NaiveDate>, CoreError>;

    /// Both maps are aligned to `previous_trading_timestamp(today)`.
    async fn yesterday_open_and_close(
        &self,
        symbols: &[Symbol],
        today: &Timestamp,
    ) -> Result<(HashMap<Symbol, Option<Decimal>>, HashMap<Symbol, Option<Decimal>>), CoreError>;

    /// Newest stored timestamp at `frequency`, across all symbols. Drives
    /// the ingestor's incremental fetch window and the orchestrator's
    /// auto-resume upper bound.
    async fn max_timestamp(&self, frequency: Frequency) -> Result<Option<Timestamp>, CoreError>;

    async fn symbols_with_bars(&self, frequency: Frequency) -> Result<Vec<Symbol>, CoreError>;
}

/// Primary market store: relational, query-optimized, writable (§4.1).
#[async_trait]
pub trait MarketStore: MarketQuery {
    /// Whether the backing table for `frequency` exists — the façade asks
    /// this to distinguish "genuinely empty" from "table missing" before
    /// falling back to the journal (§4.1 fallback trigger rule).
    async fn table_exists(&self, frequency: Frequency) -> Result<bool, CoreError>;

    async fn upsert_bars(&self, bars: &[Bar], frequency: Frequency) -> Result<u64, CoreError>;

    async fn upsert_index_bars(&self, bars: &[IndexBar]) -> Result<u64, CoreError>;

    async fn upsert_index_weights(&self, weights: &[IndexWeight]) -> Result<u64, CoreError>;
}

/// Market journal: the line-delimited fallback, same query semantics plus
/// the merge-and-rewrite write path the ingestor drives (§4.2 merge
/// semantics).
#[async_trait]
pub trait MarketJournal: MarketQuery {
    /// Unions `bars` into the existing journal for `frequency` (new wins on
    /// `(symbol, timestamp)` conflict) and rewrites the file atomically.
    async fn merge_bars(&self, bars: &[Bar], frequency: Frequency) -> Result<u64, CoreError>;
}

/// Read surface shared by the relational ledger and the position journal.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// The step with the maximum `(timestamp, step_id)` at or before `t`,
    /// or `None` if the agent has no history yet (§4.4).
    async fn latest_at_or_before(&self, agent: &str, t: &Timestamp) -> Result<Option<PositionStep>, CoreError>;

    async fn max_step_id(&self, agent: &str) -> Result<Option<i64>, CoreError>;
}

/// Primary ledger: transactional commit, the durable step/holdings tables.
#[async_trait]
pub trait LedgerStore: LedgerQuery {
    /// Allocates `step_id = max_step(agent) + 1` and writes the step plus
    /// one holding row per non-zero symbol in a single transaction.
    async fn commit(
        &self,
        agent: &str,
        timestamp: &Timestamp,
        action: Action,
        cash: Decimal,
        holdings: HashMap<Symbol, i64>,
    ) -> Result<i64, CoreError>;

    /// Every symbol held by `agent` in its latest step, for the held-symbol
    /// union an ingest cycle must keep flowing bars for (§4.2).
    async fn held_symbols(&self, agent: &str) -> Result<Vec<Symbol>, CoreError>;

    /// Every agent with at least one committed step, for held-symbol union
    /// across the whole deployment.
    async fn all_agents(&self) -> Result<Vec<String>, CoreError>;
}

/// Position journal: one append-only file per agent, written after each
/// successful (or best-effort, on primary failure) commit (§4.4).
#[async_trait]
pub trait LedgerJournal: LedgerQuery {
    async fn append(&self, step: &PositionStep) -> Result<(), CoreError>;
}

/// Session/message persistence (§6.1 `sessions`/`messages` tables; §9
/// "Session identity" — sessions are explicit entities, not an implicit
/// timestamp key).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates the session row for `(agent, timestamp)` if it does not
    /// already exist, and returns its id either way.
    async fn ensure_session(&self, agent: &str, timestamp: &Timestamp) -> Result<i64, CoreError>;

    /// Appends one message, sequenced after whatever is already recorded
    /// for that session.
    async fn append_message(&self, session_id: i64, message: Message) -> Result<(), CoreError>;

    /// The tail of the conversation for `agent` strictly before `before`,
    /// most recent session first, for the driver's prompt-context window.
    async fn recent_messages(&self, agent: &str, before: &Timestamp, limit: usize) -> Result<Vec<Message>, CoreError>;
}
