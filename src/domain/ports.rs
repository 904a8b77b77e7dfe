//! External collaborator interfaces (§6.2, §6.3, §9 "Global configuration").
//!
//! Both traits take an explicit context value rather than reading process
//! globals — the source smuggled `SIGNATURE`/`LOG_PATH` through a shared
//! settings file; tool callbacks here receive everything they need as
//! arguments instead.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::errors::CoreError;
use crate::domain::market::{IndexBar, Symbol, Timestamp};
use crate::domain::session::Message;

/// Per-session parameters threaded explicitly into every tool call, in place
/// of the source's process-wide settings file.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub agent: String,
    pub timestamp: Timestamp,
    pub max_steps: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

/// How a driven session ended.
#[derive(Debug, Clone)]
pub enum SessionEnd {
    /// The model signalled it was done.
    Completed,
    /// `max_steps` was reached without an explicit completion signal.
    MaxStepsExhausted,
    /// Retries against the collaborator were exhausted.
    RetriesExhausted { reason: String },
}

/// The tool surface the driver exposes to the LLM tool server for one
/// session (§4.5, §6.2). Implemented by the application-layer driver;
/// called back into by whatever drives the model.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Appends one turn to the session transcript as it is produced.
    async fn record_message(&self, ctx: &SessionContext, message: Message) -> Result<(), CoreError>;

    /// Read-only: opening price lookup for a single symbol.
    async fn get_price(&self, ctx: &SessionContext, symbol: &str) -> Result<Option<Decimal>, CoreError>;

    /// Read-only: free-form news lookup, scoped by symbols and/or topics.
    async fn get_news(
        &self,
        ctx: &SessionContext,
        symbols: Option<&[Symbol]>,
        topics: Option<&[String]>,
    ) -> Result<Vec<String>, CoreError>;

    /// Ledger-affecting. Rejects (non-fatal) on insufficient funds or an
    /// unavailable price; the collaborator surfaces the rejection to the model.
    async fn buy(&self, ctx: &SessionContext, symbol: &str, amount: i64) -> Result<(), CoreError>;

    /// Ledger-affecting. Rejects (non-fatal) on insufficient holdings.
    async fn sell(&self, ctx: &SessionContext, symbol: &str, amount: i64) -> Result<(), CoreError>;

    /// Ledger-affecting identity step.
    async fn no_trade(&self, ctx: &SessionContext) -> Result<(), CoreError>;
}

/// The external LLM tool server (out of scope: model invocation, news
/// search, arithmetic helpers — §1). The driver hands over control for one
/// session and gets back a terminal status (§4.5 step 5).
#[async_trait]
pub trait LlmToolServer: Send + Sync {
    async fn run_session(
        &self,
        ctx: &SessionContext,
        gateway: &(dyn ToolGateway + Send + Sync),
    ) -> Result<SessionEnd, CoreError>;
}

/// Vendor market API, ingestor-facing only (§6.2). Raw akshare/tushare style
/// adapters are out of scope; this is the shape the ingestor depends on.
#[async_trait]
pub trait VendorMarketApi: Send + Sync {
    async fn index_constituents(&self, index: &str) -> Result<Vec<Symbol>, CoreError>;

    async fn daily_bars(
        &self,
        symbols: &[Symbol],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<crate::domain::market::Bar>, CoreError>;

    async fn index_bars(&self, index: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<IndexBar>, CoreError>;

    async fn realtime_quote(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, Decimal>, CoreError>;
}
