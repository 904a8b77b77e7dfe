// Market data query façade with primary+journal fallback, and the trading
// calendar derived from it (C1, C3).
pub mod market_data;

// Dual-write position ledger façade (C2).
pub mod ledger;

// Incremental vendor ingestion into the market store (C4).
pub mod ingestor;

// Per-timestamp LLM step-loop driver (C5).
pub mod driver;

// Backtest/live-session timestamp scheduling over the driver (C6).
pub mod orchestrator;

// Cron-equivalent live trading loop (C7).
pub mod scheduler;

// In-memory AgentRun registry (C8).
pub mod registry;

// tracing-span context threading, replacing the source's global logger.
pub mod log_context;
