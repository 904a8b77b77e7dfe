//! S4: resume-after-gap backtest iteration.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use astock_trader::application::driver::{AgentStepLoopDriver, StepLoopConfig};
use astock_trader::application::ledger::PositionLedger;
use astock_trader::application::market_data::MarketDataFacade;
use astock_trader::application::orchestrator::{BacktestRange, Orchestrator};
use astock_trader::domain::agent_run::{AgentRun, RunMode, RunStatus};
use astock_trader::domain::market::{Bar, Frequency, Timestamp};
use astock_trader::domain::repositories::MarketStore;
use astock_trader::infrastructure::journal::{JsonlMarketJournal, JsonlPositionJournal};
use astock_trader::infrastructure::llm::ScriptedLlmToolServer;
use astock_trader::infrastructure::persistence::{Database, SqliteLedgerStore, SqliteMarketStore, SqliteSessionStore};
use rust_decimal_macros::dec;
use tempfile::tempdir;
use tokio::sync::Mutex;

fn bar(symbol: &str, date: &str, price: rust_decimal::Decimal) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp: date.parse::<Timestamp>().unwrap(),
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 1,
        amount: None,
    }
}

#[tokio::test]
async fn s4_auto_resume_iterates_every_trading_day_once() {
    let dir = tempdir().unwrap();
    let db = Database::new(&format!("sqlite://{}", dir.path().join("store.db").display())).await.unwrap();

    let market_store = Arc::new(SqliteMarketStore::new(db.pool.clone()));
    let ledger_store = Arc::new(SqliteLedgerStore::new(db.pool.clone()));
    let session_store = Arc::new(SqliteSessionStore::new(db.pool.clone()));
    let market_journal = Arc::new(JsonlMarketJournal::new(dir.path().join("m_d.jsonl"), dir.path().join("m_h.jsonl")));
    let position_journal = Arc::new(JsonlPositionJournal::new(dir.path().join("positions")));

    let market = Arc::new(MarketDataFacade::new(market_store.clone(), Some(market_journal), true));
    let ledger = Arc::new(PositionLedger::new(ledger_store, position_journal));
    let llm = Arc::new(ScriptedLlmToolServer::new());
    let driver = Arc::new(AgentStepLoopDriver::new(market.clone(), ledger.clone(), session_store, llm));
    let orchestrator = Orchestrator::new(market.clone(), ledger.clone(), driver);

    let days = ["2025-01-02", "2025-01-03", "2025-01-06", "2025-01-07", "2025-01-08", "2025-01-09", "2025-01-10"];
    let bars: Vec<Bar> = days.iter().map(|d| bar("600519.SH", d, dec!(1700))).collect();
    market_store.upsert_bars(&bars, Frequency::Daily).await.unwrap();

    // Ledger tip already at 2025-01-02 (simulate a prior run).
    ledger.no_trade("agent-resume", &"2025-01-02".parse().unwrap()).await.unwrap();

    let run = Mutex::new(AgentRun::new("agent-resume", Frequency::Daily, RunMode::Backtest));
    let cancel = Arc::new(AtomicBool::new(false));
    let cfg = StepLoopConfig {
        max_steps: 10,
        max_retries: 3,
        base_delay_ms: 10,
        initial_cash: dec!(100000),
        tradable_symbols: vec!["600519.SH".to_string()],
        recent_window: 5,
    };

    orchestrator
        .run_backtest("agent-resume", Frequency::Daily, BacktestRange::AutoResume, &cfg, &run, &cancel)
        .await
        .unwrap();

    let final_run = run.into_inner();
    assert_eq!(final_run.status, RunStatus::Completed);
    // 2025-01-03 through 2025-01-10 inclusive: 6 trading days.
    assert_eq!(final_run.steps_completed, 6);
}

#[tokio::test]
async fn zero_step_completion_when_ledger_tip_matches_newest_bar() {
    let dir = tempdir().unwrap();
    let db = Database::new(&format!("sqlite://{}", dir.path().join("store.db").display())).await.unwrap();

    let market_store = Arc::new(SqliteMarketStore::new(db.pool.clone()));
    let ledger_store = Arc::new(SqliteLedgerStore::new(db.pool.clone()));
    let session_store = Arc::new(SqliteSessionStore::new(db.pool.clone()));
    let market_journal = Arc::new(JsonlMarketJournal::new(dir.path().join("m_d.jsonl"), dir.path().join("m_h.jsonl")));
    let position_journal = Arc::new(JsonlPositionJournal::new(dir.path().join("positions")));

    let market = Arc::new(MarketDataFacade::new(market_store.clone(), Some(market_journal), true));
    let ledger = Arc::new(PositionLedger::new(ledger_store, position_journal));
    let llm = Arc::new(ScriptedLlmToolServer::new());
    let driver = Arc::new(AgentStepLoopDriver::new(market.clone(), ledger.clone(), session_store, llm));
    let orchestrator = Orchestrator::new(market.clone(), ledger.clone(), driver);

    market_store.upsert_bars(&[bar("600519.SH", "2025-01-02", dec!(1700))], Frequency::Daily).await.unwrap();
    ledger.no_trade("agent-done", &"2025-01-02".parse().unwrap()).await.unwrap();

    let run = Mutex::new(AgentRun::new("agent-done", Frequency::Daily, RunMode::Backtest));
    let cancel = Arc::new(AtomicBool::new(false));
    let cfg = StepLoopConfig {
        max_steps: 10,
        max_retries: 3,
        base_delay_ms: 10,
        initial_cash: dec!(100000),
        tradable_symbols: vec!["600519.SH".to_string()],
        recent_window: 5,
    };

    orchestrator
        .run_backtest("agent-done", Frequency::Daily, BacktestRange::AutoResume, &cfg, &run, &cancel)
        .await
        .unwrap();

    let final_run = run.into_inner();
    assert_eq!(final_run.status, RunStatus::Completed);
    assert_eq!(final_run.steps_completed, 0);
}
