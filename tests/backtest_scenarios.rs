//! End-to-end seed scenarios (S1-S3) driving the step-loop over a real
//! SQLite-backed store and journal pair.

use std::sync::Arc;

use astock_trader::application::driver::{AgentStepLoopDriver, StepLoopConfig, StepOutcome};
use astock_trader::application::ledger::PositionLedger;
use astock_trader::application::market_data::MarketDataFacade;
use astock_trader::domain::market::{Bar, Symbol, Timestamp};
use astock_trader::domain::repositories::{LedgerQuery, MarketStore};
use astock_trader::infrastructure::journal::{JsonlMarketJournal, JsonlPositionJournal};
use astock_trader::infrastructure::llm::{ScriptedCall, ScriptedLlmToolServer};
use astock_trader::infrastructure::persistence::{Database, SqliteLedgerStore, SqliteMarketStore, SqliteSessionStore};
use rust_decimal_macros::dec;
use tempfile::tempdir;

struct Harness {
    market: Arc<MarketDataFacade>,
    ledger: Arc<PositionLedger>,
    ledger_store: Arc<SqliteLedgerStore>,
    position_journal: Arc<JsonlPositionJournal>,
    llm: Arc<ScriptedLlmToolServer>,
    driver: Arc<AgentStepLoopDriver>,
    _dir: tempfile::TempDir,
}

async fn build_harness() -> Harness {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("store.db");
    let db = Database::new(&format!("sqlite://{}", db_path.display())).await.unwrap();

    let market_store = Arc::new(SqliteMarketStore::new(db.pool.clone()));
    let ledger_store = Arc::new(SqliteLedgerStore::new(db.pool.clone()));
    let session_store = Arc::new(SqliteSessionStore::new(db.pool.clone()));

    let market_journal = Arc::new(JsonlMarketJournal::new(dir.path().join("market_daily.jsonl"), dir.path().join("market_hourly.jsonl")));
    let position_journal = Arc::new(JsonlPositionJournal::new(dir.path().join("positions")));

    let market = Arc::new(MarketDataFacade::new(market_store.clone(), Some(market_journal), true));
    let ledger = Arc::new(PositionLedger::new(ledger_store.clone(), position_journal.clone()));
    let llm = Arc::new(ScriptedLlmToolServer::new());
    let driver = Arc::new(AgentStepLoopDriver::new(market.clone(), ledger.clone(), session_store, llm.clone()));

    market_store
        .upsert_bars(
            &[
                bar("600519.SH", "2025-01-02", dec!(1700), dec!(1720)),
                bar("600519.SH", "2025-01-03", dec!(1710), dec!(1730)),
            ],
            astock_trader::domain::market::Frequency::Daily,
        )
        .await
        .unwrap();

    Harness {
        market,
        ledger,
        ledger_store,
        position_journal,
        llm,
        driver,
        _dir: dir,
    }
}

fn bar(symbol: &str, date: &str, open: rust_decimal::Decimal, close: rust_decimal::Decimal) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp: date.parse::<Timestamp>().unwrap(),
        open,
        high: close,
        low: open,
        close,
        volume: 1_000_000,
        amount: None,
    }
}

fn config(symbols: Vec<Symbol>) -> StepLoopConfig {
    StepLoopConfig {
        max_steps: 10,
        max_retries: 3,
        base_delay_ms: 10,
        initial_cash: dec!(100000),
        tradable_symbols: symbols,
        recent_window: 5,
    }
}

#[tokio::test]
async fn s1_backtest_one_buy_step() {
    let h = build_harness().await;
    let t: Timestamp = "2025-01-02".parse().unwrap();
    h.llm
        .program("agent-a", t, vec![ScriptedCall::Buy { symbol: "600519.SH".into(), amount: 10 }])
        .await;

    let outcome = h.driver.run_step("agent-a", t, &config(vec!["600519.SH".to_string()])).await.unwrap();
    assert_eq!(outcome, StepOutcome::Committed);

    let step = h.ledger.latest_at_or_before("agent-a", &t).await.unwrap().unwrap();
    assert_eq!(step.step_id, 0);
    assert_eq!(step.cash, dec!(83000));
    assert_eq!(step.holdings.get("600519.SH"), Some(&10));
}

#[tokio::test]
async fn s2_sell_partial_after_buy() {
    let h = build_harness().await;
    let t1: Timestamp = "2025-01-02".parse().unwrap();
    let t2: Timestamp = "2025-01-03".parse().unwrap();

    h.llm.program("agent-a", t1, vec![ScriptedCall::Buy { symbol: "600519.SH".into(), amount: 10 }]).await;
    h.llm.program("agent-a", t2, vec![ScriptedCall::Sell { symbol: "600519.SH".into(), amount: 4 }]).await;

    let cfg = config(vec!["600519.SH".to_string()]);
    h.driver.run_step("agent-a", t1, &cfg).await.unwrap();
    let outcome = h.driver.run_step("agent-a", t2, &cfg).await.unwrap();
    assert_eq!(outcome, StepOutcome::Committed);

    let step = h.ledger.latest_at_or_before("agent-a", &t2).await.unwrap().unwrap();
    assert_eq!(step.step_id, 1);
    assert_eq!(step.cash, dec!(89840));
    assert_eq!(step.holdings.get("600519.SH"), Some(&6));
}

#[tokio::test]
async fn s3_insufficient_funds_commits_synthetic_no_trade() {
    let h = build_harness().await;
    let t: Timestamp = "2025-01-02".parse().unwrap();
    h.llm
        .program("agent-b", t, vec![ScriptedCall::Buy { symbol: "600519.SH".into(), amount: 10 }])
        .await;

    let mut cfg = config(vec!["600519.SH".to_string()]);
    cfg.initial_cash = dec!(1000);
    let outcome = h.driver.run_step("agent-b", t, &cfg).await.unwrap();
    assert!(matches!(outcome, StepOutcome::FailedWithSyntheticNoTrade { .. }));

    let step = h.ledger.latest_at_or_before("agent-b", &t).await.unwrap().unwrap();
    assert_eq!(step.cash, dec!(1000));
    assert!(step.holdings.is_empty());
}

#[tokio::test]
async fn opening_position_is_none_before_any_history() {
    let h = build_harness().await;
    let t: Timestamp = "2025-01-02".parse().unwrap();
    assert_eq!(h.ledger.opening_position("fresh-agent", &t).await.unwrap(), None);
}

#[tokio::test]
async fn dual_write_equivalence_after_commit() {
    let h = build_harness().await;
    let t: Timestamp = "2025-01-02".parse().unwrap();
    h.llm
        .program("agent-c", t, vec![ScriptedCall::Buy { symbol: "600519.SH".into(), amount: 5 }])
        .await;
    h.driver.run_step("agent-c", t, &config(vec!["600519.SH".to_string()])).await.unwrap();

    let via_primary = h.ledger_store.latest_at_or_before("agent-c", &t).await.unwrap().unwrap();
    let via_journal = h.position_journal.latest_at_or_before("agent-c", &t).await.unwrap().unwrap();
    assert_eq!(via_primary.action, via_journal.action);
    assert_eq!(via_primary.cash, via_journal.cash);
    assert_eq!(via_primary.holdings, via_journal.holdings);
    assert_eq!(via_primary.cash, dec!(91500));
}
