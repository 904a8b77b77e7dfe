//! Incremental ingest, secondary-vendor fallback, and validation (§4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use astock_trader::application::ingestor::MarketDataIngestor;
use astock_trader::application::ledger::PositionLedger;
use astock_trader::domain::errors::CoreError;
use astock_trader::domain::market::{Bar, Frequency, IndexBar, Symbol, Timestamp};
use astock_trader::domain::repositories::MarketQuery;
use astock_trader::domain::ports::VendorMarketApi;
use astock_trader::domain::repositories::MarketStore;
use astock_trader::infrastructure::journal::{JsonlMarketJournal, JsonlPositionJournal};
use astock_trader::infrastructure::persistence::{Database, SqliteLedgerStore, SqliteMarketStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::tempdir;

struct FakeVendor {
    constituents: Vec<Symbol>,
    bars: Vec<Bar>,
    fail_symbols: Vec<Symbol>,
    calls: AtomicUsize,
}

impl FakeVendor {
    fn new(constituents: Vec<Symbol>, bars: Vec<Bar>, fail_symbols: Vec<Symbol>) -> Self {
        Self { constituents, bars, fail_symbols, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl VendorMarketApi for FakeVendor {
    async fn index_constituents(&self, _index: &str) -> Result<Vec<Symbol>, CoreError> {
        Ok(self.constituents.clone())
    }

    async fn daily_bars(&self, symbols: &[Symbol], _from: NaiveDate, _to: NaiveDate) -> Result<Vec<Bar>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let symbol = &symbols[0];
        if self.fail_symbols.contains(symbol) {
            return Err(CoreError::Unavailable("fake vendor outage".to_string()));
        }
        Ok(self.bars.iter().filter(|b| &b.symbol == symbol).cloned().collect())
    }

    async fn index_bars(&self, _index: &str, _from: NaiveDate, _to: NaiveDate) -> Result<Vec<IndexBar>, CoreError> {
        Ok(Vec::new())
    }

    async fn realtime_quote(&self, _symbols: &[Symbol]) -> Result<HashMap<Symbol, Decimal>, CoreError> {
        Ok(HashMap::new())
    }
}

fn bar(symbol: &str, date: &str, price: Decimal) -> Bar {
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

async fn build(primary: FakeVendor, secondary: Option<FakeVendor>) -> (MarketDataIngestor, Arc<SqliteMarketStore>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = Database::new(&format!("sqlite://{}", dir.path().join("store.db").display())).await.unwrap();
    let market_store = Arc::new(SqliteMarketStore::new(db.pool.clone()));
    let ledger_store = Arc::new(SqliteLedgerStore::new(db.pool.clone()));
    let market_journal = Arc::new(JsonlMarketJournal::new(dir.path().join("m_d.jsonl"), dir.path().join("m_h.jsonl")));
    let position_journal = Arc::new(JsonlPositionJournal::new(dir.path().join("positions")));
    let ledger = Arc::new(PositionLedger::new(ledger_store, position_journal));

    let ingestor = MarketDataIngestor::new(
        market_store.clone(),
        market_journal,
        ledger,
        Arc::new(primary),
        secondary.map(|s| Arc::new(s) as Arc<dyn VendorMarketApi>),
    );
    (ingestor, market_store, dir)
}

#[tokio::test]
async fn ingest_index_writes_bars_for_constituents() {
    let vendor = FakeVendor::new(
        vec!["600519.SH".to_string(), "000001.SZ".to_string()],
        vec![bar("600519.SH", "2025-01-02", dec!(1700)), bar("000001.SZ", "2025-01-02", dec!(10))],
        Vec::new(),
    );
    let (ingestor, store, _dir) = build(vendor, None).await;

    let report = ingestor.ingest_index("000300.SH", false).await.unwrap();
    assert_eq!(report.symbols_attempted, 2);
    assert!(report.symbols_failed.is_empty());
    assert_eq!(report.bars_written, 2);

    let present = store.symbols_with_bars(Frequency::Daily).await.unwrap();
    assert_eq!(present.len(), 2);
}

#[tokio::test]
async fn rerunning_ingest_when_store_already_current_writes_nothing() {
    let today = chrono::Utc::now().naive_utc().date();
    let today_str = today.format("%Y-%m-%d").to_string();
    let vendor = FakeVendor::new(vec!["600519.SH".to_string()], vec![bar("600519.SH", &today_str, dec!(1700))], Vec::new());
    let (ingestor, store, _dir) = build(vendor, None).await;

    ingestor.ingest_symbols(&["600519.SH".to_string()], false).await.unwrap();
    let after_first = store.max_timestamp(Frequency::Daily).await.unwrap();
    assert!(after_first.is_some());

    let report = ingestor.ingest_symbols(&["600519.SH".to_string()], false).await.unwrap();
    assert_eq!(report.bars_written, 0);
}

#[tokio::test]
async fn secondary_vendor_used_when_primary_fails_for_symbol() {
    let primary = FakeVendor::new(vec![], vec![], vec!["600519.SH".to_string()]);
    let secondary = FakeVendor::new(vec![], vec![bar("600519.SH", "2025-01-02", dec!(1700))], Vec::new());
    let (ingestor, store, _dir) = build(primary, Some(secondary)).await;

    let report = ingestor.ingest_symbols(&["600519.SH".to_string()], true).await.unwrap();
    assert!(report.symbols_failed.is_empty());
    assert_eq!(report.bars_written, 1);

    let present = store.symbols_with_bars(Frequency::Daily).await.unwrap();
    assert_eq!(present, vec!["600519.SH".to_string()]);
}

#[tokio::test]
async fn symbol_failing_on_both_vendors_is_reported_and_skipped() {
    let primary = FakeVendor::new(vec![], vec![], vec!["600519.SH".to_string()]);
    let secondary = FakeVendor::new(vec![], vec![], vec!["600519.SH".to_string()]);
    let (ingestor, store, _dir) = build(primary, Some(secondary)).await;

    let report = ingestor.ingest_symbols(&["600519.SH".to_string()], true).await.unwrap();
    assert_eq!(report.symbols_failed, vec!["600519.SH".to_string()]);
    assert_eq!(report.bars_written, 0);

    let present = store.symbols_with_bars(Frequency::Daily).await.unwrap();
    assert!(present.is_empty());
}

#[tokio::test]
async fn validate_reports_missing_symbols_and_fix_ingests_them() {
    let vendor = FakeVendor::new(
        vec!["600519.SH".to_string(), "000001.SZ".to_string()],
        vec![bar("600519.SH", "2025-01-02", dec!(1700)), bar("000001.SZ", "2025-01-02", dec!(10))],
        Vec::new(),
    );
    let (ingestor, store, _dir) = build(vendor, None).await;

    // Only one symbol already present in the store.
    store.upsert_bars(&[bar("600519.SH", "2025-01-02", dec!(1700))], Frequency::Daily).await.unwrap();

    let report = ingestor.validate("000300.SH").await.unwrap();
    assert_eq!(report.missing, vec!["000001.SZ".to_string()]);

    let fixed = ingestor.validate_and_fix("000300.SH", true).await.unwrap();
    assert_eq!(fixed.missing, vec!["000001.SZ".to_string()]);

    let present = store.symbols_with_bars(Frequency::Daily).await.unwrap();
    assert_eq!(present.len(), 2);
}
