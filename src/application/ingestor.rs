//! Incremental vendor ingestion into the market store (C4, §4.2).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::application::ledger::PositionLedger;
use crate::application::log_context::log_ingest_summary;
use crate::domain::errors::CoreError;
use crate::domain::market::{Frequency, Symbol};
use crate::domain::ports::VendorMarketApi;
use crate::domain::repositories::{MarketJournal, MarketStore};

/// Outcome of one ingest cycle, returned to callers (scheduler, CLI) that
/// need to decide whether to run a validator pass.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub symbols_attempted: usize,
    pub symbols_failed: Vec<Symbol>,
    pub bars_written: u64,
}

/// What's missing after comparing constituents, held symbols, and the
/// store (§4.2 "Validation").
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub missing: Vec<Symbol>,
}

pub struct MarketDataIngestor {
    store: Arc<dyn MarketStore>,
    journal: Arc<dyn MarketJournal>,
    ledger: Arc<PositionLedger>,
    primary_vendor: Arc<dyn VendorMarketApi>,
    secondary_vendor: Option<Arc<dyn VendorMarketApi>>,
}

impl MarketDataIngestor {
    pub fn new(
        store: Arc<dyn MarketStore>,
        journal: Arc<dyn MarketJournal>,
        ledger: Arc<PositionLedger>,
        primary_vendor: Arc<dyn VendorMarketApi>,
        secondary_vendor: Option<Arc<dyn VendorMarketApi>>,
    ) -> Self {
        Self {
            store,
            journal,
            ledger,
            primary_vendor,
            secondary_vendor,
        }
    }

    /// Index-member ingestion: `current_constituents ∪ held symbols across
    /// every agent` (§4.2 "Held-symbol union"), daily frequency only — the
    /// held-symbol union exists to keep valuation possible for delisted
    /// holdings, which is a daily-bar concern.
    pub async fn ingest_index(&self, index: &str, force: bool) -> Result<IngestReport, CoreError> {
        let constituents = self.primary_vendor.index_constituents(index).await?;
        let mut symbols: HashSet<Symbol> = constituents.into_iter().collect();

        for agent in self.ledger.all_agents().await? {
            for symbol in self.ledger.held_symbols(&agent).await? {
                symbols.insert(symbol);
            }
        }

        let symbols: Vec<Symbol> = symbols.into_iter().collect();
        self.ingest_symbols(&symbols, force).await
    }

    /// Ingests an explicit symbol list at daily frequency, e.g. for
    /// `--fix-missing` re-invocation (§4.2 "Validation").
    pub async fn ingest_symbols(&self, symbols: &[Symbol], force: bool) -> Result<IngestReport, CoreError> {
        let now = Utc::now().naive_utc().date();

        let max = self.store.max_timestamp(Frequency::Daily).await?;
        let from = match max {
            Some(ts) if !force => {
                let d = ts.date();
                if d >= now {
                    info!(index = "daily", "store already current, skipping ingest");
                    return Ok(IngestReport {
                        symbols_attempted: symbols.len(),
                        symbols_failed: Vec::new(),
                        bars_written: 0,
                    });
                }
                d.succ_opt().unwrap_or(d)
            }
            _ => NaiveDate::from_ymd_opt(1990, 1, 1).expect("valid epoch date"),
        };

        let mut all_bars = Vec::new();
        let mut failed = Vec::new();

        for symbol in symbols {
            match self.fetch_one(symbol, from, now).await {
                Ok(bars) => all_bars.extend(bars),
                Err(e) => {
                    warn!(symbol, error = %e, "symbol failed on both vendors, skipping");
                    failed.push(symbol.clone());
                }
            }
        }

        self.journal.merge_bars(&all_bars, Frequency::Daily).await?;
        let written = self.store.upsert_bars(&all_bars, Frequency::Daily).await?;

        log_ingest_summary(Frequency::Daily, symbols.len(), failed.len(), written);
        Ok(IngestReport {
            symbols_attempted: symbols.len(),
            symbols_failed: failed,
            bars_written: written,
        })
    }

    /// One symbol, primary vendor first, secondary on primary failure
    /// (§4.2 "Failure handling"). Backoff/jitter lives in the vendor
    /// adapter itself; this is just the fallback hop.
    async fn fetch_one(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<crate::domain::market::Bar>, CoreError> {
        match self.primary_vendor.daily_bars(std::slice::from_ref(&symbol.to_string()), from, to).await {
            Ok(bars) => Ok(bars),
            Err(primary_err) => {
                let Some(secondary) = &self.secondary_vendor else {
                    return Err(primary_err);
                };
                warn!(symbol, error = %primary_err, "primary vendor failed, trying secondary");
                secondary.daily_bars(std::slice::from_ref(&symbol.to_string()), from, to).await
            }
        }
    }

    /// Compares current constituents, held symbols, and store contents
    /// (§4.2 "Validation"). `missing = required \ present`.
    pub async fn validate(&self, index: &str) -> Result<ValidationReport, CoreError> {
        let constituents = self.primary_vendor.index_constituents(index).await?;
        let mut required: HashSet<Symbol> = constituents.into_iter().collect();

        for agent in self.ledger.all_agents().await? {
            for symbol in self.ledger.held_symbols(&agent).await? {
                required.insert(symbol);
            }
        }

        let present: HashSet<Symbol> = self.store.symbols_with_bars(Frequency::Daily).await?.into_iter().collect();
        let missing: Vec<Symbol> = required.difference(&present).cloned().collect();
        Ok(ValidationReport { missing })
    }

    /// Validates, then if anything is missing and `fix` is set, re-invokes
    /// ingestion with exactly the missing symbols (§4.2 `--fix-missing`).
    pub async fn validate_and_fix(&self, index: &str, fix: bool) -> Result<ValidationReport, CoreError> {
        let report = self.validate(index).await?;
        if fix && !report.missing.is_empty() {
            self.ingest_symbols(&report.missing, true).await?;
        }
        Ok(report)
    }
}
