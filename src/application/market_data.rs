//! Market data query façade: primary store with journal fallback (C1, §4.1),
//! plus the trading-calendar derivation over it (C3, §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Timelike};
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::errors::CoreError;
use crate::domain::market::{Bar, Frequency, Symbol, Timestamp, ASTOCK_HOURLY_SLOTS};
use crate::domain::repositories::{MarketJournal, MarketQuery, MarketStore};

/// Primary-with-fallback façade. Every read tries the primary store first;
/// on any error, if fallback is enabled and a journal is configured, the
/// identical query is retried against the journal. A genuinely empty
/// primary result (`Ok` with nothing in it) is never treated as a failure.
pub struct MarketDataFacade {
    primary: Arc<dyn MarketStore>,
    journal: Option<Arc<dyn MarketJournal>>,
    fallback_enabled: bool,
}

impl MarketDataFacade {
    pub fn new(primary: Arc<dyn MarketStore>, journal: Option<Arc<dyn MarketJournal>>, fallback_enabled: bool) -> Self {
        Self {
            primary,
            journal,
            fallback_enabled,
        }
    }

    /// On any primary failure, asks the primary whether `frequency`'s table
    /// exists at all before falling back (§4.1 fallback trigger rule): a
    /// missing table and an I/O/connection error both fall back to the
    /// journal, but are logged distinctly so an operator can tell a
    /// genuinely absent table from a primary that's merely unreachable.
    /// A genuinely empty result never reaches this path — the primary
    /// returns that as `Ok`, not `Err`.
    async fn with_fallback<T, F, Fut>(
        &self,
        op_name: &str,
        frequency: Frequency,
        primary_err: CoreError,
        fallback: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Arc<dyn MarketJournal>) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        if !self.fallback_enabled {
            return Err(primary_err);
        }
        let Some(journal) = self.journal.clone() else {
            return Err(primary_err);
        };
        let table_missing = !self.primary.table_exists(frequency).await.unwrap_or(true);
        warn!(
            op = op_name,
            error = %primary_err,
            table_missing,
            "primary market store query failed, falling back to journal"
        );
        fallback(journal).await
    }

    /// The next trading timestamp at `frequency` strictly after `after`
    /// (or the earliest one overall, if `after` is `None`). Daily advances
    /// to the next calendar day with stored data; hourly advances to the
    /// next configured slot, rolling over day boundaries (§4.6).
    pub async fn next_trading_timestamp(
        &self,
        frequency: Frequency,
        after: Option<Timestamp>,
    ) -> Result<Option<Timestamp>, CoreError> {
        let days = self.all_trading_days(frequency).await?;
        match frequency {
            Frequency::Daily => {
                let after_date = after.map(|t| t.date());
                Ok(days
                    .into_iter()
                    .find(|d| after_date.is_none_or(|ad| *d > ad))
                    .map(Timestamp::Date))
            }
            Frequency::Hourly => self.next_hourly_timestamp(&days, after),
        }
    }

    fn next_hourly_timestamp(&self, days: &[NaiveDate], after: Option<Timestamp>) -> Result<Option<Timestamp>, CoreError> {
        let slot = |day: NaiveDate, idx: usize| {
            let (h, m) = ASTOCK_HOURLY_SLOTS[idx];
            Timestamp::DateTime(day.and_hms_opt(h, m, 0).expect("valid trading-hour slot"))
        };

        let Some(after) = after else {
            return Ok(days.first().map(|d| slot(*d, 0)));
        };
        let Timestamp::DateTime(dt) = after else {
            return Err(CoreError::ValidationError {
                reason: "next_trading_timestamp(Hourly) requires an hourly `after` timestamp".to_string(),
            });
        };

        let cur_idx = ASTOCK_HOURLY_SLOTS
            .iter()
            .position(|(h, m)| dt.time().hour() == *h && dt.time().minute() == *m);
        if let Some(idx) = cur_idx
            && idx + 1 < ASTOCK_HOURLY_SLOTS.len()
        {
            return Ok(Some(slot(dt.date(), idx + 1)));
        }
        Ok(days.iter().find(|d| **d > dt.date()).map(|d| slot(*d, 0)))
    }
}

#[async_trait]
impl MarketQuery for MarketDataFacade {
    async fn open_prices(
        &self,
        symbols: &[Symbol],
        timestamp: &Timestamp,
    ) -> Result<HashMap<Symbol, Option<Decimal>>, CoreError> {
        match self.primary.open_prices(symbols, timestamp).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.with_fallback("open_prices", timestamp.frequency(), e, |j| async move {
                    j.open_prices(symbols, timestamp).await
                })
                .await
            }
        }
    }

    async fn ohlcv(&self, symbol: &str, timestamp: &Timestamp) -> Result<Bar, CoreError> {
        match self.primary.ohlcv(symbol, timestamp).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.with_fallback("ohlcv", timestamp.frequency(), e, |j| async move { j.ohlcv(symbol, timestamp).await })
                    .await
            }
        }
    }

    async fn previous_trading_timestamp(&self, timestamp: &Timestamp) -> Result<Option<Timestamp>, CoreError> {
        match self.primary.previous_trading_timestamp(timestamp).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.with_fallback("previous_trading_timestamp", timestamp.frequency(), e, |j| async move {
                    j.previous_trading_timestamp(timestamp).await
                })
                .await
            }
        }
    }

    async fn is_trading_timestamp(&self, timestamp: &Timestamp) -> Result<bool, CoreError> {
        match self.primary.is_trading_timestamp(timestamp).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.with_fallback("is_trading_timestamp", timestamp.frequency(), e, |j| async move {
                    j.is_trading_timestamp(timestamp).await
                })
                .await
            }
        }
    }

    async fn all_trading_days(&self, frequency: Frequency) -> Result<Vec<NaiveDate>, CoreError> {
        match self.primary.all_trading_days(frequency).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.with_fallback("all_trading_days", frequency, e, |j| async move { j.all_trading_days(frequency).await })
                    .await
            }
        }
    }

    async fn yesterday_open_and_close(
        &self,
        symbols: &[Symbol],
        today: &Timestamp,
    ) -> Result<(HashMap<Symbol, Option<Decimal>>, HashMap<Symbol, Option<Decimal>>), CoreError> {
        match self.primary.yesterday_open_and_close(symbols, today).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.with_fallback("yesterday_open_and_close", today.frequency(), e, |j| async move {
                    j.yesterday_open_and_close(symbols, today).await
                })
                .await
            }
        }
    }

    async fn max_timestamp(&self, frequency: Frequency) -> Result<Option<Timestamp>, CoreError> {
        match self.primary.max_timestamp(frequency).await {
            Ok(v) => Ok(v),
            Err(e) => self.with_fallback("max_timestamp", frequency, e, |j| async move { j.max_timestamp(frequency).await }).await,
        }
    }

    async fn symbols_with_bars(&self, frequency: Frequency) -> Result<Vec<Symbol>, CoreError> {
        match self.primary.symbols_with_bars(frequency).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.with_fallback("symbols_with_bars", frequency, e, |j| async move {
                    j.symbols_with_bars(frequency).await
                })
                .await
            }
        }
    }
}
