//! HTTP vendor market API adapter consumed by the ingestor (C4, §4.2, §6.2).
//! Raw akshare/tushare wire formats are out of scope (§1); this adapter
//! targets a REST shape and carries the retry/backoff discipline the
//! ingestor depends on — exponential backoff with jitter, capped (§5:
//! `base * 2^(attempt-1)`, jittered ±20%, clamped to a configured ceiling).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::domain::errors::CoreError;
use crate::domain::market::{Bar, IndexBar, Symbol};
use crate::domain::ports::VendorMarketApi;

#[derive(Debug, Deserialize)]
struct WireBar {
    symbol: Symbol,
    date: NaiveDate,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: i64,
    amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct WireIndexBar {
    date: NaiveDate,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: i64,
    amount: Option<Decimal>,
}

pub struct HttpVendorMarketApi {
    client: Client,
    base_url: Url,
    vendor_name: String,
    max_retries: u32,
    base_delay: Duration,
    max_retry_delay: Duration,
}

impl HttpVendorMarketApi {
    pub fn new(
        vendor_name: impl Into<String>,
        base_url: Url,
        max_retries: u32,
        timeout: Duration,
        base_delay: Duration,
        max_retry_delay: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and valid");
        Self {
            client,
            base_url,
            vendor_name: vendor_name.into(),
            max_retries,
            base_delay,
            max_retry_delay,
        }
    }

    /// `base * 2^(attempt-1)`, jittered ±20%, clamped to `max_retry_delay`.
    /// `attempt` is the 1-indexed retry number (the first retry is 1).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
        let jitter_fraction = rand::rng().random_range(-0.2..=0.2);
        let delay = (base + base * jitter_fraction).max(0.0);
        Duration::from_secs_f64(delay.min(self.max_retry_delay.as_secs_f64()))
    }

    fn is_transient(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Sends the request built by `build`, retrying transient failures
    /// (429, 5xx, connection errors) up to `max_retries` times with the
    /// backoff above. Non-transient HTTP errors return immediately.
    async fn send_with_retry<F>(&self, mut build: F) -> Result<Response, CoreError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if attempt >= self.max_retries || !Self::is_transient(resp.status()) => {
                    return Err(self.map_status(resp.status()));
                }
                Ok(resp) => {
                    let status = resp.status();
                    attempt += 1;
                    warn!(vendor = %self.vendor_name, %status, attempt, "vendor call failed, retrying");
                }
                Err(e) if attempt >= self.max_retries => {
                    return Err(CoreError::Unavailable(format!("{} vendor call failed: {e}", self.vendor_name)));
                }
                Err(e) => {
                    attempt += 1;
                    warn!(vendor = %self.vendor_name, error = %e, attempt, "vendor call failed, retrying");
                }
            }
            tokio::time::sleep(self.backoff_delay(attempt)).await;
        }
    }

    fn map_status(&self, status: StatusCode) -> CoreError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            CoreError::RateLimited {
                retry_after_secs: self.max_retry_delay.as_secs(),
                reason: format!("{} rate limited", self.vendor_name),
            }
        } else {
            CoreError::Unavailable(format!("{} vendor call failed: HTTP {status}", self.vendor_name))
        }
    }
}

#[async_trait]
impl VendorMarketApi for HttpVendorMarketApi {
    async fn index_constituents(&self, index: &str) -> Result<Vec<Symbol>, CoreError> {
        let url = self
            .base_url
            .join("index_constituents")
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let resp = self.send_with_retry(|| self.client.get(url.clone()).query(&[("index", index)])).await?;
        resp.json::<Vec<Symbol>>()
            .await
            .map_err(|e| CoreError::Unavailable(format!("malformed index_constituents response: {e}")))
    }

    async fn daily_bars(&self, symbols: &[Symbol], from: NaiveDate, to: NaiveDate) -> Result<Vec<Bar>, CoreError> {
        let url = self.base_url.join("daily_bars").map_err(|e| CoreError::Fatal(e.to_string()))?;
        let symbols_param = symbols.join(",");
        let from_param = from.format("%Y-%m-%d").to_string();
        let to_param = to.format("%Y-%m-%d").to_string();
        let resp = self
            .send_with_retry(|| {
                self.client.get(url.clone()).query(&[
                    ("symbols", symbols_param.as_str()),
                    ("from", from_param.as_str()),
                    ("to", to_param.as_str()),
                ])
            })
            .await?;
        let wire: Vec<WireBar> = resp
            .json()
            .await
            .map_err(|e| CoreError::Unavailable(format!("malformed daily_bars response: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|w| Bar {
                symbol: w.symbol,
                timestamp: crate::domain::market::Timestamp::Date(w.date),
                open: w.open,
                high: w.high,
                low: w.low,
                close: w.close,
                volume: w.volume,
                amount: w.amount,
            })
            .collect())
    }

    async fn index_bars(&self, index: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<IndexBar>, CoreError> {
        let url = self.base_url.join("index_bars").map_err(|e| CoreError::Fatal(e.to_string()))?;
        let from_param = from.format("%Y-%m-%d").to_string();
        let to_param = to.format("%Y-%m-%d").to_string();
        let resp = self
            .send_with_retry(|| {
                self.client.get(url.clone()).query(&[
                    ("index", index),
                    ("from", from_param.as_str()),
                    ("to", to_param.as_str()),
                ])
            })
            .await?;
        let wire: Vec<WireIndexBar> = resp
            .json()
            .await
            .map_err(|e| CoreError::Unavailable(format!("malformed index_bars response: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|w| IndexBar {
                index_code: index.to_string(),
                date: w.date,
                open: w.open,
                high: w.high,
                low: w.low,
                close: w.close,
                volume: w.volume,
                amount: w.amount,
            })
            .collect())
    }

    async fn realtime_quote(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, Decimal>, CoreError> {
        let url = self.base_url.join("realtime_quote").map_err(|e| CoreError::Fatal(e.to_string()))?;
        let symbols_param = symbols.join(",");
        let resp = self.send_with_retry(|| self.client.get(url.clone()).query(&[("symbols", symbols_param.as_str())])).await?;
        resp.json::<HashMap<Symbol, Decimal>>()
            .await
            .map_err(|e| CoreError::Unavailable(format!("malformed realtime_quote response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_doubles_each_attempt_within_jitter_bounds() {
        let vendor = HttpVendorMarketApi::new(
            "test",
            Url::parse("https://example-vendor.invalid/api/").unwrap(),
            5,
            Duration::from_secs(30),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        for attempt in 1..=4u32 {
            let expected_base = 5.0 * 2f64.powi((attempt - 1) as i32);
            let delay = vendor.backoff_delay(attempt).as_secs_f64();
            assert!(delay >= expected_base * 0.8 - 0.001, "attempt {attempt}: {delay} below jitter floor");
            assert!(delay <= (expected_base * 1.2).min(60.0) + 0.001, "attempt {attempt}: {delay} above jitter ceiling");
        }
    }

    #[test]
    fn backoff_delay_is_clamped_to_ceiling() {
        let vendor = HttpVendorMarketApi::new(
            "test",
            Url::parse("https://example-vendor.invalid/api/").unwrap(),
            10,
            Duration::from_secs(30),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        let delay = vendor.backoff_delay(10).as_secs_f64();
        assert!(delay <= 60.0);
    }
}
