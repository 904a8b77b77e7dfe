//! Environment-driven configuration (§9 "Global configuration" — scoped
//! down from the source's settings file to the knobs this deployment
//! actually needs; per-session values are threaded explicitly via
//! `domain::ports::SessionContext` instead).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::application::driver::StepLoopConfig;
use crate::domain::market::Frequency;

#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub name: String,
    pub base_url: String,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Backoff base delay: `base * 2^(attempt-1)`, jittered ±20% (§5).
    pub base_delay: Duration,
    /// Backoff ceiling; computed delay is clamped to this (§5).
    pub max_retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub base_signature: String,
    pub frequency: Frequency,
    pub enabled: bool,
    pub step_config: StepLoopConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub market_journal_daily_path: String,
    pub market_journal_hourly_path: String,
    pub position_journal_dir: String,
    pub fallback_enabled: bool,
    pub index: String,
    pub primary_vendor: VendorConfig,
    pub secondary_vendor: Option<VendorConfig>,
    pub scheduler_auto_start: bool,
    pub agents: Vec<AgentConfig>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v.parse::<T>().map_err(|e| anyhow::anyhow!("failed to parse {key}: {e}")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Loads configuration from the process environment (optionally backed
    /// by a `.env` file, loaded by the caller via `dotenvy` before this
    /// runs). Agent definitions are read from a single `AGENTS` CSV of base
    /// signatures, all sharing the other step-loop knobs; deployments with
    /// per-agent overrides can construct `AppConfig` directly instead.
    pub fn from_env() -> Result<Self> {
        let db_path = env_or("DB_PATH", "data/astock_trader.db");
        let market_journal_daily_path = env_or("MARKET_JOURNAL_DAILY_PATH", "data/journal/market_daily.jsonl");
        let market_journal_hourly_path = env_or("MARKET_JOURNAL_HOURLY_PATH", "data/journal/market_hourly.jsonl");
        let position_journal_dir = env_or("POSITION_JOURNAL_DIR", "data/journal/positions");
        let fallback_enabled = env_parsed("FALLBACK_ENABLED", true)?;
        let index = env_or("INDEX_CODE", "000300.SH");

        let primary_vendor = VendorConfig {
            name: env_or("VENDOR_PRIMARY_NAME", "primary"),
            base_url: env_or("VENDOR_PRIMARY_BASE_URL", "https://example-vendor.invalid/api/"),
            max_retries: env_parsed("VENDOR_PRIMARY_MAX_RETRIES", 3u32)?,
            timeout: Duration::from_secs(env_parsed("VENDOR_PRIMARY_TIMEOUT_SECS", 30u64)?),
            base_delay: Duration::from_secs_f64(env_parsed("VENDOR_PRIMARY_BASE_DELAY_SECS", 5.0f64)?),
            max_retry_delay: Duration::from_secs_f64(env_parsed("VENDOR_PRIMARY_MAX_RETRY_DELAY_SECS", 60.0f64)?),
        };
        let secondary_vendor = match env::var("VENDOR_SECONDARY_BASE_URL") {
            Ok(base_url) => Some(VendorConfig {
                name: env_or("VENDOR_SECONDARY_NAME", "secondary"),
                base_url,
                max_retries: 2,
                timeout: Duration::from_secs(30),
                base_delay: Duration::from_secs_f64(env_parsed("VENDOR_SECONDARY_BASE_DELAY_SECS", 5.0f64)?),
                max_retry_delay: Duration::from_secs_f64(env_parsed("VENDOR_SECONDARY_MAX_RETRY_DELAY_SECS", 60.0f64)?),
            }),
            Err(_) => None,
        };

        let scheduler_auto_start = env_parsed("SCHEDULER_AUTO_START", false)?;

        let max_steps = env_parsed("AGENT_MAX_STEPS", 20u32)?;
        let max_retries = env_parsed("AGENT_MAX_RETRIES", 3u32)?;
        let base_delay_ms = env_parsed("AGENT_BASE_DELAY_MS", 500u64)?;
        let initial_cash: Decimal = env_or("AGENT_INITIAL_CASH", "1000000").parse().context("failed to parse AGENT_INITIAL_CASH")?;
        let recent_window = env_parsed("AGENT_RECENT_WINDOW", 5usize)?;
        let tradable_symbols: Vec<String> = env::var("AGENT_TRADABLE_SYMBOLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let frequency = Frequency::from_str(&env_or("AGENT_FREQUENCY", "daily")).map_err(|e| anyhow::anyhow!("{e}"))?;

        let agents = env::var("AGENTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|base_signature| AgentConfig {
                base_signature,
                frequency,
                enabled: true,
                step_config: StepLoopConfig {
                    max_steps,
                    max_retries,
                    base_delay_ms,
                    initial_cash,
                    tradable_symbols: tradable_symbols.clone(),
                    recent_window,
                },
            })
            .collect();

        Ok(Self {
            db_path,
            market_journal_daily_path,
            market_journal_hourly_path,
            position_journal_dir,
            fallback_enabled,
            index,
            primary_vendor,
            secondary_vendor,
            scheduler_auto_start,
            agents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default_when_unset() {
        assert_eq!(env_or("ASTOCK_TRADER_TEST_UNSET_KEY", "fallback"), "fallback");
    }

    #[test]
    fn env_parsed_falls_back_on_missing_key() {
        let v: u32 = env_parsed("ASTOCK_TRADER_TEST_UNSET_NUM", 7).unwrap();
        assert_eq!(v, 7);
    }
}
