//! Line-delimited market data journal, the fallback path for C1 (§4.1,
//! §6.1). One file per frequency; each line is one symbol's full history.
//!
//! Field names `"1. buy price"` / `"4. sell price"` for open/close are a
//! compatibility requirement, not a stylistic choice (§9 "Price field
//! naming") — existing journals must stay readable.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::errors::CoreError;
use crate::domain::market::{Bar, Frequency, Symbol, Timestamp};
use crate::domain::repositories::{MarketJournal, MarketQuery};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalMeta {
    symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalBarFields {
    #[serde(rename = "1. buy price")]
    open: String,
    high: String,
    low: String,
    #[serde(rename = "4. sell price")]
    close: String,
    volume: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalLine {
    meta: JournalMeta,
    series: BTreeMap<String, JournalBarFields>,
}

pub struct JsonlMarketJournal {
    daily_path: PathBuf,
    hourly_path: PathBuf,
}

impl JsonlMarketJournal {
    pub fn new(daily_path: impl Into<PathBuf>, hourly_path: impl Into<PathBuf>) -> Self {
        Self {
            daily_path: daily_path.into(),
            hourly_path: hourly_path.into(),
        }
    }

    fn path_for(&self, frequency: Frequency) -> &Path {
        match frequency {
            Frequency::Daily => &self.daily_path,
            Frequency::Hourly => &self.hourly_path,
        }
    }

    /// Loads the whole journal for `frequency` into `symbol -> (timestamp_key -> bar)`.
    async fn load(&self, frequency: Frequency) -> Result<HashMap<Symbol, BTreeMap<String, Bar>>, CoreError> {
        let path = self.path_for(frequency);
        let mut out: HashMap<Symbol, BTreeMap<String, Bar>> = HashMap::new();
        let Ok(contents) = fs::read_to_string(path).await else {
            return Ok(out);
        };
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: JournalLine = serde_json::from_str(line)
                .map_err(|e| CoreError::Unavailable(format!("corrupt journal line: {e}")))?;
            let mut series = BTreeMap::new();
            for (ts_key, fields) in parsed.series {
                let timestamp = Timestamp::from_str(&ts_key)?;
                let bar = Bar {
                    symbol: parsed.meta.symbol.clone(),
                    timestamp,
                    open: Decimal::from_str(&fields.open)
                        .map_err(|e| CoreError::Unavailable(format!("corrupt open: {e}")))?,
                    high: Decimal::from_str(&fields.high)
                        .map_err(|e| CoreError::Unavailable(format!("corrupt high: {e}")))?,
                    low: Decimal::from_str(&fields.low)
                        .map_err(|e| CoreError::Unavailable(format!("corrupt low: {e}")))?,
                    close: Decimal::from_str(&fields.close)
                        .map_err(|e| CoreError::Unavailable(format!("corrupt close: {e}")))?,
                    volume: fields.volume,
                    amount: None,
                };
                series.insert(ts_key, bar);
            }
            out.insert(parsed.meta.symbol, series);
        }
        Ok(out)
    }

    /// Writes `data` back atomically (write-to-temp-and-rename, §4.2).
    async fn write_all(&self, frequency: Frequency, data: &HashMap<Symbol, BTreeMap<String, Bar>>) -> Result<(), CoreError> {
        let path = self.path_for(frequency);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !fs::try_exists(parent).await.unwrap_or(false)
        {
            fs::create_dir_all(parent).await?;
        }

        let mut symbols: Vec<&Symbol> = data.keys().collect();
        symbols.sort();

        let mut buf = String::new();
        for symbol in symbols {
            let series = &data[symbol];
            let mut fields = BTreeMap::new();
            for (ts_key, bar) in series {
                fields.insert(
                    ts_key.clone(),
                    JournalBarFields {
                        open: bar.open.to_string(),
                        high: bar.high.to_string(),
                        low: bar.low.to_string(),
                        close: bar.close.to_string(),
                        volume: bar.volume,
                    },
                );
            }
            let line = JournalLine {
                meta: JournalMeta { symbol: symbol.clone() },
                series: fields,
            };
            buf.push_str(&serde_json::to_string(&line).map_err(|e| CoreError::Fatal(e.to_string()))?);
            buf.push('\n');
        }

        let tmp_path = path.with_extension("tmp");
        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(buf.as_bytes()).await?;
        tmp.flush().await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl MarketQuery for JsonlMarketJournal {
    async fn open_prices(
        &self,
        symbols: &[Symbol],
        timestamp: &Timestamp,
    ) -> Result<HashMap<Symbol, Option<Decimal>>, CoreError> {
        let data = self.load(timestamp.frequency()).await?;
        let key = timestamp.to_string();
        Ok(symbols
            .iter()
            .map(|s| {
                let open = data.get(s).and_then(|series| series.get(&key)).map(|b| b.open);
                (s.clone(), open)
            })
            .collect())
    }

    async fn ohlcv(&self, symbol: &str, timestamp: &Timestamp) -> Result<Bar, CoreError> {
        let data = self.load(timestamp.frequency()).await?;
        let key = timestamp.to_string();
        data.get(symbol)
            .and_then(|series| series.get(&key))
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("journal bar for {symbol} at {timestamp}")))
    }

    async fn previous_trading_timestamp(&self, timestamp: &Timestamp) -> Result<Option<Timestamp>, CoreError> {
        let data = self.load(timestamp.frequency()).await?;
        let key = timestamp.to_string();
        let mut best: Option<String> = None;
        for series in data.values() {
            for ts_key in series.keys() {
                if ts_key.as_str() < key.as_str() && best.as_deref().is_none_or(|b| ts_key.as_str() > b) {
                    best = Some(ts_key.clone());
                }
            }
        }
        best.map(|s| Timestamp::from_str(&s)).transpose()
    }

    async fn is_trading_timestamp(&self, timestamp: &Timestamp) -> Result<bool, CoreError> {
        let data = self.load(timestamp.frequency()).await?;
        let key = timestamp.to_string();
        Ok(data.values().any(|series| series.contains_key(&key)))
    }

    async fn all_trading_days(&self, frequency: Frequency) -> Result<Vec<NaiveDate>, CoreError> {
        let data = self.load(frequency).await?;
        let mut days: Vec<NaiveDate> = data
            .values()
            .flat_map(|series| series.values().map(|b| b.timestamp.date()))
            .collect();
        days.sort();
        days.dedup();
        Ok(days)
    }

    async fn yesterday_open_and_close(
        &self,
        symbols: &[Symbol],
        today: &Timestamp,
    ) -> Result<(HashMap<Symbol, Option<Decimal>>, HashMap<Symbol, Option<Decimal>>), CoreError> {
        let prev = match self.previous_trading_timestamp(today).await? {
            Some(p) => p,
            None => {
                let empty = symbols.iter().map(|s| (s.clone(), None)).collect::<HashMap<_, _>>();
                return Ok((empty.clone(), empty));
            }
        };
        let data = self.load(prev.frequency()).await?;
        let key = prev.to_string();
        let opens = symbols
            .iter()
            .map(|s| (s.clone(), data.get(s).and_then(|series| series.get(&key)).map(|b| b.open)))
            .collect();
        let closes = symbols
            .iter()
            .map(|s| (s.clone(), data.get(s).and_then(|series| series.get(&key)).map(|b| b.close)))
            .collect();
        Ok((opens, closes))
    }

    async fn max_timestamp(&self, frequency: Frequency) -> Result<Option<Timestamp>, CoreError> {
        let data = self.load(frequency).await?;
        let mut best: Option<String> = None;
        for series in data.values() {
            for ts_key in series.keys() {
                if best.as_deref().is_none_or(|b| ts_key.as_str() > b) {
                    best = Some(ts_key.clone());
                }
            }
        }
        best.map(|s| Timestamp::from_str(&s)).transpose()
    }

    async fn symbols_with_bars(&self, frequency: Frequency) -> Result<Vec<Symbol>, CoreError> {
        let data = self.load(frequency).await?;
        let mut symbols: Vec<Symbol> = data.into_keys().collect();
        symbols.sort();
        Ok(symbols)
    }
}

#[async_trait]
impl MarketJournal for JsonlMarketJournal {
    async fn merge_bars(&self, bars: &[Bar], frequency: Frequency) -> Result<u64, CoreError> {
        let mut data = self.load(frequency).await?;
        let mut written = 0u64;
        for bar in bars {
            let series = data.entry(bar.symbol.clone()).or_default();
            series.insert(bar.timestamp.to_string(), bar.clone());
            written += 1;
        }
        self.write_all(frequency, &data).await?;
        Ok(written)
    }
}
