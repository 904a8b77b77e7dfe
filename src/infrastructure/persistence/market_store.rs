//! Relational market store (C1 primary path, §4.1, §6.1).

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::CoreError;
use crate::domain::market::{Bar, Frequency, IndexBar, IndexWeight, Symbol, Timestamp};
use crate::domain::repositories::{MarketQuery, MarketStore};

#[derive(Clone)]
pub struct SqliteMarketStore {
    pool: SqlitePool,
}

impl SqliteMarketStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn table(frequency: Frequency) -> &'static str {
        match frequency {
            Frequency::Daily => "bars_daily",
            Frequency::Hourly => "bars_hourly",
        }
    }

    fn ts_column(frequency: Frequency) -> &'static str {
        match frequency {
            Frequency::Daily => "date",
            Frequency::Hourly => "ts",
        }
    }

    fn row_to_bar(row: &sqlx::sqlite::SqliteRow, symbol: Symbol, timestamp: Timestamp) -> Result<Bar, CoreError> {
        let parse = |col: &str| -> Result<Decimal, CoreError> {
            Decimal::from_str(row.try_get::<String, _>(col)?.as_str())
                .map_err(|e| CoreError::Unavailable(format!("corrupt decimal in {col}: {e}")))
        };
        let amount: Option<String> = row.try_get("amount")?;
        Ok(Bar {
            symbol,
            timestamp,
            open: parse("open")?,
            high: parse("high")?,
            low: parse("low")?,
            close: parse("close")?,
            volume: row.try_get::<i64, _>("volume")?,
            amount: amount.map(|a| Decimal::from_str(&a)).transpose().ok().flatten(),
        })
    }
}

#[async_trait]
impl MarketQuery for SqliteMarketStore {
    async fn open_prices(
        &self,
        symbols: &[Symbol],
        timestamp: &Timestamp,
    ) -> Result<HashMap<Symbol, Option<Decimal>>, CoreError> {
        let table = Self::table(timestamp.frequency());
        let col = Self::ts_column(timestamp.frequency());
        let key = timestamp.to_string();

        let mut out: HashMap<Symbol, Option<Decimal>> = symbols.iter().map(|s| (s.clone(), None)).collect();
        if symbols.is_empty() {
            return Ok(out);
        }

        let placeholders = symbols.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT symbol, open FROM {table} WHERE {col} = ? AND symbol IN ({placeholders})");
        let mut q = sqlx::query(&sql).bind(&key);
        for s in symbols {
            q = q.bind(s);
        }
        let rows = q.fetch_all(&self.pool).await?;
        for row in rows {
            let symbol: String = row.try_get("symbol")?;
            let open: String = row.try_get("open")?;
            out.insert(symbol, Decimal::from_str(&open).ok());
        }
        Ok(out)
    }

    async fn ohlcv(&self, symbol: &str, timestamp: &Timestamp) -> Result<Bar, CoreError> {
        let table = Self::table(timestamp.frequency());
        let col = Self::ts_column(timestamp.frequency());
        let key = timestamp.to_string();
        let sql = format!("SELECT open, high, low, close, volume, amount FROM {table} WHERE symbol = ? AND {col} = ?");
        let row = sqlx::query(&sql)
            .bind(symbol)
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("bar for {symbol} at {timestamp}")))?;
        Self::row_to_bar(&row, symbol.to_string(), *timestamp)
    }

    async fn previous_trading_timestamp(&self, timestamp: &Timestamp) -> Result<Option<Timestamp>, CoreError> {
        let table = Self::table(timestamp.frequency());
        let col = Self::ts_column(timestamp.frequency());
        let key = timestamp.to_string();
        let sql = format!("SELECT MAX({col}) as m FROM {table} WHERE {col} < ?");
        let row = sqlx::query(&sql).bind(&key).fetch_one(&self.pool).await?;
        let max: Option<String> = row.try_get("m")?;
        max.map(|s| Timestamp::from_str(&s)).transpose()
    }

    async fn is_trading_timestamp(&self, timestamp: &Timestamp) -> Result<bool, CoreError> {
        let table = Self::table(timestamp.frequency());
        let col = Self::ts_column(timestamp.frequency());
        let key = timestamp.to_string();
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {col} = ?) as e");
        let row = sqlx::query(&sql).bind(&key).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("e")? != 0)
    }

    async fn all_trading_days(&self, frequency: Frequency) -> Result<Vec<NaiveDate>, CoreError> {
        let table = Self::table(frequency);
        let col = Self::ts_column(frequency);
        let expr = match frequency {
            Frequency::Daily => col.to_string(),
            Frequency::Hourly => format!("substr({col}, 1, 10)"),
        };
        let sql = format!("SELECT DISTINCT {expr} as d FROM {table} ORDER BY d");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let d: String = row.try_get("d")?;
                NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|e| CoreError::Unavailable(format!("corrupt date row: {e}")))
            })
            .collect()
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
        let table = Self::table(prev.frequency());
        let col = Self::ts_column(prev.frequency());
        let key = prev.to_string();

        let mut opens: HashMap<Symbol, Option<Decimal>> = symbols.iter().map(|s| (s.clone(), None)).collect();
        let mut closes = opens.clone();
        if symbols.is_empty() {
            return Ok((opens, closes));
        }

        let placeholders = symbols.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT symbol, open, close FROM {table} WHERE {col} = ? AND symbol IN ({placeholders})");
        let mut q = sqlx::query(&sql).bind(&key);
        for s in symbols {
            q = q.bind(s);
        }
        let rows = q.fetch_all(&self.pool).await?;
        for row in rows {
            let symbol: String = row.try_get("symbol")?;
            let open: String = row.try_get("open")?;
            let close: String = row.try_get("close")?;
            opens.insert(symbol.clone(), Decimal::from_str(&open).ok());
            closes.insert(symbol, Decimal::from_str(&close).ok());
        }
        Ok((opens, closes))
    }

    async fn max_timestamp(&self, frequency: Frequency) -> Result<Option<Timestamp>, CoreError> {
        let table = Self::table(frequency);
        let col = Self::ts_column(frequency);
        let sql = format!("SELECT MAX({col}) as m FROM {table}");
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let max: Option<String> = row.try_get("m")?;
        max.map(|s| Timestamp::from_str(&s)).transpose()
    }

    async fn symbols_with_bars(&self, frequency: Frequency) -> Result<Vec<Symbol>, CoreError> {
        let table = Self::table(frequency);
        let sql = format!("SELECT DISTINCT symbol FROM {table} ORDER BY symbol");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(|row| Ok(row.try_get::<String, _>("symbol")?)).collect()
    }
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    async fn table_exists(&self, frequency: Frequency) -> Result<bool, CoreError> {
        let table = Self::table(frequency);
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?) as e")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("e")? != 0)
    }

    async fn upsert_bars(&self, bars: &[Bar], frequency: Frequency) -> Result<u64, CoreError> {
        let table = Self::table(frequency);
        let col = Self::ts_column(frequency);
        let sql = format!(
            "INSERT INTO {table} (symbol, {col}, open, high, low, close, volume, amount) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (symbol, {col}) DO UPDATE SET \
             open = excluded.open, high = excluded.high, low = excluded.low, \
             close = excluded.close, volume = excluded.volume, amount = excluded.amount"
        );
        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for bar in bars {
            sqlx::query(&sql)
                .bind(&bar.symbol)
                .bind(bar.timestamp.to_string())
                .bind(bar.open.to_string())
                .bind(bar.high.to_string())
                .bind(bar.low.to_string())
                .bind(bar.close.to_string())
                .bind(bar.volume)
                .bind(bar.amount.map(|a| a.to_string()))
                .execute(&mut *tx)
                .await?;
            affected += 1;
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn upsert_index_bars(&self, bars: &[IndexBar]) -> Result<u64, CoreError> {
        let sql = "INSERT INTO index_bars_daily (index_code, date, open, high, low, close, volume, amount) \
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                    ON CONFLICT (index_code, date) DO UPDATE SET \
                    open = excluded.open, high = excluded.high, low = excluded.low, \
                    close = excluded.close, volume = excluded.volume, amount = excluded.amount";
        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for bar in bars {
            sqlx::query(sql)
                .bind(&bar.index_code)
                .bind(bar.date.format("%Y-%m-%d").to_string())
                .bind(bar.open.to_string())
                .bind(bar.high.to_string())
                .bind(bar.low.to_string())
                .bind(bar.close.to_string())
                .bind(bar.volume)
                .bind(bar.amount.map(|a| a.to_string()))
                .execute(&mut *tx)
                .await?;
            affected += 1;
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn upsert_index_weights(&self, weights: &[IndexWeight]) -> Result<u64, CoreError> {
        let sql = "INSERT INTO index_weights (index_code, symbol, date, weight_pct, name) \
                    VALUES (?, ?, ?, ?, ?) \
                    ON CONFLICT (index_code, symbol, date) DO UPDATE SET \
                    weight_pct = excluded.weight_pct, name = excluded.name";
        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for w in weights {
            sqlx::query(sql)
                .bind(&w.index_code)
                .bind(&w.symbol)
                .bind(w.date.format("%Y-%m-%d").to_string())
                .bind(w.weight_pct.to_string())
                .bind(&w.name)
                .execute(&mut *tx)
                .await?;
            affected += 1;
        }
        tx.commit().await?;
        Ok(affected)
    }
}
