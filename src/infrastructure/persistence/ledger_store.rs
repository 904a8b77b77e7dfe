//! Relational position ledger (C2 primary path, §4.4, §6.1).

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::CoreError;
use crate::domain::market::{Symbol, Timestamp};
use crate::domain::position::{Action, PositionStep};
use crate::domain::repositories::{LedgerQuery, LedgerStore};

#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_action(verb: &str, symbol: Option<String>, amount: Option<i64>) -> Result<Action, CoreError> {
        match verb {
            "buy" => Ok(Action::Buy {
                symbol: symbol.ok_or_else(|| CoreError::Unavailable("buy row missing symbol".into()))?,
                amount: amount.ok_or_else(|| CoreError::Unavailable("buy row missing amount".into()))?,
            }),
            "sell" => Ok(Action::Sell {
                symbol: symbol.ok_or_else(|| CoreError::Unavailable("sell row missing symbol".into()))?,
                amount: amount.ok_or_else(|| CoreError::Unavailable("sell row missing amount".into()))?,
            }),
            "no_trade" => Ok(Action::NoTrade),
            other => Err(CoreError::Unavailable(format!("corrupt action verb: {other}"))),
        }
    }

    async fn holdings_for(&self, row_id: i64) -> Result<HashMap<Symbol, i64>, CoreError> {
        let rows = sqlx::query("SELECT symbol, quantity FROM position_holdings WHERE step_id_ref = ?")
            .bind(row_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| Ok((r.try_get::<String, _>("symbol")?, r.try_get::<i64, _>("quantity")?)))
            .collect()
    }
}

#[async_trait]
impl LedgerQuery for SqliteLedgerStore {
    async fn latest_at_or_before(&self, agent: &str, t: &Timestamp) -> Result<Option<PositionStep>, CoreError> {
        let key = t.to_string();
        let row = sqlx::query(
            "SELECT id, timestamp, step_id, action_verb, action_symbol, action_amount, cash \
             FROM position_steps WHERE agent = ? AND timestamp <= ? \
             ORDER BY timestamp DESC, step_id DESC LIMIT 1",
        )
        .bind(agent)
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let id: i64 = row.try_get("id")?;
        let timestamp: String = row.try_get("timestamp")?;
        let step_id: i64 = row.try_get("step_id")?;
        let verb: String = row.try_get("action_verb")?;
        let symbol: Option<String> = row.try_get("action_symbol")?;
        let amount: Option<i64> = row.try_get("action_amount")?;
        let cash: String = row.try_get("cash")?;
        let holdings = self.holdings_for(id).await?;

        Ok(Some(PositionStep {
            agent: agent.to_string(),
            timestamp: Timestamp::from_str(&timestamp)?,
            step_id,
            action: Self::row_to_action(&verb, symbol, amount)?,
            cash: Decimal::from_str(&cash).map_err(|e| CoreError::Unavailable(format!("corrupt cash: {e}")))?,
            holdings,
        }))
    }

    async fn max_step_id(&self, agent: &str) -> Result<Option<i64>, CoreError> {
        let row = sqlx::query("SELECT MAX(step_id) as m FROM position_steps WHERE agent = ?")
            .bind(agent)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<i64>, _>("m")?)
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn commit(
        &self,
        agent: &str,
        timestamp: &Timestamp,
        action: Action,
        cash: Decimal,
        holdings: HashMap<Symbol, i64>,
    ) -> Result<i64, CoreError> {
        let mut tx = self.pool.begin().await?;

        let current_max: Option<i64> = sqlx::query("SELECT MAX(step_id) as m FROM position_steps WHERE agent = ?")
            .bind(agent)
            .fetch_one(&mut *tx)
            .await?
            .try_get("m")?;
        let step_id = current_max.map(|m| m + 1).unwrap_or(0);

        let (verb, symbol, amount) = match &action {
            Action::Buy { symbol, amount } => ("buy", Some(symbol.clone()), Some(*amount)),
            Action::Sell { symbol, amount } => ("sell", Some(symbol.clone()), Some(*amount)),
            Action::NoTrade => ("no_trade", None, None),
        };

        let inserted = sqlx::query(
            "INSERT INTO position_steps (agent, timestamp, step_id, action_verb, action_symbol, action_amount, cash) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(agent)
        .bind(timestamp.to_string())
        .bind(step_id)
        .bind(verb)
        .bind(symbol)
        .bind(amount)
        .bind(cash.to_string())
        .execute(&mut *tx)
        .await?;

        let row_id = inserted.last_insert_rowid();
        for (symbol, quantity) in holdings.iter().filter(|(_, qty)| **qty != 0) {
            sqlx::query("INSERT INTO position_holdings (step_id_ref, symbol, quantity) VALUES (?, ?, ?)")
                .bind(row_id)
                .bind(symbol)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(step_id)
    }

    async fn held_symbols(&self, agent: &str) -> Result<Vec<Symbol>, CoreError> {
        let row = sqlx::query(
            "SELECT id FROM position_steps WHERE agent = ? ORDER BY timestamp DESC, step_id DESC LIMIT 1",
        )
        .bind(agent)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(Vec::new()) };
        let id: i64 = row.try_get("id")?;
        Ok(self.holdings_for(id).await?.into_keys().collect())
    }

    async fn all_agents(&self) -> Result<Vec<String>, CoreError> {
        let rows = sqlx::query("SELECT DISTINCT agent FROM position_steps ORDER BY agent")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| Ok(r.try_get::<String, _>("agent")?)).collect()
    }
}
