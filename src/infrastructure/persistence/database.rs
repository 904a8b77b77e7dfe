use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Pooled connection to the primary relational store (§6.1).
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!(db_url, "connected to primary store");

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars_daily (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                amount TEXT,
                PRIMARY KEY (symbol, date)
            );
            CREATE INDEX IF NOT EXISTS idx_bars_daily_date ON bars_daily (date);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create bars_daily table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars_hourly (
                symbol TEXT NOT NULL,
                ts TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                amount TEXT,
                PRIMARY KEY (symbol, ts)
            );
            CREATE INDEX IF NOT EXISTS idx_bars_hourly_ts ON bars_hourly (ts);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create bars_hourly table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_bars_daily (
                index_code TEXT NOT NULL,
                date TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                amount TEXT,
                PRIMARY KEY (index_code, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create index_bars_daily table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_weights (
                index_code TEXT NOT NULL,
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                weight_pct TEXT NOT NULL,
                name TEXT,
                PRIMARY KEY (index_code, symbol, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create index_weights table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                step_id INTEGER NOT NULL,
                action_verb TEXT NOT NULL,
                action_symbol TEXT,
                action_amount INTEGER,
                cash TEXT NOT NULL,
                UNIQUE (agent, step_id)
            );
            CREATE INDEX IF NOT EXISTS idx_position_steps_agent_ts ON position_steps (agent, timestamp, step_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create position_steps table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_holdings (
                step_id_ref INTEGER NOT NULL REFERENCES position_steps(id),
                symbol TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                PRIMARY KEY (step_id_ref, symbol)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create position_holdings table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                UNIQUE (agent, timestamp)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create sessions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                session_ref INTEGER NOT NULL REFERENCES sessions(id),
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_call_id TEXT,
                tool_name TEXT,
                ts TEXT NOT NULL,
                PRIMARY KEY (session_ref, seq)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create messages table")?;

        info!("primary store schema initialized");
        Ok(())
    }
}
