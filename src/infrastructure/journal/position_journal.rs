//! Per-agent position journal, the durable mirror of every ledger commit
//! (§4.4 dual-write, §6.1). One append-only file per agent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::errors::CoreError;
use crate::domain::market::{Symbol, Timestamp};
use crate::domain::position::{Action, PositionStep, CASH_KEY};
use crate::domain::repositories::{LedgerJournal, LedgerQuery};

pub struct JsonlPositionJournal {
    dir: PathBuf,
}

impl JsonlPositionJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, agent: &str) -> PathBuf {
        self.dir.join(format!("{agent}.jsonl"))
    }

    async fn read_lines(&self, agent: &str) -> Result<Vec<PositionStep>, CoreError> {
        let path = self.path_for(agent);
        let Ok(contents) = fs::read_to_string(&path).await else {
            return Ok(Vec::new());
        };
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| Self::parse_line(agent, line))
            .collect()
    }

    fn parse_line(agent: &str, line: &str) -> Result<PositionStep, CoreError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| CoreError::Unavailable(format!("corrupt journal line: {e}")))?;
        let timestamp = Timestamp::from_str(
            value["timestamp"]
                .as_str()
                .ok_or_else(|| CoreError::Unavailable("journal line missing timestamp".into()))?,
        )?;
        let step_id = value["step_id"]
            .as_i64()
            .ok_or_else(|| CoreError::Unavailable("journal line missing step_id".into()))?;
        let action: Action = serde_json::from_value(value["action"].clone())
            .map_err(|e| CoreError::Unavailable(format!("corrupt action: {e}")))?;

        let holdings_obj = value["holdings"]
            .as_object()
            .ok_or_else(|| CoreError::Unavailable("journal line missing holdings".into()))?;
        let mut cash = Decimal::ZERO;
        let mut holdings: HashMap<Symbol, i64> = HashMap::new();
        for (key, val) in holdings_obj {
            if key == CASH_KEY {
                cash = val
                    .as_str()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .ok_or_else(|| CoreError::Unavailable("corrupt cash in journal".into()))?;
            } else {
                let qty = val
                    .as_i64()
                    .ok_or_else(|| CoreError::Unavailable("corrupt holding quantity in journal".into()))?;
                holdings.insert(key.clone(), qty);
            }
        }

        Ok(PositionStep {
            agent: agent.to_string(),
            timestamp,
            step_id,
            action,
            cash,
            holdings,
        })
    }
}

#[async_trait]
impl LedgerQuery for JsonlPositionJournal {
    async fn latest_at_or_before(&self, agent: &str, t: &Timestamp) -> Result<Option<PositionStep>, CoreError> {
        let steps = self.read_lines(agent).await?;
        Ok(steps
            .into_iter()
            .filter(|s| &s.timestamp <= t)
            .max_by(|a, b| (a.timestamp, a.step_id).cmp(&(b.timestamp, b.step_id))))
    }

    async fn max_step_id(&self, agent: &str) -> Result<Option<i64>, CoreError> {
        let steps = self.read_lines(agent).await?;
        Ok(steps.into_iter().map(|s| s.step_id).max())
    }
}

#[async_trait]
impl LedgerJournal for JsonlPositionJournal {
    async fn append(&self, step: &PositionStep) -> Result<(), CoreError> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            fs::create_dir_all(&self.dir).await?;
        }

        let mut holdings_obj = serde_json::Map::new();
        for (symbol, qty) in &step.holdings {
            holdings_obj.insert(symbol.clone(), serde_json::Value::from(*qty));
        }
        holdings_obj.insert(CASH_KEY.to_string(), serde_json::Value::String(step.cash.to_string()));

        let line = serde_json::json!({
            "timestamp": step.timestamp.to_string(),
            "step_id": step.step_id,
            "action": step.action,
            "holdings": holdings_obj,
        });
        let mut serialized =
            serde_json::to_string(&line).map_err(|e| CoreError::Fatal(format!("failed to encode journal line: {e}")))?;
        serialized.push('\n');

        let path = self.path_for(&step.agent);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(serialized.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
