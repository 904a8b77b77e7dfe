//! Scripted LLM tool server (§1: the real collaborator is out of scope).
//! Drives a pre-programmed sequence of tool calls per `(agent, timestamp)` —
//! used by tests and by any deployment that has not wired in a real model.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::errors::CoreError;
use crate::domain::market::Symbol;
use crate::domain::ports::{LlmToolServer, SessionContext, SessionEnd, ToolGateway};
use crate::domain::session::{Message, Role};

/// One trade verb a script entry drives through the gateway.
#[derive(Debug, Clone)]
pub enum ScriptedCall {
    Buy { symbol: Symbol, amount: i64 },
    Sell { symbol: Symbol, amount: i64 },
    NoTrade,
}

/// Scripted collaborator: `(agent, timestamp) -> queue of calls to issue`.
/// Any `(agent, timestamp)` without a script entry gets a single `no_trade`.
pub struct ScriptedLlmToolServer {
    scripts: Arc<Mutex<HashMap<(String, String), VecDeque<ScriptedCall>>>>,
}

impl Default for ScriptedLlmToolServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlmToolServer {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn program(&self, agent: impl Into<String>, timestamp: impl ToString, calls: Vec<ScriptedCall>) {
        let mut guard = self.scripts.lock().await;
        guard.insert((agent.into(), timestamp.to_string()), calls.into());
    }
}

#[async_trait]
impl LlmToolServer for ScriptedLlmToolServer {
    async fn run_session(
        &self,
        ctx: &SessionContext,
        gateway: &(dyn ToolGateway + Send + Sync),
    ) -> Result<SessionEnd, CoreError> {
        let key = (ctx.agent.clone(), ctx.timestamp.to_string());
        let queue = {
            let mut guard = self.scripts.lock().await;
            guard.remove(&key).unwrap_or_else(|| VecDeque::from([ScriptedCall::NoTrade]))
        };

        for call in queue {
            gateway
                .record_message(
                    ctx,
                    Message {
                        seq: 0,
                        role: Role::Assistant,
                        content: format!("{call:?}"),
                        tool_call_id: None,
                        tool_name: Some(verb_name(&call).to_string()),
                        created_at: Utc::now(),
                    },
                )
                .await?;
            match call {
                ScriptedCall::Buy { symbol, amount } => gateway.buy(ctx, &symbol, amount).await?,
                ScriptedCall::Sell { symbol, amount } => gateway.sell(ctx, &symbol, amount).await?,
                ScriptedCall::NoTrade => gateway.no_trade(ctx).await?,
            }
        }

        Ok(SessionEnd::Completed)
    }
}

fn verb_name(call: &ScriptedCall) -> &'static str {
    match call {
        ScriptedCall::Buy { .. } => "buy",
        ScriptedCall::Sell { .. } => "sell",
        ScriptedCall::NoTrade => "no_trade",
    }
}
