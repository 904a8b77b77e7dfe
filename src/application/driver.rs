//! Agent step-loop driver (C5, §4.5). Drives one `(agent, timestamp)`
//! trading session: builds the prompt context, hands control to the LLM
//! tool server, and commits the resulting ledger mutation(s).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::application::ledger::PositionLedger;
use crate::application::log_context::{log_session_failed, log_step_committed, log_synthetic_no_trade};
use crate::application::market_data::MarketDataFacade;
use crate::domain::errors::CoreError;
use crate::domain::market::{Symbol, Timestamp};
use crate::domain::ports::{LlmToolServer, SessionContext, SessionEnd, ToolGateway};
use crate::domain::position::{Action, Position};
use crate::domain::repositories::{MarketQuery, SessionStore};
use crate::domain::session::{Message, Role};

/// Per-agent knobs the driver needs (§4.5 "Inputs").
#[derive(Debug, Clone)]
pub struct StepLoopConfig {
    pub max_steps: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub initial_cash: Decimal,
    pub tradable_symbols: Vec<Symbol>,
    pub recent_window: usize,
}

/// What `run_step` actually did, distinct from a `CoreError` — a session
/// that exhausted its retries still commits a synthetic `no_trade` and is
/// not, by itself, fatal to the orchestrator run (§4.5 failure semantics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Committed,
    FailedWithSyntheticNoTrade { reason: String },
}

pub struct AgentStepLoopDriver {
    market: Arc<MarketDataFacade>,
    ledger: Arc<PositionLedger>,
    sessions: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmToolServer>,
}

impl AgentStepLoopDriver {
    pub fn new(
        market: Arc<MarketDataFacade>,
        ledger: Arc<PositionLedger>,
        sessions: Arc<dyn SessionStore>,
        llm: Arc<dyn LlmToolServer>,
    ) -> Self {
        Self {
            market,
            ledger,
            sessions,
            llm,
        }
    }

    /// Executes one trading session and guarantees exactly one sentinel
    /// outcome: either the committed trade verb(s) from the session, or a
    /// synthetic `no_trade` if none were committed (§4.5 step 6).
    #[instrument(skip(self, config), fields(agent = %agent, timestamp = %timestamp))]
    pub async fn run_step(&self, agent: &str, timestamp: Timestamp, config: &StepLoopConfig) -> Result<StepOutcome, CoreError> {
        timestamp.validate_alignment()?;

        let opening = match self.ledger.opening_position(agent, &timestamp).await? {
            Some(position) => position,
            None => Position::new(config.initial_cash),
        };

        let session_id = self.sessions.ensure_session(agent, &timestamp).await?;
        let prompt = self.build_prompt_context(agent, &timestamp, &opening, config).await?;

        let state = SessionState {
            position: Mutex::new(opening),
            committed_any: AtomicBool::new(false),
            session_id,
        };
        let gateway = DriverSession {
            market: self.market.clone(),
            ledger: self.ledger.clone(),
            sessions: self.sessions.clone(),
            state,
        };

        gateway
            .record_message(
                &self.ctx(agent, timestamp, config),
                Message {
                    seq: 0,
                    role: Role::User,
                    content: prompt,
                    tool_call_id: None,
                    tool_name: None,
                    created_at: Utc::now(),
                },
            )
            .await?;

        let ctx = self.ctx(agent, timestamp, config);
        let outcome = self.llm.run_session(&ctx, &gateway).await;

        match outcome {
            Ok(SessionEnd::RetriesExhausted { reason }) => {
                log_session_failed(agent, &timestamp, &reason);
                if !gateway.state.committed_any.load(Ordering::SeqCst) {
                    self.commit_synthetic_no_trade(agent, &timestamp).await?;
                }
                Ok(StepOutcome::FailedWithSyntheticNoTrade { reason })
            }
            Ok(_) => {
                if !gateway.state.committed_any.load(Ordering::SeqCst) {
                    log_synthetic_no_trade(agent, &timestamp);
                    self.commit_synthetic_no_trade(agent, &timestamp).await?;
                }
                Ok(StepOutcome::Committed)
            }
            Err(e @ CoreError::Fatal(_)) => Err(e),
            Err(e) => {
                log_session_failed(agent, &timestamp, &e.to_string());
                if !gateway.state.committed_any.load(Ordering::SeqCst) {
                    self.commit_synthetic_no_trade(agent, &timestamp).await?;
                }
                Ok(StepOutcome::FailedWithSyntheticNoTrade { reason: e.to_string() })
            }
        }
    }

    async fn commit_synthetic_no_trade(&self, agent: &str, timestamp: &Timestamp) -> Result<(), CoreError> {
        self.ledger.no_trade(agent, timestamp).await?;
        Ok(())
    }

    fn ctx(&self, agent: &str, timestamp: Timestamp, config: &StepLoopConfig) -> SessionContext {
        SessionContext {
            agent: agent.to_string(),
            timestamp,
            max_steps: config.max_steps,
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
        }
    }

    async fn build_prompt_context(
        &self,
        agent: &str,
        timestamp: &Timestamp,
        opening: &Position,
        config: &StepLoopConfig,
    ) -> Result<String, CoreError> {
        let opens = self.market.open_prices(&config.tradable_symbols, timestamp).await?;

        let held: Vec<Symbol> = opening.holdings.keys().cloned().collect();
        let (y_open, y_close) = if held.is_empty() {
            (HashMap::new(), HashMap::new())
        } else {
            self.market.yesterday_open_and_close(&held, timestamp).await?
        };
        let realized_pnl: HashMap<Symbol, Option<Decimal>> = held
            .iter()
            .map(|s| {
                let pnl = match (y_open.get(s).copied().flatten(), y_close.get(s).copied().flatten()) {
                    (Some(o), Some(c)) => Some(c - o),
                    _ => None,
                };
                (s.clone(), pnl)
            })
            .collect();

        let recent = self.sessions.recent_messages(agent, timestamp, config.recent_window).await?;

        Ok(format!(
            "timestamp={timestamp}\ncash={}\nholdings={:?}\ntradable_symbols={:?}\nopen_prices={opens:?}\nprior_session_pnl={realized_pnl:?}\nrecent_messages={}",
            opening.cash,
            opening.holdings,
            config.tradable_symbols,
            recent.len()
        ))
    }
}

struct SessionState {
    position: Mutex<Position>,
    committed_any: AtomicBool,
    session_id: i64,
}

struct DriverSession {
    market: Arc<MarketDataFacade>,
    ledger: Arc<PositionLedger>,
    sessions: Arc<dyn SessionStore>,
    state: SessionState,
}

impl DriverSession {
    async fn opening_price(&self, symbol: &str, timestamp: &Timestamp) -> Result<Decimal, CoreError> {
        self.market
            .open_prices(&[symbol.to_string()], timestamp)
            .await?
            .get(symbol)
            .copied()
            .flatten()
            .ok_or_else(|| CoreError::ValidationError {
                reason: format!("no opening price available for {symbol} at {timestamp}"),
            })
    }
}

#[async_trait]
impl ToolGateway for DriverSession {
    async fn record_message(&self, _ctx: &SessionContext, message: Message) -> Result<(), CoreError> {
        self.sessions.append_message(self.state.session_id, message).await
    }

    async fn get_price(&self, ctx: &SessionContext, symbol: &str) -> Result<Option<Decimal>, CoreError> {
        Ok(self.opening_price(symbol, &ctx.timestamp).await.ok())
    }

    async fn get_news(
        &self,
        _ctx: &SessionContext,
        _symbols: Option<&[Symbol]>,
        _topics: Option<&[String]>,
    ) -> Result<Vec<String>, CoreError> {
        // News search is the collaborator's own concern (§1 Out of scope);
        // the core has no source of truth for it.
        Ok(Vec::new())
    }

    async fn buy(&self, ctx: &SessionContext, symbol: &str, amount: i64) -> Result<(), CoreError> {
        let price = self.opening_price(symbol, &ctx.timestamp).await?;
        let mut position = self.state.position.lock().await;
        let next = position.apply_buy(symbol, amount, price)?;
        let step_id = self
            .ledger
            .commit(
                &ctx.agent,
                ctx.timestamp,
                Action::Buy {
                    symbol: symbol.to_string(),
                    amount,
                },
                next.cash,
                next.holdings.clone(),
            )
            .await?;
        log_step_committed(
            &ctx.agent,
            &ctx.timestamp,
            step_id,
            &Action::Buy {
                symbol: symbol.to_string(),
                amount,
            },
            next.cash,
        );
        *position = next;
        self.state.committed_any.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn sell(&self, ctx: &SessionContext, symbol: &str, amount: i64) -> Result<(), CoreError> {
        let price = self.opening_price(symbol, &ctx.timestamp).await?;
        let mut position = self.state.position.lock().await;
        let next = position.apply_sell(symbol, amount, price)?;
        let step_id = self
            .ledger
            .commit(
                &ctx.agent,
                ctx.timestamp,
                Action::Sell {
                    symbol: symbol.to_string(),
                    amount,
                },
                next.cash,
                next.holdings.clone(),
            )
            .await?;
        log_step_committed(
            &ctx.agent,
            &ctx.timestamp,
            step_id,
            &Action::Sell {
                symbol: symbol.to_string(),
                amount,
            },
            next.cash,
        );
        *position = next;
        self.state.committed_any.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn no_trade(&self, ctx: &SessionContext) -> Result<(), CoreError> {
        let position = self.state.position.lock().await;
        let step_id = self
            .ledger
            .commit(
                &ctx.agent,
                ctx.timestamp,
                Action::NoTrade,
                position.cash,
                position.holdings.clone(),
            )
            .await?;
        log_step_committed(&ctx.agent, &ctx.timestamp, step_id, &Action::NoTrade, position.cash);
        self.state.committed_any.store(true, Ordering::SeqCst);
        Ok(())
    }
}
