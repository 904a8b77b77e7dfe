//! CLI entrypoint (§6.4). Headless: no UI, structured logs to stdout.

use std::process::ExitCode;
use std::sync::Arc;

use astock_trader::application::driver::AgentStepLoopDriver;
use astock_trader::application::ingestor::MarketDataIngestor;
use astock_trader::application::ledger::PositionLedger;
use astock_trader::application::market_data::MarketDataFacade;
use astock_trader::application::orchestrator::{BacktestRange, Orchestrator};
use astock_trader::application::registry::RunnerRegistry;
use astock_trader::application::scheduler::LiveScheduler;
use astock_trader::config::AppConfig;
use astock_trader::domain::agent_run::RunMode;
use astock_trader::domain::market::Frequency;
use astock_trader::infrastructure::journal::{JsonlMarketJournal, JsonlPositionJournal};
use astock_trader::infrastructure::llm::ScriptedLlmToolServer;
use astock_trader::infrastructure::persistence::{Database, SqliteLedgerStore, SqliteMarketStore, SqliteSessionStore};
use astock_trader::infrastructure::vendor::HttpVendorMarketApi;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;
use url::Url;

#[derive(Parser)]
#[command(author, version, about = "A-share multi-agent trading simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One-shot driver for the whole stack: ingest, then run agents.
    Start {
        #[arg(long, value_enum, default_value = "daily")]
        freq: FreqArg,
        #[arg(long)]
        skip_data: bool,
        #[arg(long)]
        force_data: bool,
        #[arg(long)]
        fix_missing: bool,
        #[arg(long)]
        validate_only: bool,
        #[arg(long)]
        live: bool,
    },
    /// Runs the scheduler standalone.
    Scheduled {
        #[arg(long)]
        config: Option<String>,
        #[arg(long, value_enum)]
        freq: Option<FreqArg>,
        #[arg(long)]
        run_now: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FreqArg {
    Daily,
    Hourly,
}

impl From<FreqArg> for Frequency {
    fn from(f: FreqArg) -> Self {
        match f {
            FreqArg::Daily => Frequency::Daily,
            FreqArg::Hourly => Frequency::Hourly,
        }
    }
}

struct Bootstrap {
    market: Arc<MarketDataFacade>,
    ledger: Arc<PositionLedger>,
    ingestor: Arc<MarketDataIngestor>,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<RunnerRegistry>,
    config: AppConfig,
}

async fn bootstrap(config: AppConfig) -> anyhow::Result<Bootstrap> {
    let db = Database::new(&format!("sqlite://{}", config.db_path)).await?;
    let market_store = Arc::new(SqliteMarketStore::new(db.pool.clone()));
    let ledger_store = Arc::new(SqliteLedgerStore::new(db.pool.clone()));
    let session_store = Arc::new(SqliteSessionStore::new(db.pool.clone()));

    let market_journal = Arc::new(JsonlMarketJournal::new(
        &config.market_journal_daily_path,
        &config.market_journal_hourly_path,
    ));
    let position_journal = Arc::new(JsonlPositionJournal::new(&config.position_journal_dir));

    let market = Arc::new(MarketDataFacade::new(market_store.clone(), Some(market_journal.clone()), config.fallback_enabled));
    let ledger = Arc::new(PositionLedger::new(ledger_store, position_journal));

    let primary_vendor = Arc::new(HttpVendorMarketApi::new(
        config.primary_vendor.name.clone(),
        Url::parse(&config.primary_vendor.base_url)?,
        config.primary_vendor.max_retries,
        config.primary_vendor.timeout,
        config.primary_vendor.base_delay,
        config.primary_vendor.max_retry_delay,
    ));
    let secondary_vendor = config.secondary_vendor.as_ref().map(|v| {
        Arc::new(HttpVendorMarketApi::new(
            v.name.clone(),
            Url::parse(&v.base_url).unwrap(),
            v.max_retries,
            v.timeout,
            v.base_delay,
            v.max_retry_delay,
        )) as Arc<dyn astock_trader::domain::ports::VendorMarketApi>
    });

    let ingestor = Arc::new(MarketDataIngestor::new(
        market_store,
        market_journal,
        ledger.clone(),
        primary_vendor,
        secondary_vendor,
    ));

    let llm = Arc::new(ScriptedLlmToolServer::new());
    let driver = Arc::new(AgentStepLoopDriver::new(market.clone(), ledger.clone(), session_store, llm));
    let orchestrator = Arc::new(Orchestrator::new(market.clone(), ledger.clone(), driver));
    let registry = Arc::new(RunnerRegistry::new());

    Ok(Bootstrap {
        market,
        ledger,
        ingestor,
        orchestrator,
        registry,
        config,
    })
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Start {
            freq,
            skip_data,
            force_data,
            fix_missing,
            validate_only,
            live,
        } => {
            let frequency: Frequency = freq.into();
            let app = bootstrap(config).await?;

            if validate_only {
                let report = app.ingestor.validate(&app.config.index).await?;
                if report.missing.is_empty() {
                    info!("validation passed: no missing symbols");
                } else {
                    error!(missing = ?report.missing, "validation failed: missing symbols");
                    return Ok(1);
                }
                return Ok(0);
            }

            if !skip_data {
                if fix_missing {
                    app.ingestor.validate_and_fix(&app.config.index, true).await?;
                } else {
                    app.ingestor.ingest_index(&app.config.index, force_data).await?;
                }
            }

            let mode = if live { RunMode::Live } else { RunMode::Backtest };
            for agent in app.config.agents.iter().filter(|a| a.enabled) {
                let (run_id, run, _cancel) = app.registry.create(agent.base_signature.clone(), frequency, mode).await;
                let result = if live {
                    let timestamp = app
                        .market
                        .next_trading_timestamp(frequency, None)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("no trading timestamps available"))?;
                    app.orchestrator
                        .run_live_session(&agent.base_signature, timestamp, &agent.step_config, &run)
                        .await
                } else {
                    app.orchestrator
                        .run_backtest(
                            &agent.base_signature,
                            frequency,
                            BacktestRange::AutoResume,
                            &agent.step_config,
                            &run,
                            &_cancel,
                        )
                        .await
                };
                if let Err(e) = result {
                    error!(agent = %agent.base_signature, run_id = %run_id, error = %e, "run failed");
                    return Ok(2);
                }
            }
            Ok(0)
        }
        Commands::Scheduled { config: _, freq, run_now } => {
            let frequency: Frequency = freq.map(Frequency::from).unwrap_or(Frequency::Daily);
            let app = bootstrap(config).await?;
            let scheduler = Arc::new(LiveScheduler::new(
                app.ingestor.clone(),
                app.orchestrator.clone(),
                app.registry.clone(),
                app.config.index.clone(),
                app.config.agents.clone(),
                frequency,
            ));

            if run_now {
                scheduler.trigger_now().await?;
            }
            if app.config.scheduler_auto_start || run_now {
                scheduler.start().await;
            }

            info!("scheduler running. press ctrl+c to shut down.");
            tokio::signal::ctrl_c().await?;
            scheduler.stop().await;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    dotenvy::dotenv().ok();

    match run().await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!(error = %e, "fatal startup or configuration error");
            ExitCode::from(1)
        }
    }
}
