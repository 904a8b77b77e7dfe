//! Cron-equivalent live trading loop (C7, §4.7). Grounded on the source's
//! `LiveTradingScheduler` (`apscheduler` cron triggers in `Asia/Shanghai`);
//! re-expressed as a single cooperative timer task since there is no cron
//! crate in this stack (§5 "a single cooperative timer source").

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Asia::Shanghai;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::application::ingestor::MarketDataIngestor;
use crate::application::log_context::log_scheduled_execution;
use crate::application::orchestrator::Orchestrator;
use crate::application::registry::RunnerRegistry;
use crate::config::AgentConfig;
use crate::domain::agent_kind::{agent_signature, AgentKind};
use crate::domain::agent_run::RunMode;
use crate::domain::errors::CoreError;
use crate::domain::market::{Frequency, Timestamp, ASTOCK_HOURLY_SLOTS};

/// Trading-hour fire times, exchange-local, five minutes after each
/// configured trading-hour slot closes (§4.7).
const DAILY_FIRE_TIME: (u32, u32) = (9, 35);

fn hourly_fire_times() -> [(u32, u32); 4] {
    let mut times = [(0u32, 0u32); 4];
    for (i, (h, m)) in ASTOCK_HOURLY_SLOTS.iter().enumerate() {
        let total = h * 60 + m + 5;
        times[i] = (total / 60, total % 60);
    }
    times
}

/// One configured cron-equivalent fire time, exchange-local (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledJob {
    pub label: &'static str,
    pub fire_time: (u32, u32),
}

fn configured_jobs(frequency: Frequency) -> Vec<ScheduledJob> {
    match frequency {
        Frequency::Daily => vec![ScheduledJob { label: "daily-open", fire_time: DAILY_FIRE_TIME }],
        Frequency::Hourly => {
            const LABELS: [&str; 4] = ["hourly-slot-1", "hourly-slot-2", "hourly-slot-3", "hourly-slot-4"];
            hourly_fire_times()
                .into_iter()
                .zip(LABELS)
                .map(|(fire_time, label)| ScheduledJob { label, fire_time })
                .collect()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub running: bool,
    pub frequency: Option<Frequency>,
    pub started_at: Option<DateTime<Utc>>,
    pub jobs: Vec<ScheduledJob>,
    pub next_runs: Vec<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
}

/// Drives the ingestor then the orchestrator, in live-session mode, for
/// every enabled agent, each time a configured trading-hour fire time
/// elapses in `Asia/Shanghai`.
pub struct LiveScheduler {
    ingestor: Arc<MarketDataIngestor>,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<RunnerRegistry>,
    index: String,
    agents: Vec<AgentConfig>,
    frequency: Frequency,
    status: Mutex<SchedulerStatus>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl LiveScheduler {
    pub fn new(
        ingestor: Arc<MarketDataIngestor>,
        orchestrator: Arc<Orchestrator>,
        registry: Arc<RunnerRegistry>,
        index: impl Into<String>,
        agents: Vec<AgentConfig>,
        frequency: Frequency,
    ) -> Self {
        Self {
            ingestor,
            orchestrator,
            registry,
            index: index.into(),
            agents,
            frequency,
            status: Mutex::new(SchedulerStatus::default()),
            stop_tx: Mutex::new(None),
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.lock().await.clone()
    }

    /// Starts the timer loop as a background task. Idempotent: calling
    /// `start` while already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut stop_guard = self.stop_tx.lock().await;
        if stop_guard.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *stop_guard = Some(tx);
        drop(stop_guard);

        {
            let mut status = self.status.lock().await;
            status.running = true;
            status.frequency = Some(self.frequency);
            status.started_at = Some(Utc::now());
            status.jobs = configured_jobs(self.frequency);
        }

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let wait = this.time_until_next_fire().await;
                tokio::select! {
                    _ = sleep(wait) => {
                        this.fire().await;
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            let mut status = this.status.lock().await;
            status.running = false;
        });
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().await.take() {
            let _ = tx.send(true);
        }
    }

    /// Runs one execution immediately, bypassing the timer (manual trigger).
    pub async fn trigger_now(&self) -> Result<(), CoreError> {
        self.fire().await;
        Ok(())
    }

    /// The next occurrence of exchange-local fire time `(h, m)` strictly
    /// after `now`, skipping weekends, scanning up to eight days ahead
    /// (enough to safely cross any single weekend).
    fn next_occurrence(now: DateTime<chrono_tz::Tz>, h: u32, m: u32) -> Option<DateTime<chrono_tz::Tz>> {
        for day_offset in 0..8i64 {
            let day = now.date_naive() + chrono::Duration::days(day_offset);
            if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            let t = NaiveTime::from_hms_opt(h, m, 0).expect("valid fire time");
            if let Some(dt) = Shanghai.from_local_datetime(&day.and_time(t)).single()
                && dt > now
            {
                return Some(dt);
            }
        }
        None
    }

    /// Computes the next run for every configured job (§4.7 `next_runs`),
    /// publishes the full list to `status`, and returns how long to sleep
    /// before the earliest of them.
    async fn time_until_next_fire(&self) -> Duration {
        let now = Utc::now().with_timezone(&Shanghai);
        let fire_times: Vec<(u32, u32)> = match self.frequency {
            Frequency::Daily => vec![DAILY_FIRE_TIME],
            Frequency::Hourly => hourly_fire_times().to_vec(),
        };

        let mut candidates: Vec<DateTime<chrono_tz::Tz>> =
            fire_times.iter().filter_map(|&(h, m)| Self::next_occurrence(now, h, m)).collect();
        candidates.sort();

        let next_runs: Vec<DateTime<Utc>> = candidates.iter().map(|dt| dt.with_timezone(&Utc)).collect();
        let earliest = candidates.first().copied().unwrap_or(now + chrono::Duration::hours(1));
        {
            let mut status = self.status.lock().await;
            status.next_runs = next_runs;
        }
        (earliest - now).to_std().unwrap_or(Duration::from_secs(1))
    }

    async fn fire(&self) {
        let now_shanghai = Utc::now().with_timezone(&Shanghai);
        let aligned = self.aligned_timestamp(now_shanghai);

        if let Err(e) = self.ingestor.ingest_index(&self.index, false).await {
            warn!(error = %e, "scheduled ingest failed, proceeding with existing store contents");
        }

        log_scheduled_execution(self.frequency, &aligned, self.agents.len());
        {
            let mut status = self.status.lock().await;
            status.last_execution = Some(Utc::now());
        }

        let kind = match self.frequency {
            Frequency::Daily => AgentKind::AStockDaily,
            Frequency::Hourly => AgentKind::AStockHourly,
        };

        let mut handles = Vec::new();
        for agent in self.agents.iter().filter(|a| a.enabled) {
            let signature = agent_signature(&agent.base_signature, kind, RunMode::Live);
            let orchestrator = self.orchestrator.clone();
            let registry = self.registry.clone();
            let config = agent.step_config.clone();
            let frequency = agent.frequency;
            handles.push(tokio::spawn(async move {
                let (run_id, run, _cancel) = registry.create(signature.clone(), frequency, RunMode::Live).await;
                if let Err(e) = orchestrator.run_live_session(&signature, aligned, &config, &run).await {
                    warn!(agent = %signature, run_id = %run_id, error = %e, "live session failed");
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }

    /// Snaps wall-clock to today's date (daily) or the nearest configured
    /// trading-hour slot (hourly), per §4.7 step (b).
    fn aligned_timestamp(&self, now: DateTime<chrono_tz::Tz>) -> Timestamp {
        match self.frequency {
            Frequency::Daily => Timestamp::Date(now.date_naive()),
            Frequency::Hourly => {
                let minutes_now = now.hour() * 60 + now.minute();
                let slot = ASTOCK_HOURLY_SLOTS
                    .iter()
                    .min_by_key(|(h, m)| (*h * 60 + *m).abs_diff(minutes_now))
                    .copied()
                    .unwrap_or(ASTOCK_HOURLY_SLOTS[0]);
                let t = NaiveTime::from_hms_opt(slot.0, slot.1, 0).expect("valid trading-hour slot");
                Timestamp::DateTime(now.date_naive().and_time(t))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_fire_times_are_five_minutes_after_each_slot() {
        let times = hourly_fire_times();
        assert_eq!(times, [(10, 35), (11, 35), (14, 5), (15, 5)]);
    }

    #[test]
    fn configured_jobs_matches_frequency_cardinality() {
        assert_eq!(configured_jobs(Frequency::Daily).len(), 1);
        assert_eq!(configured_jobs(Frequency::Hourly).len(), 4);
    }
}
