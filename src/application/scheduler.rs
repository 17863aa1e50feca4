//! Fixed-period scheduler with overlap skip and crash-safe resume.
//!
//! Tick alignment is `service_start_time + k·period`. At most one cycle runs
//! at a time: a tick that fires while a cycle is still in flight is dropped
//! with a warning, never queued — a hung LLM call must not pile cycles up.
//! On shutdown the in-flight cycle gets a bounded grace period to finalize.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::application::cycle::CycleRunner;
use crate::domain::repositories::BotStateRepository;
use crate::domain::types::BotState;
use crate::infrastructure::observability::Metrics;

pub struct Scheduler {
    runner: Arc<CycleRunner>,
    bot_state: Arc<dyn BotStateRepository>,
    metrics: Metrics,
    period: Duration,
    shutdown_timeout: Duration,
    running: Arc<AtomicBool>,
    cycle_count: Arc<AtomicI64>,
}

impl Scheduler {
    pub fn new(
        runner: Arc<CycleRunner>,
        bot_state: Arc<dyn BotStateRepository>,
        metrics: Metrics,
        period: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            bot_state,
            metrics,
            period,
            shutdown_timeout,
            running: Arc::new(AtomicBool::new(false)),
            cycle_count: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Cycles completed so far, resumed count included. Read-only.
    pub fn cycle_count(&self) -> i64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    /// Run until `shutdown` flips to true. The first cycle fires
    /// immediately; later ticks at period boundaries.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let now = Utc::now();
        let state = match self
            .bot_state
            .load()
            .await
            .context("Failed to load bot state")?
        {
            Some(previous) => {
                info!(
                    "Scheduler: resuming at cycle {} (previous run started {})",
                    previous.cycle_count, previous.service_start_time
                );
                BotState {
                    service_start_time: now,
                    ..previous
                }
            }
            None => {
                info!("Scheduler: fresh start");
                BotState::fresh(now)
            }
        };
        self.bot_state
            .save(&state)
            .await
            .context("Failed to persist startup bot state")?;
        self.cycle_count.store(state.cycle_count, Ordering::SeqCst);

        let service_start = state.service_start_time;
        let shared_state = Arc::new(Mutex::new(state));

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    if self.running.swap(true, Ordering::SeqCst) {
                        warn!("Scheduler: tick skipped — previous cycle still running");
                        self.metrics.ticks_skipped_total.inc();
                        continue;
                    }
                    self.spawn_cycle(Arc::clone(&shared_state), service_start);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler: stop requested, draining in-flight cycle");
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        while self.running.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Scheduler: shutdown timeout ({}s) exceeded with a cycle in flight",
                    self.shutdown_timeout.as_secs()
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let final_state = shared_state.lock().await.clone();
        self.bot_state
            .save(&final_state)
            .await
            .context("Failed to persist final bot state")?;
        info!(
            "Scheduler: stopped after {} cycles",
            final_state.cycle_count
        );
        Ok(())
    }

    fn spawn_cycle(&self, shared_state: Arc<Mutex<BotState>>, service_start: chrono::DateTime<Utc>) {
        let runner = Arc::clone(&self.runner);
        let bot_state = Arc::clone(&self.bot_state);
        let metrics = self.metrics.clone();
        let running = Arc::clone(&self.running);
        let cycle_counter = Arc::clone(&self.cycle_count);

        tokio::spawn(async move {
            let cycle_id = { shared_state.lock().await.cycle_count + 1 };
            let outcome = runner.run_cycle(cycle_id, service_start).await;

            metrics
                .cycles_total
                .with_label_values(&[&outcome.status.to_string()])
                .inc();

            {
                let mut state = shared_state.lock().await;
                state.cycle_count = cycle_id;
                state.last_cycle_at = Some(Utc::now());
                state.last_cycle_status = Some(outcome.status);
                state.last_error = outcome.error;
                if let Err(e) = bot_state.save(&state).await {
                    error!("Scheduler: failed to persist bot state after cycle {}: {}", cycle_id, e);
                }
            }
            cycle_counter.store(cycle_id, Ordering::SeqCst);
            running.store(false, Ordering::SeqCst);
        });
    }
}
