//! Periodic driver for the engine: pipeline, realizer, then sweeper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use ts_rs::TS;

use crate::config::{PipelineMode, SchedulerConfig};
use crate::engine::{ActionEngine, EngineError, RealizeRequest, RunRequest};

pub const MIN_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("interval must be at least 10 seconds, got {0}")]
    IntervalTooShort(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SchedulerStatus {
    pub paused: bool,
    #[ts(type = "number")]
    pub interval_secs: u64,
    pub mode: PipelineMode,
    pub running: bool,
    #[ts(type = "number")]
    pub runs_completed: u64,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct SchedulerState {
    paused: bool,
    interval: Duration,
    mode: PipelineMode,
    run_requested: bool,
    runs_completed: u64,
    last_run_started_at: Option<DateTime<Utc>>,
    last_run_finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    running: AtomicBool,
    wake: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status(&self) -> SchedulerStatus {
        let state = self.state();
        SchedulerStatus {
            paused: state.paused,
            interval_secs: state.interval.as_secs(),
            mode: state.mode,
            running: self.running.load(Ordering::SeqCst),
            runs_completed: state.runs_completed,
            last_run_started_at: state.last_run_started_at,
            last_run_finished_at: state.last_run_finished_at,
            last_error: state.last_error.clone(),
        }
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Starts the scheduler loop. Cancelling `shutdown` stops the loop and
    /// every batch it has in flight.
    pub fn spawn(
        engine: ActionEngine,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> SchedulerHandle {
        let requested = Duration::from_secs(config.interval_secs);
        if requested < MIN_INTERVAL {
            warn!(
                interval_secs = config.interval_secs,
                "scheduler interval below minimum; using {}s",
                MIN_INTERVAL.as_secs()
            );
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                paused: config.paused,
                interval: requested.max(MIN_INTERVAL),
                mode: config.mode,
                run_requested: false,
                runs_completed: 0,
                last_run_started_at: None,
                last_run_finished_at: None,
                last_error: None,
            }),
            running: AtomicBool::new(false),
            wake: Notify::new(),
        });

        info!(
            interval_secs = shared.status().interval_secs,
            mode = config.mode.as_str(),
            paused = config.paused,
            "starting scheduler"
        );
        let task = tokio::spawn(run_loop(engine, shared.clone(), shutdown.clone()));

        SchedulerHandle {
            shared,
            shutdown,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
        }
    }
}

#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    pub fn status(&self) -> SchedulerStatus {
        self.shared.status()
    }

    pub fn pause(&self) -> SchedulerStatus {
        self.shared.state().paused = true;
        info!("scheduler paused");
        self.status()
    }

    pub fn resume(&self) -> SchedulerStatus {
        self.shared.state().paused = false;
        info!("scheduler resumed");
        self.status()
    }

    /// Changes the tick interval. The new interval starts counting now.
    pub fn set_interval(&self, interval: Duration) -> Result<SchedulerStatus, SchedulerError> {
        if interval < MIN_INTERVAL {
            return Err(SchedulerError::IntervalTooShort(interval.as_secs()));
        }
        self.shared.state().interval = interval;
        self.shared.wake.notify_one();
        info!(interval_secs = interval.as_secs(), "scheduler interval changed");
        Ok(self.status())
    }

    /// Asks for a tick right away, even while paused. Returns false when a
    /// tick is already in flight; no second one is queued.
    pub fn run_now(&self) -> bool {
        if self.shutdown.is_cancelled() || self.shared.running.load(Ordering::SeqCst) {
            return false;
        }
        self.shared.state().run_requested = true;
        self.shared.wake.notify_one();
        true
    }

    /// Cancels in-flight work and waits for the loop to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(err) = task.await {
                error!(error = %err, "scheduler task ended abnormally");
            }
        }
    }
}

async fn run_loop(engine: ActionEngine, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let interval = shared.state().interval;
        let woken = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = shared.wake.notified() => true,
            _ = sleep(interval) => false,
        };

        let (requested, paused) = {
            let mut state = shared.state();
            let requested = std::mem::take(&mut state.run_requested);
            (requested, state.paused)
        };
        if woken && !requested {
            // Reconfigured; wait out the new interval.
            continue;
        }
        if paused && !requested {
            debug!("scheduler paused; skipping tick");
            continue;
        }

        run_tick(&engine, &shared, &shutdown).await;
    }
    info!("scheduler stopped");
}

async fn run_tick(engine: &ActionEngine, shared: &Shared, shutdown: &CancellationToken) {
    if shared.running.swap(true, Ordering::SeqCst) {
        debug!("previous tick still running; skipping");
        return;
    }
    let mode = {
        let mut state = shared.state();
        state.last_run_started_at = Some(Utc::now());
        state.mode
    };

    let cancel = shutdown.child_token();
    let result = tick(engine, mode, &cancel)
        .instrument(info_span!("scheduler_tick", mode = mode.as_str()))
        .await;

    let mut state = shared.state();
    state.last_run_finished_at = Some(Utc::now());
    state.runs_completed += 1;
    state.last_error = match result {
        Ok(()) => None,
        Err(err) => {
            error!(error = %err, "scheduler tick failed");
            Some(err.to_string())
        }
    };
    drop(state);
    shared.running.store(false, Ordering::SeqCst);
}

async fn tick(
    engine: &ActionEngine,
    mode: PipelineMode,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    match mode {
        PipelineMode::DryRun => {
            engine.process_dry_run(RunRequest::default(), cancel).await?;
        }
        PipelineMode::Execute => {
            engine.process_execute(RunRequest::default(), cancel).await?;
        }
    }
    if cancel.is_cancelled() {
        return Ok(());
    }
    engine
        .execute_approved(RealizeRequest::default(), cancel)
        .await?;
    engine.cleanup_expired_proposals().await?;
    Ok(())
}
