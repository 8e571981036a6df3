use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// What the indexer is doing right now, as reported to observers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Counting,
    Synchronizing,
    Cleaning,
    Optimizing,
    Analyzing,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "Idle",
            RunState::Counting => "Counting files",
            RunState::Synchronizing => "Synchronizing",
            RunState::Cleaning => "Cleaning up",
            RunState::Optimizing => "Optimizing",
            RunState::Analyzing => "Analyzing",
        };
        f.write_str(name)
    }
}

/// The steps of a pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Counting,
    SyncDirectories,
    SyncDelete,
    DrainQueue,
    Cleanup,
    Optimize,
    Analyze,
}

impl Phase {
    const COUNT: f64 = 7.0;

    fn ordinal(self) -> f64 {
        match self {
            Phase::Counting => 0.0,
            Phase::SyncDirectories => 1.0,
            Phase::SyncDelete => 2.0,
            Phase::DrainQueue => 3.0,
            Phase::Cleanup => 4.0,
            Phase::Optimize => 5.0,
            Phase::Analyze => 6.0,
        }
    }

    pub fn run_state(self) -> RunState {
        match self {
            Phase::Counting => RunState::Counting,
            Phase::SyncDirectories | Phase::SyncDelete | Phase::DrainQueue => {
                RunState::Synchronizing
            }
            Phase::Cleanup => RunState::Cleaning,
            Phase::Optimize => RunState::Optimizing,
            Phase::Analyze => RunState::Analyzing,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub files_discovered: u64,
    /// Files offered to a metadata reader during this pass.
    pub files_indexed: u64,
    /// Files whose track record was written during this pass.
    pub files_saved: u64,
    /// Fraction of the whole pass, 0.0 to 1.0.
    pub overall: f64,
    /// Fraction of the current phase, 0.0 to 1.0.
    pub current: f64,
}

/// Why a pass has to stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Restart,
    Stop,
}

/// Why an idle worker woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Restart,
    Stop,
    Interval,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Restarted,
    Stopped,
    /// The catalog connection became unusable. The message is kept for status reporting.
    Failed(String),
}

/// Everything observers may read, as one copy taken under the lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub state: RunState,
    pub progress: Progress,
    pub restart_pending: bool,
    pub last_error: Option<String>,
    pub last_completed: Option<DateTime<Utc>>,
}

impl fmt::Display for IndexerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.progress;
        match self.state {
            RunState::Idle => {
                write!(f, "Idle")?;
                if let Some(at) = self.last_completed {
                    write!(f, ", last synchronized {}", at.format("%Y-%m-%d %H:%M:%S"))?;
                }
            }
            RunState::Counting => write!(f, "Counting files: {}", p.files_discovered)?,
            state => write!(
                f,
                "{}: {}/{} files indexed, {} saved ({:.0}%)",
                state,
                p.files_indexed,
                p.files_discovered,
                p.files_saved,
                p.overall * 100.0
            )?,
        }

        if let Some(error) = &self.last_error {
            write!(f, " [error: {}]", error)?;
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct SyncState {
    run_state: RunState,
    phase: Option<Phase>,
    progress: Progress,
    restart: bool,
    stop: bool,
    restarted: bool,
    last_error: Option<String>,
    last_completed: Option<DateTime<Utc>>,
}

/// Run state, progress and cooperative signals shared between the worker and the foreground.
///
/// All of it sits behind one mutex; every method takes the lock once, so observers never see
/// a half-applied update.
#[derive(Debug, Default)]
pub struct SyncControl {
    state: Mutex<SyncState>,
    wake: Notify,
}

impl SyncControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        // counters stay meaningful even if an observer panicked while holding the lock
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> IndexerStatus {
        let state = self.lock();
        IndexerStatus {
            state: state.run_state,
            progress: state.progress,
            restart_pending: state.restart,
            last_error: state.last_error.clone(),
            last_completed: state.last_completed,
        }
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress
    }

    pub fn request_restart(&self, restart: bool) {
        self.lock().restart = restart;
        if restart {
            self.wake.notify_one();
        }
    }

    pub fn request_stop(&self) {
        self.lock().stop = true;
        self.wake.notify_one();
    }

    /// Returns whether a pass was cut short by a restart since the last call, clearing the flag.
    pub fn take_restarted(&self) -> bool {
        std::mem::take(&mut self.lock().restarted)
    }

    /// Polled by the worker at unit boundaries.
    pub fn check(&self) -> Result<(), Interrupt> {
        let state = self.lock();
        if state.stop {
            Err(Interrupt::Stop)
        } else if state.restart {
            Err(Interrupt::Restart)
        } else {
            Ok(())
        }
    }

    pub(crate) fn begin_pass(&self) {
        let mut state = self.lock();
        state.restart = false;
        state.last_error = None;
        state.progress = Progress::default();
        state.phase = None;
        state.run_state = RunState::Idle;
    }

    pub(crate) fn enter_phase(&self, phase: Phase) -> Result<(), Interrupt> {
        let mut state = self.lock();
        if state.stop {
            return Err(Interrupt::Stop);
        }
        if state.restart {
            return Err(Interrupt::Restart);
        }

        state.phase = Some(phase);
        state.run_state = phase.run_state();
        state.progress.current = 0.0;
        state.progress.overall = phase.ordinal() / Phase::COUNT;
        Ok(())
    }

    pub(crate) fn end_pass(&self, outcome: &PassOutcome) {
        let mut state = self.lock();
        state.run_state = RunState::Idle;
        state.phase = None;
        match outcome {
            PassOutcome::Completed => {
                state.progress.current = 1.0;
                state.progress.overall = 1.0;
                state.last_completed = Some(Utc::now());
            }
            PassOutcome::Restarted => state.restarted = true,
            PassOutcome::Stopped => {}
            PassOutcome::Failed(message) => state.last_error = Some(message.clone()),
        }
    }

    pub(crate) fn set_discovered(&self, files: u64) {
        let mut state = self.lock();
        state.progress.files_discovered = files.max(state.progress.files_indexed);
    }

    /// Count one file offered to a reader, and whether its record was written.
    pub(crate) fn record_indexed(&self, saved: bool) {
        let mut state = self.lock();
        let progress = &mut state.progress;
        progress.files_indexed += 1;
        if saved {
            progress.files_saved += 1;
        }
        // files can appear between counting and indexing
        progress.files_discovered = progress.files_discovered.max(progress.files_indexed);
    }

    pub(crate) fn set_phase_progress(&self, done: u64, total: u64) {
        let mut state = self.lock();
        let current = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        state.progress.current = current;
        if let Some(phase) = state.phase {
            state.progress.overall = (phase.ordinal() + current) / Phase::COUNT;
        }
    }

    /// Block the idle worker until a restart or stop is requested, or `interval` elapses.
    pub(crate) async fn idle(&self, interval: Option<Duration>) -> Wake {
        loop {
            {
                let state = self.lock();
                if state.stop {
                    return Wake::Stop;
                }
                if state.restart {
                    return Wake::Restart;
                }
            }

            match interval {
                Some(interval) => {
                    if tokio::time::timeout(interval, self.wake.notified())
                        .await
                        .is_err()
                    {
                        return Wake::Interval;
                    }
                }
                None => self.wake.notified().await,
            }
        }
    }
}
