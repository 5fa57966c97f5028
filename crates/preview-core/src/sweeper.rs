//! Cleanup Sweeper
//!
//! Runs the three reclamation passes on a fixed schedule. At most one sweep
//! executes at a time: a tick or manual trigger that finds a sweep in
//! progress is skipped, never queued behind it.
//!
//! Passes run sequentially. A failing pass (registry unavailable) is
//! recorded in the report and the next pass still runs; the next tick
//! retries everything.

use crate::error::PreviewError;
use crate::orchestrator::{PreviewOrchestrator, ReclaimOutcome};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Outcome of one reclamation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassReport {
    /// Pass ran to completion
    Completed {
        /// Sessions reclaimed
        reclaimed: usize,
        /// Schema drops that failed
        drop_failures: usize,
    },
    /// Pass aborted by a registry error
    Aborted {
        /// Error text
        error: String,
    },
}

impl PassReport {
    fn from_reclaim(result: Result<ReclaimOutcome, PreviewError>) -> Self {
        match result {
            Ok(outcome) => Self::Completed {
                reclaimed: outcome.reclaimed,
                drop_failures: outcome.drops.failed.len(),
            },
            Err(error) => Self::Aborted {
                error: error.to_string(),
            },
        }
    }

    fn from_count(result: Result<usize, PreviewError>) -> Self {
        match result {
            Ok(reclaimed) => Self::Completed {
                reclaimed,
                drop_failures: 0,
            },
            Err(error) => Self::Aborted {
                error: error.to_string(),
            },
        }
    }

    /// Sessions reclaimed, zero if aborted
    #[inline]
    #[must_use]
    pub fn reclaimed(&self) -> usize {
        match self {
            Self::Completed { reclaimed, .. } => *reclaimed,
            Self::Aborted { .. } => 0,
        }
    }

    /// Whether the pass aborted
    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// When the sweep started
    pub started_at: DateTime<Utc>,
    /// How long the sweep took
    pub elapsed: Duration,
    /// Hard-TTL pass
    pub expired: PassReport,
    /// Idle pass
    pub idle: PassReport,
    /// Stuck-provisioning pass
    pub stuck: PassReport,
}

impl SweepReport {
    /// Sessions reclaimed across all passes
    #[must_use]
    pub fn total_reclaimed(&self) -> usize {
        self.expired.reclaimed() + self.idle.reclaimed() + self.stuck.reclaimed()
    }

    /// Whether every pass completed with no drop failure
    #[must_use]
    pub fn is_clean(&self) -> bool {
        [&self.expired, &self.idle, &self.stuck].iter().all(|p| {
            matches!(
                p,
                PassReport::Completed {
                    drop_failures: 0,
                    ..
                }
            )
        })
    }
}

/// Single-flight recurring sweeper
#[derive(Debug)]
pub struct CleanupSweeper {
    orchestrator: PreviewOrchestrator,
    interval: Duration,
    in_flight: Mutex<()>,
}

impl CleanupSweeper {
    /// Create sweeper on the orchestrator's configured interval
    #[must_use]
    pub fn new(orchestrator: PreviewOrchestrator) -> Self {
        let interval = orchestrator.config().sweep_interval();
        Self {
            orchestrator,
            interval,
            in_flight: Mutex::new(()),
        }
    }

    /// With interval
    #[inline]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sweep interval
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep unless another is in progress
    ///
    /// # Errors
    /// `PreviewError::SweepInProgress` if a sweep already holds the guard
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, PreviewError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("sweep already in progress; skipping");
            return Err(PreviewError::SweepInProgress);
        };

        let started_at = Utc::now();
        let timer = std::time::Instant::now();

        let expired = PassReport::from_reclaim(self.orchestrator.reclaim_expired().await);
        let idle = PassReport::from_reclaim(self.orchestrator.reclaim_idle().await);
        let stuck = PassReport::from_count(self.orchestrator.fail_stuck_provisioning().await);

        let report = SweepReport {
            started_at,
            elapsed: timer.elapsed(),
            expired,
            idle,
            stuck,
        };

        for (pass, outcome) in [
            ("expired", &report.expired),
            ("idle", &report.idle),
            ("stuck", &report.stuck),
        ] {
            if let PassReport::Aborted { error } = outcome {
                warn!(pass, error = %error, "sweep pass aborted; next tick retries");
            }
        }
        info!(
            reclaimed = report.total_reclaimed(),
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            clean = report.is_clean(),
            "sweep finished"
        );
        Ok(report)
    }

    /// Sweep on every tick until `shutdown` flips to `true` or its sender
    /// is dropped
    ///
    /// The first tick fires immediately. Ticks missed while a sweep runs
    /// are skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "cleanup sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep().await {
                        debug!(error = %error, "tick skipped");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("cleanup sweeper stopped");
    }
}
