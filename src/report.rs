//! Outcome reporting
//!
//! Workers never print. They send a [`SyncEvent`] per task over a channel and a
//! single [`Reporter`] turns those into output lines and a [`SyncSummary`].

use std::io::Write;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::SyncError;

/// Terminal state of one task
#[derive(Debug)]
pub enum TaskOutcome {
    /// No valid mirror existed; a fresh clone succeeded
    Cloned,
    /// A valid mirror was refreshed; a failed refresh leaves the old mirror usable
    Updated { update_error: Option<SyncError> },
    /// The repository is absent from this run's synchronised set
    Failed(SyncError),
}

impl TaskOutcome {
    pub fn is_synchronised(&self) -> bool {
        !matches!(self, TaskOutcome::Failed(_))
    }
}

/// What a worker reports after finishing one task
#[derive(Debug)]
pub struct SyncEvent {
    /// `owner/slug`
    pub repository: String,
    pub worker: usize,
    pub outcome: TaskOutcome,
}

/// Results from a complete sync run
#[derive(Debug)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub cloned: usize,
    pub updated: usize,
    pub failed: usize,
    /// Queued tasks discarded by an interrupt before any worker started them
    pub abandoned: usize,
    pub cancelled: bool,
    pub duration: Duration,
    pub results: Vec<SyncEvent>,
}

impl SyncSummary {
    pub fn synchronised(&self) -> usize {
        self.cloned + self.updated
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncEvent> {
        self.results.iter().filter(|e| !e.outcome.is_synchronised())
    }

    /// Summary of a run that stopped before any task was queued
    pub fn cancelled_before_start(duration: Duration) -> Self {
        Self {
            total_repositories: 0,
            cloned: 0,
            updated: 0,
            failed: 0,
            abandoned: 0,
            cancelled: true,
            duration,
            results: Vec::new(),
        }
    }
}

/// Single consumer of worker events
pub struct Reporter<W> {
    out: W,
    cloned: usize,
    updated: usize,
    failed: usize,
    results: Vec<SyncEvent>,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            cloned: 0,
            updated: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, event: SyncEvent) {
        match &event.outcome {
            TaskOutcome::Cloned => {
                self.cloned += 1;
                self.line(format_args!("{} synchronised", event.repository));
            }
            TaskOutcome::Updated { update_error } => {
                self.updated += 1;
                if let Some(e) = update_error {
                    warn!("{}: update failed, keeping existing mirror: {}", event.repository, e);
                }
                self.line(format_args!("{} synchronised", event.repository));
            }
            TaskOutcome::Failed(e) => {
                self.failed += 1;
                error!("{}: {}", event.repository, e);
                self.line(format_args!("{} failed: {}", event.repository, e));
            }
        }

        self.results.push(event);
    }

    pub fn finish(
        self,
        total_repositories: usize,
        abandoned: usize,
        cancelled: bool,
        duration: Duration,
    ) -> SyncSummary {
        SyncSummary {
            total_repositories,
            cloned: self.cloned,
            updated: self.updated,
            failed: self.failed,
            abandoned,
            cancelled,
            duration,
            results: self.results,
        }
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{}", args) {
            debug!("Failed to write report line: {}", e);
        }
    }
}
