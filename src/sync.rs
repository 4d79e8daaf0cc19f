//! Sync Engine - Orchestrates parallel repository synchronization
//!
//! The engine prepares the mirror root, materializes the whole remote listing,
//! queues one task per repository and runs a fixed pool of workers over the
//! queue. An interrupt stops new work from being dispatched; subprocesses that
//! are already running are left to finish on their own.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::listing::{RemoteApi, RepositoryLister};
use crate::queue::{SyncTask, WorkQueue};
use crate::report::{Reporter, SyncSummary};
use crate::scm::{CloneUrls, CommandRunner};
use crate::shutdown::Shutdown;
use crate::worker::SyncWorker;

/// Number of workers to start
///
/// Anything that is not a positive integer silently falls back to the host's
/// available parallelism.
pub fn worker_count(requested: Option<&str>) -> usize {
    requested
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(default_worker_count)
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Create the mirror root if needed and return its absolute path
pub fn prepare_base_directory(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        info!("Created mirror directory {}", path.display());
    }

    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }

    path.canonicalize()
        .with_context(|| format!("Failed to resolve directory {}", path.display()))
}

/// The main sync engine that orchestrates repository synchronization
pub struct SyncEngine<A: ?Sized, R: ?Sized> {
    lister: RepositoryLister<A>,
    runner: Arc<R>,
    clone_urls: Arc<CloneUrls>,
    workers: usize,
}

impl<A, R> SyncEngine<A, R>
where
    A: RemoteApi + ?Sized,
    R: CommandRunner + ?Sized + 'static,
{
    pub fn new(
        lister: RepositoryLister<A>,
        runner: Arc<R>,
        clone_urls: CloneUrls,
        workers: usize,
    ) -> Self {
        Self {
            lister,
            runner,
            clone_urls: Arc::new(clone_urls),
            workers: workers.max(1),
        }
    }

    /// Run a complete sync, reporting to stdout
    pub async fn run(&self, base_directory: &Path, shutdown: &Shutdown) -> Result<SyncSummary> {
        self.run_with_output(base_directory, shutdown, std::io::stdout())
            .await
    }

    /// Run a complete sync, writing report lines to `out`
    ///
    /// Fails only for setup problems (unusable base directory, listing
    /// failure). Per-repository failures are part of the returned summary.
    pub async fn run_with_output<W: Write>(
        &self,
        base_directory: &Path,
        shutdown: &Shutdown,
        out: W,
    ) -> Result<SyncSummary> {
        let start_time = Instant::now();
        let base_directory = prepare_base_directory(base_directory)?;

        match self.lister.owner_filter() {
            Some(owner) => info!("Listing repositories of {}", owner),
            None => info!("Listing repositories of the authenticated account"),
        }

        let repositories = tokio::select! {
            listed = self.lister.collect() => listed.context("Failed to list repositories")?,
            _ = shutdown.requested() => {
                warn!("Interrupted while listing repositories, nothing was synchronised");
                return Ok(SyncSummary::cancelled_before_start(start_time.elapsed()));
            }
        };

        let total_repositories = repositories.len();
        let queue = Arc::new(WorkQueue::new());
        queue.extend(
            repositories
                .into_iter()
                .map(|repo| SyncTask::new(base_directory.clone(), repo)),
        );

        let workers = self.workers.min(total_repositories).max(1);
        info!(
            "Synchronising {} repositories into {} with {} workers",
            total_repositories,
            base_directory.display(),
            workers
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut pool = JoinSet::new();
        for id in 0..workers {
            let worker = SyncWorker::new(
                id,
                queue.clone(),
                self.runner.clone(),
                self.clone_urls.clone(),
                shutdown.clone(),
                events_tx.clone(),
            );
            pool.spawn(worker.run());
        }
        // Workers hold the only senders, so the channel closes when the last one exits.
        drop(events_tx);

        let mut reporter = Reporter::new(out);
        let mut abandoned = 0;

        let cancelled = loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => reporter.record(event),
                    None => break false,
                },
                _ = shutdown.requested() => {
                    abandoned = queue.close();
                    // Tasks that finished before the interrupt still get reported.
                    while let Ok(event) = events_rx.try_recv() {
                        reporter.record(event);
                    }
                    warn!(
                        "Interrupted: {} queued repositories abandoned, in-flight operations left running",
                        abandoned
                    );
                    pool.detach_all();
                    break true;
                }
            }
        };

        if !cancelled {
            while let Some(joined) = pool.join_next().await {
                match joined {
                    Ok(processed) => debug!("Worker finished after {} repositories", processed),
                    Err(e) => error!("Worker task failed: {}", e),
                }
            }
        }

        let summary = reporter.finish(
            total_repositories,
            abandoned,
            cancelled,
            start_time.elapsed(),
        );

        info!(
            "Sync completed in {:.2}s: {} cloned, {} updated, {} failed, {} abandoned",
            summary.duration.as_secs_f64(),
            summary.cloned,
            summary.updated,
            summary.failed,
            summary.abandoned
        );

        Ok(summary)
    }
}
