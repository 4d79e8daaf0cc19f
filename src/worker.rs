//! Per-repository synchronization
//!
//! Every task runs the same state machine:
//!
//! ```text
//! Start -> Validating -> Valid   -> Updated
//!                     -> Invalid -> Purging -> Cloning -> Cloned | CloneFailed
//! ```
//!
//! A mirror that fails validation is removed before re-cloning, so a partial
//! clone from an earlier run can never be mistaken for a valid mirror.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::queue::{SyncTask, WorkQueue};
use crate::report::{SyncEvent, TaskOutcome};
use crate::scm::{CloneUrls, CommandRunner, ScmAdapter};
use crate::shutdown::Shutdown;

/// Pulls tasks from the shared queue until it is empty or shutdown is requested
pub struct SyncWorker<R: ?Sized> {
    id: usize,
    queue: Arc<WorkQueue>,
    runner: Arc<R>,
    clone_urls: Arc<CloneUrls>,
    shutdown: Shutdown,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl<R: CommandRunner + ?Sized> SyncWorker<R> {
    pub fn new(
        id: usize,
        queue: Arc<WorkQueue>,
        runner: Arc<R>,
        clone_urls: Arc<CloneUrls>,
        shutdown: Shutdown,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            id,
            queue,
            runner,
            clone_urls,
            shutdown,
            events,
        }
    }

    /// Process tasks one at a time; returns how many this worker handled
    pub async fn run(self) -> usize {
        let mut processed = 0;

        while let Some(task) = self
            .queue
            .try_take_unless(|| self.shutdown.is_requested())
        {
            let outcome = sync_repository(self.runner.as_ref(), &self.clone_urls, &task).await;
            processed += 1;

            let event = SyncEvent {
                repository: task.repo().full_name.clone(),
                worker: self.id,
                outcome,
            };
            if self.events.send(event).is_err() {
                debug!(worker = self.id, "Reporter closed, result dropped");
            }
        }

        debug!(worker = self.id, processed, "Worker exiting");
        processed
    }
}

/// Bring the local mirror of one repository up to date
///
/// Never fails: every error is folded into the returned outcome.
pub async fn sync_repository<R>(runner: &R, urls: &CloneUrls, task: &SyncTask) -> TaskOutcome
where
    R: CommandRunner + ?Sized,
{
    let repo = task.repo();

    let adapter = match ScmAdapter::for_repository(task.base_directory(), repo, urls) {
        Ok(adapter) => adapter,
        Err(e) => return TaskOutcome::Failed(e),
    };

    match adapter.validate_local(runner).await {
        Ok(()) => {
            debug!("{} is valid, updating {}", repo.full_name, adapter.local_path().display());
            let update_error = adapter.update(runner).await.err();
            TaskOutcome::Updated { update_error }
        }
        Err(reason) => {
            debug!("{} needs a fresh clone: {}", repo.full_name, reason);
            match reclone(runner, &adapter).await {
                Ok(()) => TaskOutcome::Cloned,
                Err(e) => TaskOutcome::Failed(e),
            }
        }
    }
}

async fn reclone<R>(runner: &R, adapter: &ScmAdapter) -> Result<(), SyncError>
where
    R: CommandRunner + ?Sized,
{
    let path = adapter.local_path();
    purge(path).await?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| SyncError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    info!("Cloning {} -> {}", adapter.remote_url(), path.display());

    if let Err(e) = adapter.clone_mirror(runner).await {
        if let Err(cleanup) = purge(path).await {
            warn!("Failed to clean up after failed clone: {}", cleanup);
        }
        return Err(e);
    }

    Ok(())
}

/// Remove whatever occupies `path`; absent paths are fine
async fn purge(path: &Path) -> Result<(), SyncError> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(SyncError::Purge {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    info!("Removing invalid mirror at {}", path.display());

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    removed.map_err(|source| SyncError::Purge {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{RemoteDescriptor, RemoteScm};
    use crate::scm::{CommandOutput, ScmCommand};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Script = Box<dyn Fn(&ScmCommand) -> CommandOutput + Send + Sync>;

    /// Answers commands from a script and records every command line
    struct ScriptedRunner {
        script: Script,
        ran: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(script: impl Fn(&ScmCommand) -> CommandOutput + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                ran: Mutex::new(Vec::new()),
            }
        }

        fn succeeding() -> Self {
            Self::new(|_| ok())
        }

        fn ran(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &ScmCommand) -> std::io::Result<CommandOutput> {
            self.ran.lock().unwrap().push(command.to_string());
            Ok((self.script)(command))
        }
    }

    fn ok() -> CommandOutput {
        CommandOutput {
            success: true,
            output: String::new(),
        }
    }

    fn failed(output: &str) -> CommandOutput {
        CommandOutput {
            success: false,
            output: output.to_string(),
        }
    }

    fn is(command: &ScmCommand, verb: &str) -> bool {
        command.args().iter().any(|a| a == verb)
    }

    /// Path the last argument of a clone command points at
    fn clone_target(command: &ScmCommand) -> PathBuf {
        PathBuf::from(command.args().last().unwrap())
    }

    fn task(base: &Path, scm: RemoteScm) -> SyncTask {
        SyncTask::new(base, RemoteDescriptor::new(scm, "team", "api"))
    }

    #[tokio::test]
    async fn test_unsupported_scm_fails_without_commands() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::succeeding();

        let outcome = sync_repository(
            &runner,
            &CloneUrls::default(),
            &task(temp.path(), RemoteScm::Unsupported("svn".into())),
        )
        .await;

        assert_matches!(outcome, TaskOutcome::Failed(SyncError::UnsupportedScm { .. }));
        assert!(runner.ran().is_empty());
    }

    #[tokio::test]
    async fn test_absent_mirror_is_cloned() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::succeeding();

        let outcome =
            sync_repository(&runner, &CloneUrls::default(), &task(temp.path(), RemoteScm::Git))
                .await;

        assert_matches!(outcome, TaskOutcome::Cloned);
        let ran = runner.ran();
        assert_eq!(ran.len(), 1);
        assert!(ran[0].starts_with("git clone --mirror git@bitbucket.org:team/api.git"));
        assert!(temp.path().join("team").is_dir());
    }

    #[tokio::test]
    async fn test_valid_mirror_is_updated() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("team/api.hg")).unwrap();
        let runner = ScriptedRunner::succeeding();

        let outcome = sync_repository(
            &runner,
            &CloneUrls::default(),
            &task(temp.path(), RemoteScm::Mercurial),
        )
        .await;

        assert_matches!(outcome, TaskOutcome::Updated { update_error: None });
        let ran = runner.ran();
        assert_eq!(ran.len(), 2);
        assert!(ran[0].contains(" verify "));
        assert!(ran[1].contains(" pull "));
    }

    #[tokio::test]
    async fn test_update_failure_still_counts_as_synchronised() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("team/api.git")).unwrap();
        let runner = ScriptedRunner::new(|command| {
            if is(command, "fetch") {
                failed("fatal: Could not read from remote repository.")
            } else {
                ok()
            }
        });

        let outcome =
            sync_repository(&runner, &CloneUrls::default(), &task(temp.path(), RemoteScm::Git))
                .await;

        assert!(outcome.is_synchronised());
        assert_matches!(
            outcome,
            TaskOutcome::Updated { update_error: Some(SyncError::UpdateFailed { .. }) }
        );
        assert!(temp.path().join("team/api.git").is_dir());
    }

    #[tokio::test]
    async fn test_corrupt_mirror_is_purged_before_clone() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("team/api.git");
        std::fs::create_dir_all(mirror.join("objects")).unwrap();
        std::fs::write(mirror.join("HEAD"), "garbage").unwrap();

        let runner = ScriptedRunner::new(|command| {
            if is(command, "fsck") {
                return failed("error: object file is empty");
            }
            if is(command, "clone") {
                let target = clone_target(command);
                assert!(!target.exists(), "clone started before purge");
                assert!(target.parent().unwrap().is_dir());
                std::fs::create_dir_all(&target).unwrap();
            }
            ok()
        });

        let outcome =
            sync_repository(&runner, &CloneUrls::default(), &task(temp.path(), RemoteScm::Git))
                .await;

        assert_matches!(outcome, TaskOutcome::Cloned);
        assert!(!mirror.join("HEAD").exists());
        assert_eq!(runner.ran().len(), 2);
    }

    #[tokio::test]
    async fn test_stray_file_at_mirror_path_is_purged() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("team")).unwrap();
        std::fs::write(temp.path().join("team/api.git"), "not a repository").unwrap();

        let runner = ScriptedRunner::new(|command| {
            if is(command, "fsck") {
                failed("fatal: not a git repository")
            } else {
                ok()
            }
        });

        let outcome =
            sync_repository(&runner, &CloneUrls::default(), &task(temp.path(), RemoteScm::Git))
                .await;

        assert_matches!(outcome, TaskOutcome::Cloned);
        assert!(!temp.path().join("team/api.git").exists());
    }

    #[tokio::test]
    async fn test_clone_failure_reports_command_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|command| {
            if is(command, "clone") {
                std::fs::create_dir_all(clone_target(command)).unwrap();
                failed("git@bitbucket.org: Permission denied (publickey).")
            } else {
                ok()
            }
        });

        let outcome =
            sync_repository(&runner, &CloneUrls::default(), &task(temp.path(), RemoteScm::Git))
                .await;

        assert_matches!(outcome, TaskOutcome::Failed(SyncError::CloneFailed { ref command, ref output })
            if command.starts_with("git clone --mirror") && output.contains("publickey"));
        assert!(!temp.path().join("team/api.git").exists());
    }

    #[tokio::test]
    async fn test_worker_drains_queue_and_reports_each_task() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(WorkQueue::new());
        queue.put(task(temp.path(), RemoteScm::Git));
        queue.put(SyncTask::new(
            temp.path(),
            RemoteDescriptor::new(RemoteScm::Unsupported("svn".into()), "team", "old"),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = SyncWorker::new(
            3,
            queue.clone(),
            Arc::new(ScriptedRunner::succeeding()),
            Arc::new(CloneUrls::default()),
            Shutdown::new(),
            tx,
        );

        assert_eq!(worker.run().await, 2);
        assert!(queue.is_empty());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.repository, "team/api");
        assert_eq!(first.worker, 3);
        assert_matches!(first.outcome, TaskOutcome::Cloned);

        let second = rx.recv().await.unwrap();
        assert_matches!(second.outcome, TaskOutcome::Failed(SyncError::UnsupportedScm { .. }));

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_worker_takes_nothing_after_shutdown() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(WorkQueue::new());
        queue.put(task(temp.path(), RemoteScm::Git));

        let shutdown = Shutdown::new();
        shutdown.request();

        let (tx, _rx) = mpsc::unbounded_channel();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let worker = SyncWorker::new(
            0,
            queue.clone(),
            runner.clone(),
            Arc::new(CloneUrls::default()),
            shutdown,
            tx,
        );

        assert_eq!(worker.run().await, 0);
        assert_eq!(queue.len(), 1);
        assert!(runner.ran().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_task_stops_before_next_take() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(WorkQueue::new());
        for slug in ["one", "two", "three"] {
            queue.put(SyncTask::new(
                temp.path(),
                RemoteDescriptor::new(RemoteScm::Git, "team", slug),
            ));
        }

        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let runner = Arc::new(ScriptedRunner::new(move |_| {
            trigger.request();
            ok()
        }));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = SyncWorker::new(
            0,
            queue.clone(),
            runner.clone(),
            Arc::new(CloneUrls::default()),
            shutdown,
            tx,
        );

        assert_eq!(worker.run().await, 1);
        assert_eq!(runner.ran().len(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(rx.recv().await.unwrap().repository, "team/one");
    }
}
