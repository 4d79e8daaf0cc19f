//! Source control backends
//!
//! Each backend exposes the same three operations against a local mirror:
//! validate, clone and update. [`Scm`] is a closed set of backends; [`ScmAdapter`]
//! binds one of them to the local path and remote URL of a single repository.
//! Subprocesses go through [`CommandRunner`] so the sync state machine can be
//! driven without `git` or `hg` installed.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::error::SyncError;
use crate::listing::{RemoteDescriptor, RemoteScm};

pub const DEFAULT_GIT_URL: &str = "git@bitbucket.org:{owner}/{slug}.git";
pub const DEFAULT_HG_URL: &str = "ssh://hg@bitbucket.org/{owner}/{slug}";

/// Clone URL templates; `{owner}` and `{slug}` are substituted per repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneUrls {
    pub git: String,
    pub mercurial: String,
}

impl Default for CloneUrls {
    fn default() -> Self {
        Self {
            git: DEFAULT_GIT_URL.to_string(),
            mercurial: DEFAULT_HG_URL.to_string(),
        }
    }
}

impl CloneUrls {
    fn render(template: &str, repo: &RemoteDescriptor) -> String {
        template
            .replace("{owner}", &repo.owner)
            .replace("{slug}", &repo.slug)
    }
}

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scm {
    Git,
    Mercurial,
}

impl Scm {
    /// Pick the backend for a listed repository
    pub fn select(repo: &RemoteDescriptor) -> Result<Self, SyncError> {
        match &repo.scm {
            RemoteScm::Git => Ok(Scm::Git),
            RemoteScm::Mercurial => Ok(Scm::Mercurial),
            RemoteScm::Unsupported(tag) => Err(SyncError::UnsupportedScm {
                repository: repo.full_name.clone(),
                scm: tag.clone(),
            }),
        }
    }

    pub fn program(self) -> &'static str {
        match self {
            Scm::Git => "git",
            Scm::Mercurial => "hg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Scm::Git => "git",
            Scm::Mercurial => "hg",
        }
    }

    /// `base/owner/slug.git` or `base/owner/slug.hg`
    pub fn local_path(self, base_directory: &Path, repo: &RemoteDescriptor) -> PathBuf {
        base_directory
            .join(&repo.owner)
            .join(format!("{}.{}", repo.slug, self.extension()))
    }

    pub fn remote_url(self, urls: &CloneUrls, repo: &RemoteDescriptor) -> String {
        match self {
            Scm::Git => CloneUrls::render(&urls.git, repo),
            Scm::Mercurial => CloneUrls::render(&urls.mercurial, repo),
        }
    }

    fn validate_command(self, path: &Path) -> ScmCommand {
        match self {
            Scm::Git => ScmCommand::new(self.program())
                .arg("--git-dir")
                .arg(path)
                .arg("fsck")
                .arg("--connectivity-only")
                .arg("--no-progress"),
            Scm::Mercurial => ScmCommand::new(self.program())
                .arg("--repository")
                .arg(path)
                .arg("verify")
                .arg("--quiet"),
        }
    }

    fn clone_command(self, url: &str, path: &Path) -> ScmCommand {
        match self {
            Scm::Git => ScmCommand::new(self.program())
                .arg("clone")
                .arg("--mirror")
                .arg(url)
                .arg(path),
            Scm::Mercurial => ScmCommand::new(self.program())
                .arg("clone")
                .arg("--noupdate")
                .arg(url)
                .arg(path),
        }
    }

    fn update_command(self, path: &Path) -> ScmCommand {
        match self {
            Scm::Git => ScmCommand::new(self.program())
                .arg("--git-dir")
                .arg(path)
                .arg("fetch")
                .arg("--quiet"),
            Scm::Mercurial => ScmCommand::new(self.program())
                .arg("--repository")
                .arg(path)
                .arg("pull")
                .arg("--quiet"),
        }
    }
}

/// A subprocess invocation, kept as data so it can be logged and reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmCommand {
    program: &'static str,
    args: Vec<OsString>,
}

impl ScmCommand {
    pub fn new(program: &'static str) -> Self {
        Self {
            program,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn program(&self) -> &'static str {
        self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for ScmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Exit status and combined stdout/stderr of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

/// Runs backend subprocesses to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`; `Err` only when the process could not be started
    async fn run(&self, command: &ScmCommand) -> std::io::Result<CommandOutput>;
}

/// Runs commands as real child processes
///
/// Children are not killed when the awaiting task is dropped, so an interrupted
/// run leaves in-flight clones and fetches to finish on their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ScmCommand) -> std::io::Result<CommandOutput> {
        debug!("Running: {}", command);

        let output = AsyncCommand::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            output: combined,
        })
    }
}

/// One backend bound to one repository's local path and remote URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmAdapter {
    scm: Scm,
    local_path: PathBuf,
    remote_url: String,
}

impl ScmAdapter {
    /// Select the backend for `repo`, failing with `UnsupportedScm` for unknown tags
    pub fn for_repository(
        base_directory: &Path,
        repo: &RemoteDescriptor,
        urls: &CloneUrls,
    ) -> Result<Self, SyncError> {
        let scm = Scm::select(repo)?;

        Ok(Self {
            scm,
            local_path: scm.local_path(base_directory, repo),
            remote_url: scm.remote_url(urls, repo),
        })
    }

    pub fn scm(&self) -> Scm {
        self.scm
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// Check that the local path holds a well-formed repository
    pub async fn validate_local<R>(&self, runner: &R) -> Result<(), SyncError>
    where
        R: CommandRunner + ?Sized,
    {
        if tokio::fs::symlink_metadata(&self.local_path).await.is_err() {
            return Err(SyncError::ValidationFailed {
                path: self.local_path.clone(),
                output: "path does not exist".to_string(),
            });
        }

        let command = self.scm.validate_command(&self.local_path);
        let output = match runner.run(&command).await {
            Ok(out) if out.success => return Ok(()),
            Ok(out) => out.output,
            Err(e) => format!("failed to run `{}`: {}", command, e),
        };

        Err(SyncError::ValidationFailed {
            path: self.local_path.clone(),
            output,
        })
    }

    /// Full mirror clone of the remote into the local path
    pub async fn clone_mirror<R>(&self, runner: &R) -> Result<(), SyncError>
    where
        R: CommandRunner + ?Sized,
    {
        let command = self.scm.clone_command(&self.remote_url, &self.local_path);
        run_checked(runner, &command)
            .await
            .map_err(|output| SyncError::CloneFailed {
                command: command.to_string(),
                output,
            })
    }

    /// Refresh an existing, valid mirror in place
    pub async fn update<R>(&self, runner: &R) -> Result<(), SyncError>
    where
        R: CommandRunner + ?Sized,
    {
        let command = self.scm.update_command(&self.local_path);
        run_checked(runner, &command)
            .await
            .map_err(|output| SyncError::UpdateFailed {
                command: command.to_string(),
                output,
            })
    }
}

/// Run a command, returning its captured output as the error on failure
async fn run_checked<R>(runner: &R, command: &ScmCommand) -> Result<(), String>
where
    R: CommandRunner + ?Sized,
{
    match runner.run(command).await {
        Ok(out) if out.success => Ok(()),
        Ok(out) => Err(out.output),
        Err(e) => Err(format!("failed to run `{}`: {}", command, e)),
    }
}
