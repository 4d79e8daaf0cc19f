//! bitbucket-sync - Mirror Bitbucket repositories into a local directory tree
//!
//! Lists every repository an account can see (optionally restricted to one
//! owner) and keeps a bare mirror of each one under
//! `<directory>/<owner>/<slug>.git` or `<directory>/<owner>/<slug>.hg`.
//! Re-running updates valid mirrors in place and replaces broken ones.
//!
//! ## Modules
//!
//! - [`listing`]: Paginated repository listing over the [`RemoteApi`] seam
//! - [`bitbucket`]: OAuth client credentials and the HTTP [`RemoteApi`]
//! - [`scm`]: git/mercurial command construction and execution
//! - [`queue`], [`worker`], [`sync`]: the worker pool and per-repository state machine
//! - [`report`]: outcome lines and the run summary
//! - [`shutdown`]: cooperative Ctrl+C handling
//! - [`config`]: YAML configuration

pub mod bitbucket;
pub mod config;
pub mod error;
pub mod listing;
pub mod queue;
pub mod report;
pub mod scm;
pub mod shutdown;
pub mod sync;
pub mod worker;

pub use bitbucket::{BitbucketClient, Credentials};
pub use config::Config;
pub use error::{ListingError, SyncError};
pub use listing::{RemoteApi, RemoteDescriptor, RemoteScm, RepositoryLister};
pub use report::{SyncSummary, TaskOutcome};
pub use scm::{CloneUrls, CommandRunner, ProcessRunner, Scm};
pub use shutdown::Shutdown;
pub use sync::SyncEngine;
