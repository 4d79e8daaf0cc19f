use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::scm::{CloneUrls, DEFAULT_GIT_URL, DEFAULT_HG_URL};

/// Main configuration structure for bitbucket-sync
///
/// Every section is optional; command-line flags take precedence over
/// anything set here.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Bitbucket API endpoints and credentials
    #[serde(default)]
    pub bitbucket: BitbucketConfig,

    /// Local mirror settings
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bitbucket configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BitbucketConfig {
    /// REST API root
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// OAuth token endpoint (client credentials grant)
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// OAuth consumer key
    pub key: Option<String>,

    /// OAuth consumer secret
    pub secret: Option<String>,

    /// Only mirror repositories of this account or workspace
    pub owner: Option<String>,
}

/// Mirror configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MirrorConfig {
    /// Root directory for mirrors
    pub directory: Option<String>,

    /// Worker count (defaults to available parallelism)
    pub processes: Option<usize>,

    /// Clone URL template for git repositories
    #[serde(default = "default_git_url")]
    pub git_url: String,

    /// Clone URL template for mercurial repositories
    #[serde(default = "default_hg_url")]
    pub hg_url: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
}

// Default value functions
fn default_api_url() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}
fn default_token_url() -> String {
    "https://bitbucket.org/site/oauth2/access_token".to_string()
}
fn default_git_url() -> String {
    DEFAULT_GIT_URL.to_string()
}
fn default_hg_url() -> String {
    DEFAULT_HG_URL.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for BitbucketConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_url: default_token_url(),
            key: None,
            secret: None,
            owner: None,
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            directory: None,
            processes: None,
            git_url: default_git_url(),
            hg_url: default_hg_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load the configuration at `path`, or the default location when `None`
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly named file must exist.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::load_or_default(),
        }
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = match Self::default_config_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("No user config directory: {}", e);
                return Ok(Self::default());
            }
        };

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("bitbucket-sync").join("config.yml"))
    }

    /// Expand `~` and environment variables in the mirror directory
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(directory) = &self.mirror.directory {
            self.mirror.directory = Some(
                shellexpand::full(directory)
                    .context("Failed to expand mirror directory path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    pub fn clone_urls(&self) -> CloneUrls {
        CloneUrls {
            git: self.mirror.git_url.clone(),
            mercurial: self.mirror.hg_url.clone(),
        }
    }
}
