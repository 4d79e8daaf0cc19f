//! Common test utilities and helpers for bitbucket-sync tests
#![allow(dead_code)]

use assert_fs::TempDir;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/site/oauth2/access_token";

/// Scratch directories for one test: config, mirrors and local "remote" repositories
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub mirror_dir: PathBuf,
    pub remote_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mirror_dir = temp_dir.path().join("mirrors");
        let remote_dir = temp_dir.path().join("remotes");
        std::fs::create_dir_all(&remote_dir).expect("Failed to create remote dir");

        Self {
            temp_dir,
            mirror_dir,
            remote_dir,
        }
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.temp_dir.path().join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// Config pointing the API at `server` and clone URLs at the local remotes
    pub fn create_server_config(&self, server: &MockServer) -> PathBuf {
        let content = format!(
            r#"
bitbucket:
  api_url: "{uri}/2.0"
  token_url: "{uri}{token}"
mirror:
  processes: 2
  git_url: "file://{remotes}/{{owner}}/{{slug}}.git"
logging:
  color: false
"#,
            uri = server.uri(),
            token = TOKEN_PATH,
            remotes = self.remote_dir.display(),
        );
        self.create_test_config(&content)
    }

    /// The compiled binary with an isolated environment
    pub fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_bitbucket-sync"));
        command
            .env_remove("BITBUCKET_KEY")
            .env_remove("BITBUCKET_SECRET")
            .env_remove("RUST_LOG")
            .env("XDG_CONFIG_HOME", self.temp_dir.path())
            .env("HOME", self.temp_dir.path());
        command
    }

    /// Create a bare git repository at `remotes/owner/slug.git` with one commit
    pub fn create_git_remote(&self, owner: &str, slug: &str) -> PathBuf {
        let work = self.temp_dir.path().join("work").join(owner).join(slug);
        std::fs::create_dir_all(&work).expect("Failed to create work dir");
        git(&work, &["init", "--quiet"]);
        commit(&work, "initial");

        let remote = self.remote_dir.join(owner).join(format!("{}.git", slug));
        std::fs::create_dir_all(remote.parent().unwrap()).unwrap();
        git(
            self.temp_dir.path(),
            &[
                "clone",
                "--bare",
                "--quiet",
                work.to_str().unwrap(),
                remote.to_str().unwrap(),
            ],
        );
        remote
    }
}

/// Whether a usable `git` is on PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn commit(work: &Path, message: &str) {
    git(
        work,
        &[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "--allow-empty",
            "--quiet",
            "-m",
            message,
        ],
    );
}

/// API repository object as Bitbucket returns it
pub fn repository_json(owner: &str, slug: &str, scm: &str) -> Value {
    json!({
        "scm": scm,
        "slug": slug,
        "full_name": format!("{}/{}", owner, slug),
        "workspace": { "slug": owner },
        "is_private": true
    })
}

/// One listing page; `next` is a path on the mock server
pub fn repository_page(server: &MockServer, values: Vec<Value>, next: Option<&str>) -> Value {
    let mut page = json!({ "pagelen": 100, "values": values });
    if let Some(next) = next {
        page["next"] = Value::String(format!("{}{}", server.uri(), next));
    }
    page
}

/// Mount a token endpoint that accepts any credentials
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "integration-token",
            "token_type": "bearer"
        })))
        .mount(server)
        .await;
}
