//! Git repository source.
//!
//! Clones a repository (shallow by default) into a local cache, or fetches
//! and hard-resets an existing clone, then hands the checkout to the
//! [`FilesystemEnumerator`](crate::connector_fs::FilesystemEnumerator).
//! Create and update times come from the first and last commit touching
//! each file; when history is unavailable (shallow clone, untracked file)
//! filesystem times are used instead.
//!
//! # Configuration
//!
//! ```toml
//! [connectors.git.handbook]
//! url = "https://github.com/acme/handbook.git"
//! branch = "main"
//! root = "docs"
//! shallow = true
//! # cache_dir = "./data/.git-cache/handbook"
//! ```
//!
//! All git calls shell out to the `git` binary and block, so callers run
//! them on a blocking thread.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::GitConnectorConfig;
use crate::error::SyncError;

/// A ready-to-walk checkout.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    pub repo_dir: PathBuf,
    /// `root` resolved inside the checkout.
    pub scan_root: PathBuf,
}

/// Clone or update the repository and resolve the scan root.
///
/// `cache_parent` is used when the config has no explicit `cache_dir`;
/// the clone lands in `<cache_parent>/.git-cache/<hash of url>`.
pub fn checkout(config: &GitConnectorConfig, cache_parent: &Path) -> Result<GitCheckout, SyncError> {
    let unavailable = |e: anyhow::Error| SyncError::SourceUnavailable {
        locator: config.url.clone(),
        message: format!("{:#}", e),
    };

    let repo_dir = match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => cache_parent.join(".git-cache").join(short_hash(&config.url)),
    };

    if repo_dir.join(".git").exists() {
        git_pull(&repo_dir, &config.branch).map_err(unavailable)?;
    } else {
        git_clone(&config.url, &config.branch, config.shallow, &repo_dir).map_err(unavailable)?;
    }

    let scan_root = if config.root == "." {
        repo_dir.clone()
    } else {
        repo_dir.join(&config.root)
    };
    if !scan_root.is_dir() {
        return Err(SyncError::InvalidRoot {
            path: scan_root,
            reason: format!("'{}' does not exist in {}", config.root, config.url),
        });
    }

    Ok(GitCheckout {
        repo_dir,
        scan_root,
    })
}

fn git_clone(url: &str, branch: &str, shallow: bool, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create cache directory: {}", dest.display()))?;

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--branch", branch, "--single-branch"]);
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url);
    cmd.arg(dest);

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

fn git_pull(repo_dir: &Path, branch: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["fetch", "origin", branch])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git fetch'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git fetch failed: {}", stderr.trim());
    }

    let remote_ref = format!("origin/{}", branch);
    let output = Command::new("git")
        .args(["reset", "--hard", &remote_ref])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git reset'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git reset failed: {}", stderr.trim());
    }

    Ok(())
}

/// Looks up per-file commit times inside one repository.
#[derive(Debug, Clone)]
pub struct GitTimestamps {
    repo_dir: PathBuf,
}

impl GitTimestamps {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    /// `(first commit, last commit)` touching `file`, if git knows either.
    pub fn commit_times(&self, file: &Path) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let output = match Command::new("git")
            .args(["log", "--format=%ct", "--"])
            .arg(file)
            .current_dir(&self.repo_dir)
            .output()
        {
            Ok(output) if output.status.success() => output,
            _ => return (None, None),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let times: Vec<DateTime<Utc>> = stdout
            .lines()
            .filter_map(|line| line.trim().parse::<i64>().ok())
            .filter_map(|secs| DateTime::from_timestamp(secs, 0))
            .collect();

        // git log lists newest first.
        (times.last().copied(), times.first().copied())
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}
