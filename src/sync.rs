//! Sync run orchestration.
//!
//! One run goes through four steps:
//!
//! 1. Resolve the source (`filesystem`, `git`, or a configured
//!    `<type>:<name>` instance) and open it.
//! 2. Build the local index and fetch the remote inventory concurrently.
//!    Either side failing aborts the run.
//! 3. Reconcile the two indexes into a batch.
//! 4. Execute the batch (dry run unless `--live`).
//!
//! Nothing is written before step 4, so any fatal error leaves the remote
//! store untouched.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::builder::{build_local_index, BuildOptions};
use crate::config::{validate, Config, FilesystemConnectorConfig, GitConnectorConfig};
use crate::connector_fs::{EnumeratorConfig, FilesystemEnumerator, Timestamps};
use crate::connector_git::{self, GitTimestamps};
use crate::error::SyncError;
use crate::executor::{execute, ExecutionReport, SyncMode};
use crate::frontmatter::FrontMatterConfig;
use crate::models::SyncCorrelationId;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::reconcile::{reconcile, ClassificationCounts};
use crate::remote::{HttpRemoteStore, RemoteIndex, RemoteStore};

/// Identity and cancellation shared by everything one run does.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: SyncCorrelationId,
    pub cancel: CancellationToken,
}

impl SyncRun {
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            id: SyncCorrelationId::new(),
            cancel,
        }
    }
}

impl Default for SyncRun {
    fn default() -> Self {
        Self::new()
    }
}

/// A content source, resolved from the command line and config.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Filesystem {
        label: String,
        config: FilesystemConnectorConfig,
    },
    Git {
        label: String,
        config: GitConnectorConfig,
    },
}

impl SourceSpec {
    /// Ad-hoc filesystem source rooted at `root`.
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        SourceSpec::Filesystem {
            label: "filesystem".to_string(),
            config: FilesystemConnectorConfig {
                root: root.into(),
                ignore_globs: Vec::new(),
                follow_symlinks: false,
            },
        }
    }

    pub fn label(&self) -> &str {
        match self {
            SourceSpec::Filesystem { label, .. } | SourceSpec::Git { label, .. } => label,
        }
    }

    pub fn source_type(&self) -> &'static str {
        match self {
            SourceSpec::Filesystem { .. } => "filesystem",
            SourceSpec::Git { .. } => "git",
        }
    }
}

/// Turn `csync sync <source> [locator]` into a [`SourceSpec`].
///
/// `filesystem <root>` and `git <url>` are ad-hoc sources; `filesystem:docs`
/// and `git:handbook` name configured instances.
pub fn resolve_source(config: &Config, source: &str, locator: Option<&str>) -> Result<SourceSpec> {
    if let Some((kind, name)) = source.split_once(':') {
        if locator.is_some() {
            bail!(
                "'{}' names a configured source; it does not take a locator",
                source
            );
        }
        return match kind {
            "filesystem" => {
                let instance = config.connectors.filesystem.get(name).with_context(|| {
                    format!("No filesystem source named '{}' in config", name)
                })?;
                Ok(SourceSpec::Filesystem {
                    label: source.to_string(),
                    config: instance.clone(),
                })
            }
            "git" => {
                let instance = config
                    .connectors
                    .git
                    .get(name)
                    .with_context(|| format!("No git source named '{}' in config", name))?;
                Ok(SourceSpec::Git {
                    label: source.to_string(),
                    config: instance.clone(),
                })
            }
            _ => bail!(
                "Unknown source type: '{}'. Available: filesystem, git",
                kind
            ),
        };
    }

    match (source, locator) {
        ("filesystem", Some(root)) => Ok(SourceSpec::filesystem(root)),
        ("git", Some(url)) => Ok(SourceSpec::Git {
            label: "git".to_string(),
            config: GitConnectorConfig::for_url(url),
        }),
        ("filesystem", None) => bail!("'filesystem' needs a root directory"),
        ("git", None) => bail!("'git' needs a repository URL"),
        _ => bail!(
            "Unknown source: '{}'. Use filesystem <root>, git <url>, or <type>:<name>",
            source
        ),
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub correlation_id: SyncCorrelationId,
    pub source: String,
    pub local_items: usize,
    pub remote_items: usize,
    pub counts: ClassificationCounts,
    /// Sources left out of the local index.
    pub skipped: usize,
    pub execution: ExecutionReport,
}

impl SyncReport {
    pub fn print(&self) {
        println!("sync {} ({})", self.source, self.execution.mode);
        println!("  correlation id: {}", self.correlation_id);
        println!("  local items: {}", self.local_items);
        println!("  remote items: {}", self.remote_items);
        println!("  created: {}", self.counts.created);
        println!("  updated: {}", self.counts.updated);
        println!("  unchanged: {}", self.counts.unchanged);
        println!("  tombstoned: {}", self.counts.tombstoned);
        println!("  skipped: {}", self.skipped);
        println!("  applied: {}", self.execution.applied);
        println!("ok");
    }
}

/// CLI entry point: resolve the source and remote, run, print the summary.
pub async fn run_sync(
    config: &Config,
    source: &str,
    locator: Option<&str>,
    mode: SyncMode,
    run: &SyncRun,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncReport> {
    validate(config)?;
    let spec = resolve_source(config, source, locator)?;
    let store = HttpRemoteStore::from_config(&config.remote)?;

    let report = run_sync_with_store(config, &spec, &store, run, mode, progress)
        .await
        .with_context(|| format!("sync {} failed", spec.label()))?;
    report.print();
    Ok(report)
}

/// Run one sync of `spec` against any [`RemoteStore`].
pub async fn run_sync_with_store(
    config: &Config,
    spec: &SourceSpec,
    store: &dyn RemoteStore,
    run: &SyncRun,
    mode: SyncMode,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncReport, SyncError> {
    info!(source = spec.label(), correlation_id = %run.id, %mode, "starting sync");

    let enumerator = open_source(config, spec, run).await?;
    let options = BuildOptions {
        source_type: spec.source_type().to_string(),
        label: spec.label().to_string(),
        frontmatter: FrontMatterConfig {
            delimiter: config.sync.delimiter.clone(),
        },
        concurrency: config.sync.concurrency,
    };

    let listing = async {
        progress.report(SyncProgressEvent::Listing {
            source: spec.label().to_string(),
            items: 0,
        });
        let items = store.list_items(run).await?;
        progress.report(SyncProgressEvent::Listing {
            source: spec.label().to_string(),
            items: items.len() as u64,
        });
        Ok::<_, SyncError>(items)
    };

    let (local, remote_items) = tokio::try_join!(
        build_local_index(Arc::new(enumerator), &options, run, progress),
        listing,
    )?;
    let remote = RemoteIndex::from_items(remote_items);
    info!(
        local = local.len(),
        remote = remote.len(),
        skipped = local.skipped().len(),
        "indexes ready"
    );

    let reconciliation = reconcile(&local, &remote, Utc::now());
    let counts = reconciliation.counts();

    if mode == SyncMode::Live && !reconciliation.batch.is_empty() {
        progress.report(SyncProgressEvent::Applying {
            source: spec.label().to_string(),
            items: reconciliation.batch.len() as u64,
        });
    }
    let execution = execute(store, run, &reconciliation.batch, mode).await?;

    Ok(SyncReport {
        correlation_id: run.id.clone(),
        source: spec.label().to_string(),
        local_items: local.len(),
        remote_items: remote.len(),
        counts,
        skipped: local.skipped().len(),
        execution,
    })
}

/// Build the enumerator for a source; for git this clones or updates the
/// checkout first.
async fn open_source(
    config: &Config,
    spec: &SourceSpec,
    run: &SyncRun,
) -> Result<FilesystemEnumerator, SyncError> {
    match spec {
        SourceSpec::Filesystem { config: fs, .. } => {
            let enum_config =
                EnumeratorConfig::from_sync(&config.sync, &fs.ignore_globs, fs.follow_symlinks);
            FilesystemEnumerator::new(&fs.root, &enum_config)
        }
        SourceSpec::Git { config: git, .. } => {
            let cache_parent = config
                .db
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let git_config = git.clone();
            let checkout = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => return Err(SyncError::Cancelled),
                res = tokio::task::spawn_blocking(move || {
                    connector_git::checkout(&git_config, &cache_parent)
                }) => res??,
            };
            info!(repo = %git.url, root = %checkout.scan_root.display(), "git checkout ready");

            let enum_config = EnumeratorConfig::from_sync(&config.sync, &git.ignore_globs, false);
            Ok(FilesystemEnumerator::new(&checkout.scan_root, &enum_config)?
                .with_timestamps(Timestamps::Git(GitTimestamps::new(&checkout.repo_dir))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_docs() -> Config {
        let mut config = Config::minimal();
        config.connectors.filesystem.insert(
            "docs".to_string(),
            FilesystemConnectorConfig {
                root: PathBuf::from("./docs"),
                ignore_globs: vec!["drafts".to_string()],
                follow_symlinks: false,
            },
        );
        config
    }

    #[test]
    fn ad_hoc_sources_need_a_locator() {
        let config = Config::minimal();
        assert!(resolve_source(&config, "filesystem", None).is_err());
        assert!(resolve_source(&config, "git", None).is_err());

        match resolve_source(&config, "filesystem", Some("/tmp/docs")).unwrap() {
            SourceSpec::Filesystem { config, label } => {
                assert_eq!(config.root, PathBuf::from("/tmp/docs"));
                assert_eq!(label, "filesystem");
            }
            other => panic!("unexpected {:?}", other),
        }
        let git = resolve_source(&config, "git", Some("https://x/y.git")).unwrap();
        assert_eq!(git.source_type(), "git");
    }

    #[test]
    fn named_sources_come_from_config() {
        let config = config_with_docs();
        let spec = resolve_source(&config, "filesystem:docs", None).unwrap();
        assert_eq!(spec.label(), "filesystem:docs");
        assert!(resolve_source(&config, "filesystem:nope", None).is_err());
        assert!(resolve_source(&config, "filesystem:docs", Some("x")).is_err());
        assert!(resolve_source(&config, "s3:docs", None).is_err());
        assert!(resolve_source(&config, "s3", Some("x")).is_err());
    }

    #[test]
    fn each_run_gets_its_own_id() {
        assert_ne!(SyncRun::new().id, SyncRun::new().id);
    }
}
