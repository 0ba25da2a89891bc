//! TOML configuration parsing and validation.
//!
//! Every section has defaults so a sync can run with nothing but a root
//! path and `--remote`. See [`load_config`] for the validation rules.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db: DbConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Base URL of the item store, e.g. `http://127.0.0.1:7340`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_page_size() -> usize {
    200
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Upper bound on files read and fingerprinted at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Matched against every path segment below the root.
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            extensions: default_extensions(),
            ignore_globs: default_ignore_globs(),
            delimiter: default_delimiter(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string()]
}
fn default_ignore_globs() -> Vec<String> {
    vec![".*".to_string(), "node_modules".to_string()]
}
fn default_delimiter() -> String {
    "---".to_string()
}

/// Named source instances, e.g. `[connectors.filesystem.docs]`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemConnectorConfig>,
    #[serde(default)]
    pub git: BTreeMap<String, GitConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    /// Added to `[sync].ignore_globs` for this instance.
    #[serde(default)]
    pub ignore_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConnectorConfig {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Subdirectory of the checkout to enumerate.
    #[serde(default = "default_git_root")]
    pub root: String,
    #[serde(default = "default_shallow")]
    pub shallow: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub ignore_globs: Vec<String>,
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_git_root() -> String {
    ".".to_string()
}
fn default_shallow() -> bool {
    true
}

impl GitConnectorConfig {
    /// Settings for an ad-hoc `csync sync git <url>` run.
    pub fn for_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            branch: default_branch(),
            root: default_git_root(),
            shallow: default_shallow(),
            cache_dir: None,
            ignore_globs: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/items.sqlite")
}

impl Config {
    /// A config with every default applied, used when no file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks that do not need any I/O. Run before a sync touches anything.
pub fn validate(config: &Config) -> Result<()> {
    if config.sync.concurrency == 0 {
        bail!("sync.concurrency must be >= 1");
    }
    if config.sync.delimiter.trim().is_empty() {
        bail!("sync.delimiter must not be empty");
    }
    if config.sync.extensions.is_empty() {
        bail!("sync.extensions must list at least one extension");
    }
    if config.remote.page_size == 0 {
        bail!("remote.page_size must be >= 1");
    }
    if config.remote.timeout_secs == 0 {
        bail!("remote.timeout_secs must be >= 1");
    }

    let all_globs = config
        .sync
        .ignore_globs
        .iter()
        .chain(config.connectors.filesystem.values().flat_map(|c| &c.ignore_globs))
        .chain(config.connectors.git.values().flat_map(|c| &c.ignore_globs));
    for pattern in all_globs {
        if pattern.contains('/') {
            bail!(
                "ignore glob '{}' contains '/'; globs match a single path segment",
                pattern
            );
        }
        globset::Glob::new(pattern)
            .with_context(|| format!("invalid ignore glob: '{}'", pattern))?;
    }

    if let Some(url) = &config.remote.base_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("remote.base_url must be an http(s) URL, got '{}'", url);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.sync.concurrency, 8);
        assert_eq!(config.sync.delimiter, "---");
        assert_eq!(config.remote.page_size, 200);
        assert!(config.remote.base_url.is_none());
        assert_eq!(config.sync.ignore_globs, vec![".*", "node_modules"]);
    }

    #[test]
    fn named_connectors_parse() {
        let config: Config = toml::from_str(
            r#"
[remote]
base_url = "http://localhost:7340"
page_size = 50

[connectors.filesystem.docs]
root = "/srv/docs"
ignore_globs = ["drafts"]

[connectors.git.handbook]
url = "https://example.com/handbook.git"
"#,
        )
        .unwrap();
        validate(&config).unwrap();

        let docs = &config.connectors.filesystem["docs"];
        assert_eq!(docs.root, PathBuf::from("/srv/docs"));
        assert_eq!(docs.ignore_globs, vec!["drafts"]);
        assert!(!docs.follow_symlinks);

        let handbook = &config.connectors.git["handbook"];
        assert_eq!(handbook.branch, "main");
        assert_eq!(handbook.root, ".");
        assert!(handbook.shallow);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config: Config = toml::from_str("[sync]\nconcurrency = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn bad_glob_is_rejected() {
        let config: Config = toml::from_str("[sync]\nignore_globs = [\"a[\"]\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("invalid ignore glob"));
    }

    #[test]
    fn multi_segment_glob_is_rejected() {
        let config: Config =
            toml::from_str("[connectors.filesystem.docs]\nroot = \"/srv/docs\"\nignore_globs = [\"drafts/*.md\"]\n")
                .unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("single path segment"));
    }

    #[test]
    fn non_http_remote_is_rejected() {
        let config: Config = toml::from_str("[remote]\nbase_url = \"ftp://x\"\n").unwrap();
        assert!(validate(&config).is_err());
    }
}
