//! Filesystem source enumerator.
//!
//! Walks a root directory and yields one [`RawSource`] per markdown file.
//! The walk is lazy and restartable: every call to
//! [`FilesystemEnumerator::iter`] starts a fresh walk in sorted path order.
//!
//! # Filtering
//!
//! - An entry is pruned when **any path segment** below the root matches an
//!   ignore glob. Globs are matched per segment, so `*` never crosses a `/`
//!   and `.*` prunes every hidden file and directory.
//! - Only files with a configured extension (`md`, `markdown` by default,
//!   case-insensitive) are yielded.
//!
//! # Errors
//!
//! A missing or unreadable root fails construction with
//! [`SyncError::InvalidRoot`]. A single unreadable entry during the walk is
//! yielded as a [`SourceError`] and the walk carries on.

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::connector_git::GitTimestamps;
use crate::error::{SourceError, SyncError};
use crate::models::RawSource;

/// Explicit enumerator settings; nothing is read from global state.
#[derive(Debug, Clone)]
pub struct EnumeratorConfig {
    pub ignore_globs: Vec<String>,
    pub extensions: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            ignore_globs: sync.ignore_globs,
            extensions: sync.extensions,
            follow_symlinks: false,
        }
    }
}

impl EnumeratorConfig {
    /// Combine the shared `[sync]` settings with per-instance extras.
    pub fn from_sync(sync: &SyncConfig, extra_ignores: &[String], follow_symlinks: bool) -> Self {
        let mut ignore_globs = sync.ignore_globs.clone();
        ignore_globs.extend(extra_ignores.iter().cloned());
        Self {
            ignore_globs,
            extensions: sync.extensions.clone(),
            follow_symlinks,
        }
    }
}

/// Where create/update times come from.
#[derive(Debug, Clone)]
pub enum Timestamps {
    /// Filesystem metadata (`created`, falling back to `modified`).
    Filesystem,
    /// First and last commit touching the file, falling back to the
    /// filesystem when git has no answer.
    Git(GitTimestamps),
}

pub struct FilesystemEnumerator {
    root: PathBuf,
    ignore: GlobSet,
    extensions: Vec<String>,
    follow_symlinks: bool,
    timestamps: Timestamps,
}

impl FilesystemEnumerator {
    pub fn new(root: impl Into<PathBuf>, config: &EnumeratorConfig) -> Result<Self, SyncError> {
        let root = root.into();
        let meta = std::fs::metadata(&root).map_err(|e| SyncError::InvalidRoot {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(SyncError::InvalidRoot {
                path: root,
                reason: "not a directory".to_string(),
            });
        }
        std::fs::read_dir(&root).map_err(|e| SyncError::InvalidRoot {
            path: root.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            ignore: build_segment_globset(&config.ignore_globs)?,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            follow_symlinks: config.follow_symlinks,
            timestamps: Timestamps::Filesystem,
            root,
        })
    }

    pub fn with_timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Start a new walk over the root.
    pub fn iter(&self) -> impl Iterator<Item = Result<RawSource, SourceError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| entry.depth() == 0 || !self.is_ignored(entry.path()))
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(SourceError::Walk(e))),
                };
                if !entry.file_type().is_file() || !self.has_content_extension(entry.path()) {
                    return None;
                }
                Some(self.to_raw_source(entry.path()))
            })
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.relative(path)
            .components()
            .any(|segment| self.ignore.is_match(segment.as_os_str()))
    }

    fn has_content_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    fn to_raw_source(&self, path: &Path) -> Result<RawSource, SourceError> {
        let meta = std::fs::metadata(path).map_err(|source| SourceError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let created = meta.created().unwrap_or(modified);
        let relative_path = self.relative(path).to_path_buf();

        let (created, modified) = match &self.timestamps {
            Timestamps::Filesystem => (to_utc(created), to_utc(modified)),
            Timestamps::Git(git) => {
                let (first, last) = git.commit_times(path);
                (
                    first.unwrap_or_else(|| to_utc(created)),
                    last.unwrap_or_else(|| to_utc(modified)),
                )
            }
        };

        Ok(RawSource {
            path: path.to_path_buf(),
            relative_path,
            created,
            modified,
        })
    }
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Globs compiled for matching a single path segment.
fn build_segment_globset(patterns: &[String]) -> Result<GlobSet, SyncError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if pattern.contains('/') {
            return Err(SyncError::Config(format!(
                "ignore glob '{}' contains '/'; globs match a single path segment",
                pattern
            )));
        }
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| SyncError::Config(format!("invalid ignore glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::Config(format!("cannot build ignore globs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn names(enumerator: &FilesystemEnumerator) -> Vec<String> {
        enumerator
            .iter()
            .map(|r| r.unwrap().relative_path.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn yields_markdown_in_sorted_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.md", "b");
        write(tmp.path(), "a/z.markdown", "z");
        write(tmp.path(), "a/y.MD", "y");
        write(tmp.path(), "notes.txt", "skip");

        let e = FilesystemEnumerator::new(tmp.path(), &EnumeratorConfig::default()).unwrap();
        assert_eq!(names(&e), vec!["a/y.MD", "a/z.markdown", "b.md"]);
    }

    #[test]
    fn hidden_and_ignored_segments_are_pruned() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".git/HEAD.md", "x");
        write(tmp.path(), "docs/.drafts/wip.md", "x");
        write(tmp.path(), "docs/.hidden.md", "x");
        write(tmp.path(), "node_modules/pkg/readme.md", "x");
        write(tmp.path(), "docs/build-out/gen.md", "x");
        write(tmp.path(), "docs/keep.md", "x");

        let config = EnumeratorConfig {
            ignore_globs: vec![".*".into(), "node_modules".into(), "build-*".into()],
            ..EnumeratorConfig::default()
        };
        let e = FilesystemEnumerator::new(tmp.path(), &config).unwrap();
        assert_eq!(names(&e), vec!["docs/keep.md"]);
    }

    #[test]
    fn star_does_not_cross_segments() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "docs/a.md", "x");

        let config = EnumeratorConfig {
            ignore_globs: vec!["docs*a.md".into()],
            ..EnumeratorConfig::default()
        };
        let e = FilesystemEnumerator::new(tmp.path(), &config).unwrap();
        assert_eq!(names(&e), vec!["docs/a.md"]);
    }

    #[test]
    fn slash_in_glob_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let config = EnumeratorConfig {
            ignore_globs: vec!["docs/drafts".into()],
            ..EnumeratorConfig::default()
        };
        let err = FilesystemEnumerator::new(tmp.path(), &config).err().unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_yielded_as_walk_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "good.md", "ok");
        std::os::unix::fs::symlink(tmp.path().join("missing.md"), tmp.path().join("dangling.md"))
            .unwrap();

        let config = EnumeratorConfig {
            follow_symlinks: true,
            ..EnumeratorConfig::default()
        };
        let e = FilesystemEnumerator::new(tmp.path(), &config).unwrap();
        let results: Vec<_> = e.iter().collect();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(SourceError::Walk(_)))));
        let good: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].relative_path, Path::new("good.md"));
    }

    #[test]
    fn walk_is_restartable() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "a");
        write(tmp.path(), "b.md", "b");

        let e = FilesystemEnumerator::new(tmp.path(), &EnumeratorConfig::default()).unwrap();
        assert_eq!(names(&e), names(&e));
        assert_eq!(e.iter().count(), 2);
    }

    #[test]
    fn missing_root_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let err = FilesystemEnumerator::new(tmp.path().join("nope"), &EnumeratorConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::InvalidRoot { .. }));
    }

    #[test]
    fn file_root_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "a");
        let err = FilesystemEnumerator::new(tmp.path().join("a.md"), &EnumeratorConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::InvalidRoot { .. }));
    }

    #[test]
    fn timestamps_come_from_metadata() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "a");
        let e = FilesystemEnumerator::new(tmp.path(), &EnumeratorConfig::default()).unwrap();
        let source = e.iter().next().unwrap().unwrap();
        assert!(source.modified.timestamp() > 0);
        assert_eq!(source.path, tmp.path().join("a.md"));
    }
}
