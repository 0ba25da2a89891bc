//! Local item builder.
//!
//! Turns enumerated sources into a [`LocalIndex`]: each file is read,
//! split into front matter and body, named, and fingerprinted.
//!
//! The walk itself is sequential and runs on a blocking thread. Per-file
//! work fans out over a [`JoinSet`] bounded by a semaphore, and results are
//! merged back in relative-path order so the index is deterministic.
//!
//! One bad document never blocks the rest: per-item failures are logged,
//! recorded in [`LocalIndex::skipped`] and left out of the index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::connector_fs::FilesystemEnumerator;
use crate::error::{SourceError, SyncError};
use crate::fingerprint::fingerprint;
use crate::frontmatter::{parse_properties, split, FrontMatterConfig};
use crate::models::{Item, Properties, RawSource};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::slug::canonical_name;
use crate::sync::SyncRun;

/// Settings for [`build_local_index`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Recorded in each item's metadata, e.g. `"filesystem"` or `"git"`.
    pub source_type: String,
    /// Used in progress events, e.g. `"filesystem:docs"`.
    pub label: String,
    pub frontmatter: FrontMatterConfig,
    pub concurrency: usize,
}

/// A source left out of the index, and why.
#[derive(Debug, Clone)]
pub struct SkippedSource {
    pub path: Option<PathBuf>,
    pub reason: String,
}

/// Local items keyed by name, plus everything that was skipped.
#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    items: BTreeMap<String, Item>,
    skipped: Vec<SkippedSource>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index already-built items. As in [`build_local_index`], the first
    /// item with a given name wins and later ones are ignored.
    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let mut index = BTreeMap::new();
        for item in items {
            index.entry(item.name.clone()).or_insert(item);
        }
        Self {
            items: index,
            skipped: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Item> {
        self.items.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn skipped(&self) -> &[SkippedSource] {
        &self.skipped
    }

    fn skip(&mut self, error: SourceError) {
        warn!(error = %error, "skipping source");
        self.skipped.push(SkippedSource {
            path: error.path().map(Path::to_path_buf),
            reason: error.to_string(),
        });
    }
}

/// Build the local index from every source the enumerator yields.
pub async fn build_local_index(
    enumerator: Arc<FilesystemEnumerator>,
    options: &BuildOptions,
    run: &SyncRun,
    progress: &dyn SyncProgressReporter,
) -> Result<LocalIndex, SyncError> {
    progress.report(SyncProgressEvent::Discovering {
        source: options.label.clone(),
    });

    let walker = Arc::clone(&enumerator);
    let discovered = tokio::select! {
        biased;
        _ = run.cancel.cancelled() => return Err(SyncError::Cancelled),
        res = tokio::task::spawn_blocking(move || walker.iter().collect::<Vec<_>>()) => res?,
    };

    let mut index = LocalIndex::new();
    let mut sources = Vec::with_capacity(discovered.len());
    for entry in discovered {
        match entry {
            Ok(source) => sources.push(source),
            Err(e) => index.skip(e),
        }
    }

    let total = sources.len() as u64;
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let shared = Arc::new(options.clone());
    let mut tasks = JoinSet::new();

    for source in sources {
        let semaphore = Arc::clone(&semaphore);
        let options = Arc::clone(&shared);
        let cancel = run.cancel.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Cancelled)?;
            let bytes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                res = tokio::fs::read(&source.path) => res,
            };
            let result = match bytes {
                Ok(bytes) => build_item(&source, &bytes, &options),
                Err(e) => Err(SourceError::Unreadable {
                    path: source.path.clone(),
                    source: e,
                }),
            };
            Ok((source.relative_path, result))
        });
    }

    let mut built = Vec::with_capacity(total as usize);
    loop {
        let joined = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => {
                tasks.abort_all();
                return Err(SyncError::Cancelled);
            }
            next = tasks.join_next() => next,
        };
        let Some(joined) = joined else { break };
        built.push(joined??);
        progress.report(SyncProgressEvent::Fingerprinting {
            source: options.label.clone(),
            n: built.len() as u64,
            total,
        });
    }

    built.sort_by(|a, b| a.0.cmp(&b.0));
    let mut first_seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    for (relative_path, result) in built {
        let item = match result {
            Ok(item) => item,
            Err(e) => {
                index.skip(e);
                continue;
            }
        };
        if let Some(first) = first_seen.get(&item.name) {
            index.skip(SourceError::DuplicateName {
                path: relative_path,
                name: item.name,
                first: first.clone(),
            });
            continue;
        }
        debug!(name = %item.name, hash = %item.hash, "built local item");
        first_seen.insert(item.name.clone(), relative_path);
        index.items.insert(item.name.clone(), item);
    }

    Ok(index)
}

/// Build one item from a source's bytes. Pure apart from the inputs.
pub fn build_item(
    source: &RawSource,
    bytes: &[u8],
    options: &BuildOptions,
) -> Result<Item, SourceError> {
    let frontmatter_error = |e| SourceError::FrontMatter {
        path: source.path.clone(),
        source: e,
    };

    let extracted = split(bytes, &options.frontmatter.delimiter).map_err(frontmatter_error)?;
    let properties = match extracted.metadata {
        Some(block) => parse_properties(block).map_err(frontmatter_error)?,
        None => Properties::new(),
    };
    let content = std::str::from_utf8(extracted.body)
        .map_err(|_| SourceError::NotUtf8 {
            path: source.path.clone(),
        })?
        .to_string();

    let name = canonical_name(&source.relative_path).ok_or_else(|| SourceError::UnusableName {
        path: source.path.clone(),
    })?;

    let relative = source.relative_path.to_string_lossy().replace('\\', "/");
    let mut metadata = Properties::new();
    metadata.insert("source".to_string(), options.source_type.as_str().into());
    metadata.insert("path".to_string(), relative.into());

    let hash = fingerprint(&content, &properties, &metadata).map_err(|e| {
        SourceError::Fingerprint {
            path: source.path.clone(),
            source: e,
        }
    })?;

    Ok(Item {
        display_name: display_name(&properties, &content, &source.relative_path),
        name,
        content,
        hash,
        create_time: source.created,
        update_time: source.modified,
        properties,
        metadata,
        delete_time: None,
    })
}

/// Front-matter `title`, else the first `# ` heading, else the file stem.
fn display_name(properties: &Properties, content: &str, relative_path: &Path) -> String {
    if let Some(title) = properties.get("title").and_then(|v| v.as_str()) {
        if !title.trim().is_empty() {
            return title.trim().to_string();
        }
    }
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("# ") {
            let heading = rest.trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }
    relative_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector_fs::EnumeratorConfig;
    use crate::progress::NoProgress;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn options() -> BuildOptions {
        BuildOptions {
            source_type: "filesystem".to_string(),
            label: "filesystem".to_string(),
            frontmatter: FrontMatterConfig::default(),
            concurrency: 2,
        }
    }

    fn raw(rel: &str) -> RawSource {
        let now = Utc::now();
        RawSource {
            path: PathBuf::from("/root").join(rel),
            relative_path: PathBuf::from(rel),
            created: now,
            modified: now,
        }
    }

    async fn build(root: &Path) -> LocalIndex {
        let enumerator =
            FilesystemEnumerator::new(root, &EnumeratorConfig::default()).unwrap();
        build_local_index(Arc::new(enumerator), &options(), &SyncRun::new(), &NoProgress)
            .await
            .unwrap()
    }

    #[test]
    fn plain_file_becomes_item() {
        let item = build_item(&raw("notes/a.md"), b"hello", &options()).unwrap();
        assert_eq!(item.name, "notes/a");
        assert_eq!(item.content, "hello");
        assert_eq!(item.display_name, "a");
        assert!(item.properties.is_empty());
        assert_eq!(item.metadata["path"], serde_yaml::Value::from("notes/a.md"));
        assert_eq!(item.metadata["source"], serde_yaml::Value::from("filesystem"));
        assert!(item.delete_time.is_none());
    }

    #[test]
    fn front_matter_feeds_properties_and_title() {
        let item = build_item(
            &raw("a.md"),
            b"---\ntitle: Deploying\ntags: [ops]\n---\n# Heading\nbody\n",
            &options(),
        )
        .unwrap();
        assert_eq!(item.display_name, "Deploying");
        assert_eq!(item.content, "# Heading\nbody\n");
        assert!(item.properties.contains_key("tags"));
    }

    #[test]
    fn heading_is_the_fallback_title() {
        let item = build_item(&raw("a.md"), b"intro\n# The Title\n", &options()).unwrap();
        assert_eq!(item.display_name, "The Title");
    }

    #[test]
    fn display_name_does_not_change_the_hash() {
        let a = build_item(&raw("a.md"), b"same", &options()).unwrap();
        let b = build_item(&raw("a.md"), b"same", &options()).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn malformed_inputs_are_per_item_errors() {
        let unterminated = build_item(&raw("a.md"), b"---\ntitle: x\n", &options()).unwrap_err();
        assert!(matches!(unterminated, SourceError::FrontMatter { .. }));

        let bad_yaml = build_item(&raw("a.md"), b"---\ntitle: [unclosed\n---\n", &options()).unwrap_err();
        assert!(matches!(bad_yaml, SourceError::FrontMatter { .. }));

        let not_utf8 = build_item(&raw("a.md"), b"\xff\xfe", &options()).unwrap_err();
        assert!(matches!(not_utf8, SourceError::NotUtf8 { .. }));

        let nameless = build_item(&raw("!!!.md"), b"x", &options()).unwrap_err();
        assert!(matches!(nameless, SourceError::UnusableName { .. }));
    }

    #[tokio::test]
    async fn malformed_document_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("good.md"), "fine").unwrap();
        fs::write(tmp.path().join("bad.md"), "---\nnever closed\n").unwrap();

        let index = build(tmp.path()).await;
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["good"]);
        assert_eq!(index.skipped().len(), 1);
        assert!(index.skipped()[0]
            .path
            .as_ref()
            .unwrap()
            .ends_with("bad.md"));
    }

    #[tokio::test]
    async fn colliding_names_keep_the_first_path() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Read Me.md"), "first").unwrap();
        fs::write(tmp.path().join("read-me.md"), "second").unwrap();

        let index = build(tmp.path()).await;
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("read-me").unwrap().content, "first");
        assert_eq!(index.skipped().len(), 1);
        assert!(index.skipped()[0].reason.contains("read-me"));
    }

    #[test]
    fn from_items_keeps_the_first_of_a_name() {
        let first = build_item(&raw("a.md"), b"first", &options()).unwrap();
        let second = build_item(&raw("a.md"), b"second", &options()).unwrap();
        let index = LocalIndex::from_items([first, second]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap().content, "first");
    }

    #[tokio::test]
    async fn many_files_with_small_concurrency() {
        let tmp = TempDir::new().unwrap();
        for i in 0..25 {
            fs::write(tmp.path().join(format!("doc-{:02}.md", i)), format!("body {}", i)).unwrap();
        }
        let index = build(tmp.path()).await;
        assert_eq!(index.len(), 25);
        assert_eq!(index.names().next(), Some("doc-00"));
        assert!(index.skipped().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_stops() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "a").unwrap();
        let enumerator =
            FilesystemEnumerator::new(tmp.path(), &EnumeratorConfig::default()).unwrap();
        let run = SyncRun::new();
        run.cancel.cancel();
        let err = build_local_index(Arc::new(enumerator), &options(), &run, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
