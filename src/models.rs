//! Core data models used throughout content-sync.
//!
//! These types represent the documents that flow from a content source,
//! through reconciliation, to the remote item store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Front-matter properties and system metadata share this shape.
pub type Properties = BTreeMap<String, serde_yaml::Value>;

/// A single enumerated file, before it has been read.
#[derive(Debug, Clone)]
pub struct RawSource {
    /// Absolute (or root-joined) path used to read the file.
    pub path: PathBuf,
    /// Path relative to the source root; the input for naming.
    pub relative_path: PathBuf,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// The unit of synchronization, and the wire shape of `PATCH /items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub display_name: String,
    pub content: String,
    pub hash: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub metadata: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_time: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_tombstoned(&self) -> bool {
        self.delete_time.is_some()
    }
}

/// One entry of the remote inventory (`GET /items`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub name: String,
    pub hash: String,
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub delete_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
}

impl RemoteItem {
    pub fn is_tombstoned(&self) -> bool {
        self.delete_time.is_some()
    }
}

/// What a batch entry does to the remote store. Both map onto the same
/// upsert primitive; a tombstone carries a `delete_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upsert,
    Tombstone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub item: Item,
    pub operation: Operation,
}

/// Ordered set of writes produced by the reconciler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    entries: Vec<BatchEntry>,
}

impl SyncBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item, operation: Operation) {
        self.entries.push(BatchEntry { item, operation });
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with the given operation.
    pub fn count(&self, operation: Operation) -> usize {
        self.entries
            .iter()
            .filter(|e| e.operation == operation)
            .count()
    }

    /// The request body for the batch upsert endpoint.
    pub fn items(&self) -> Vec<Item> {
        self.entries.iter().map(|e| e.item.clone()).collect()
    }
}

/// Identifies one sync run in the logs of the remote store.
///
/// Formatted as `sync-<32 hex chars>`. Generated once per run and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCorrelationId(String);

impl SyncCorrelationId {
    pub const PREFIX: &'static str = "sync-";

    pub fn new() -> Self {
        Self(format!("{}{}", Self::PREFIX, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SyncCorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncCorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
