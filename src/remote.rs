//! Remote item store access.
//!
//! The reconciler only needs two things from the remote side: the current
//! inventory and a batch upsert. [`RemoteStore`] captures exactly that, so
//! runs can target the HTTP API ([`HttpRemoteStore`]) or an in-memory fake
//! ([`MemoryRemoteStore`]).
//!
//! # HTTP contract
//!
//! | Method | Path | Body |
//! |--------|------|------|
//! | `GET` | `/items?page_size=N&page_token=T` | JSON array of [`RemoteItem`] |
//! | `PATCH` | `/items` | JSON array of [`Item`] |
//!
//! The listing cursor travels in the `X-Next-Page-Token` response header;
//! its absence marks the last page. Every request carries
//! `X-Sync-Correlation-Id`. Any non-2xx status is fatal for the run.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::models::{Item, RemoteItem};
use crate::sync::SyncRun;

pub const CORRELATION_HEADER: &str = "X-Sync-Correlation-Id";
pub const NEXT_PAGE_HEADER: &str = "X-Next-Page-Token";

/// Narrow view of the remote store used by a sync run.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// The complete inventory, including tombstoned items. Pagination is
    /// exhausted before this returns.
    async fn list_items(&self, run: &SyncRun) -> Result<Vec<RemoteItem>, SyncError>;

    /// Apply every item in one request. All-or-nothing.
    async fn upsert_items(&self, run: &SyncRun, items: &[Item]) -> Result<(), SyncError>;
}

/// Remote inventory keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RemoteIndex {
    items: BTreeMap<String, RemoteItem>,
}

impl RemoteIndex {
    /// Index a listing. If the store lists a name twice the first entry
    /// wins.
    pub fn from_items(items: impl IntoIterator<Item = RemoteItem>) -> Self {
        let mut index = BTreeMap::new();
        for item in items {
            if index.contains_key(&item.name) {
                warn!(name = %item.name, "remote inventory lists a name twice; ignoring repeat");
                continue;
            }
            index.insert(item.name.clone(), item);
        }
        Self { items: index }
    }

    pub fn get(&self, name: &str) -> Option<&RemoteItem> {
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
}

// ============ HTTP ============

/// [`RemoteStore`] over the item store's REST API.
pub struct HttpRemoteStore {
    base_url: String,
    page_size: usize,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, page_size: usize, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
            client,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, SyncError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::Config("remote.base_url is not set".to_string()))?;
        Self::new(
            base_url,
            config.page_size,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn items_url(&self) -> String {
        format!("{}/items", self.base_url)
    }

    /// Send a request, racing the run's cancellation token, and fail on
    /// any non-2xx status.
    async fn send(
        &self,
        run: &SyncRun,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, SyncError> {
        let request = request.header(CORRELATION_HEADER, run.id.as_str());
        let response = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return Err(SyncError::Cancelled),
            res = request.send() => res.map_err(|source| SyncError::Transport {
                url: url.to_string(),
                source,
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unexpected_status(status, url, &body));
        }
        Ok(response)
    }

    async fn fetch_page(
        &self,
        run: &SyncRun,
        token: Option<&str>,
    ) -> Result<(Vec<RemoteItem>, Option<String>), SyncError> {
        let url = self.items_url();
        let mut query = vec![("page_size", self.page_size.to_string())];
        if let Some(token) = token {
            query.push(("page_token", token.to_string()));
        }

        let response = self
            .send(run, self.client.get(&url).query(&query), &url)
            .await?;

        let next = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .map(|v| {
                v.to_str()
                    .map(str::to_string)
                    .map_err(|e| SyncError::InvalidResponse {
                        url: url.clone(),
                        message: format!("unreadable {} header: {}", NEXT_PAGE_HEADER, e),
                    })
            })
            .transpose()?
            .filter(|t| !t.is_empty());

        let page = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return Err(SyncError::Cancelled),
            res = response.json::<Vec<RemoteItem>>() => res.map_err(|e| SyncError::InvalidResponse {
                url: url.clone(),
                message: e.to_string(),
            })?,
        };
        Ok((page, next))
    }
}

fn unexpected_status(status: StatusCode, url: &str, body: &str) -> SyncError {
    SyncError::UnexpectedStatusCode {
        status: status.as_u16(),
        url: url.to_string(),
        body: body.chars().take(500).collect(),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_items(&self, run: &SyncRun) -> Result<Vec<RemoteItem>, SyncError> {
        let mut items = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut token: Option<String> = None;

        loop {
            let (page, next) = self.fetch_page(run, token.as_deref()).await?;
            debug!(count = page.len(), "fetched inventory page");
            items.extend(page);

            match next {
                Some(next) => {
                    if !seen_tokens.insert(next.clone()) {
                        return Err(SyncError::InvalidResponse {
                            url: self.items_url(),
                            message: format!("page token '{}' repeated", next),
                        });
                    }
                    token = Some(next);
                }
                None => break,
            }
        }

        info!(count = items.len(), correlation_id = %run.id, "fetched remote inventory");
        Ok(items)
    }

    async fn upsert_items(&self, run: &SyncRun, items: &[Item]) -> Result<(), SyncError> {
        let url = self.items_url();
        self.send(run, self.client.patch(&url).json(items), &url)
            .await?;
        info!(count = items.len(), correlation_id = %run.id, "applied batch");
        Ok(())
    }
}

// ============ In-memory ============

/// In-memory [`RemoteStore`] for tests and offline runs.
///
/// Applies upserts with the same semantics as the reference server: a
/// tombstone only sets `delete_time` and `update_time` on an existing row,
/// anything else replaces the row and clears `delete_time`.
#[derive(Default)]
pub struct MemoryRemoteStore {
    items: Mutex<BTreeMap<String, Item>>,
    fail_with: Mutex<Option<u16>>,
    list_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let store = Self::new();
        {
            let mut map = store.lock_items();
            for item in items {
                map.insert(item.name.clone(), item);
            }
        }
        store
    }

    /// Make every following request fail with `status`; `None` restores
    /// normal behaviour.
    pub fn fail_with(&self, status: Option<u16>) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BTreeMap<String, Item> {
        self.lock_items().clone()
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Item>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self, url: &str) -> Result<(), SyncError> {
        let status = *self.fail_with.lock().unwrap_or_else(|e| e.into_inner());
        match status {
            Some(status) => Err(SyncError::UnexpectedStatusCode {
                status,
                url: url.to_string(),
                body: "injected failure".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_items(&self, run: &SyncRun) -> Result<Vec<RemoteItem>, SyncError> {
        if run.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("memory://items")?;
        Ok(self
            .lock_items()
            .values()
            .map(|item| RemoteItem {
                name: item.name.clone(),
                hash: item.hash.clone(),
                update_time: item.update_time,
                delete_time: item.delete_time,
                display_name: Some(item.display_name.clone()),
                create_time: Some(item.create_time),
            })
            .collect())
    }

    async fn upsert_items(&self, run: &SyncRun, items: &[Item]) -> Result<(), SyncError> {
        if run.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("memory://items")?;

        let mut map = self.lock_items();
        for item in items {
            match (item.delete_time, map.get_mut(&item.name)) {
                (Some(deleted), Some(existing)) => {
                    existing.delete_time = Some(deleted);
                    existing.update_time = item.update_time;
                }
                _ => {
                    map.insert(item.name.clone(), item.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Properties;
    use chrono::Utc;

    fn item(name: &str, hash: &str) -> Item {
        let now = Utc::now();
        Item {
            name: name.to_string(),
            display_name: name.to_string(),
            content: format!("content of {}", name),
            hash: hash.to_string(),
            create_time: now,
            update_time: now,
            properties: Properties::new(),
            metadata: Properties::new(),
            delete_time: None,
        }
    }

    #[test]
    fn remote_index_keeps_first_duplicate() {
        let now = Utc::now();
        let summary = |hash: &str| RemoteItem {
            name: "x".to_string(),
            hash: hash.to_string(),
            update_time: now,
            delete_time: None,
            display_name: None,
            create_time: None,
        };
        let index = RemoteIndex::from_items(vec![summary("H1"), summary("H2")]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("x").unwrap().hash, "H1");
    }

    #[tokio::test]
    async fn memory_store_tombstone_keeps_content() {
        let store = MemoryRemoteStore::with_items(vec![item("a", "H1")]);
        let run = SyncRun::new();

        let mut tombstone = item("a", "H1");
        tombstone.content = String::new();
        tombstone.delete_time = Some(Utc::now());
        store.upsert_items(&run, &[tombstone]).await.unwrap();

        let stored = &store.snapshot()["a"];
        assert!(stored.is_tombstoned());
        assert_eq!(stored.content, "content of a");

        let listed = store.list_items(&run).await.unwrap();
        assert!(listed[0].is_tombstoned());
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.upsert_calls(), 1);
    }

    #[tokio::test]
    async fn memory_store_live_upsert_resurrects() {
        let mut dead = item("a", "H1");
        dead.delete_time = Some(Utc::now());
        let store = MemoryRemoteStore::with_items(vec![dead]);

        store
            .upsert_items(&SyncRun::new(), &[item("a", "H2")])
            .await
            .unwrap();
        let stored = &store.snapshot()["a"];
        assert!(!stored.is_tombstoned());
        assert_eq!(stored.hash, "H2");
    }

    #[tokio::test]
    async fn memory_store_injected_failure() {
        let store = MemoryRemoteStore::new();
        store.fail_with(Some(503));
        let err = store.list_items(&SyncRun::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::UnexpectedStatusCode { status: 503, .. }
        ));
    }

    #[test]
    fn http_store_requires_base_url() {
        let err = HttpRemoteStore::from_config(&RemoteConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn http_store_trims_trailing_slash() {
        let store =
            HttpRemoteStore::new("http://localhost:1/", 10, Duration::from_secs(1)).unwrap();
        assert_eq!(store.items_url(), "http://localhost:1/items");
    }
}
