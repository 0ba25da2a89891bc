//! Batch execution.
//!
//! The only place a run writes to the remote store. A dry run reports what
//! would be sent and stops there.

use std::fmt;
use tracing::info;

use crate::error::SyncError;
use crate::models::{Operation, SyncBatch};
use crate::remote::RemoteStore;
use crate::sync::SyncRun;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    #[default]
    DryRun,
    Live,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::DryRun => f.write_str("dry-run"),
            SyncMode::Live => f.write_str("live"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub mode: SyncMode,
    /// Entries the store accepted. Always 0 for a dry run.
    pub applied: usize,
    pub upserts: usize,
    pub tombstones: usize,
}

/// Apply `batch` according to `mode`.
///
/// An empty batch never contacts the store. In live mode the whole batch
/// goes out in one `upsert_items` call; a failure there is fatal and
/// nothing is reported as applied.
pub async fn execute(
    store: &dyn RemoteStore,
    run: &SyncRun,
    batch: &SyncBatch,
    mode: SyncMode,
) -> Result<ExecutionReport, SyncError> {
    let mut report = ExecutionReport {
        mode,
        applied: 0,
        upserts: batch.count(Operation::Upsert),
        tombstones: batch.count(Operation::Tombstone),
    };

    if batch.is_empty() {
        info!(%mode, "nothing to apply");
        return Ok(report);
    }

    match mode {
        SyncMode::DryRun => {
            info!(
                upserts = report.upserts,
                tombstones = report.tombstones,
                "dry run; batch not sent"
            );
        }
        SyncMode::Live => {
            if run.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            store.upsert_items(run, &batch.items()).await?;
            report.applied = batch.len();
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, Properties};
    use crate::remote::MemoryRemoteStore;
    use chrono::Utc;

    fn item(name: &str, deleted: bool) -> Item {
        let now = Utc::now();
        Item {
            name: name.to_string(),
            display_name: name.to_string(),
            content: "c".to_string(),
            hash: "h".to_string(),
            create_time: now,
            update_time: now,
            properties: Properties::new(),
            metadata: Properties::new(),
            delete_time: deleted.then_some(now),
        }
    }

    fn batch() -> SyncBatch {
        let mut batch = SyncBatch::new();
        batch.push(item("a", false), Operation::Upsert);
        batch.push(item("b", true), Operation::Tombstone);
        batch
    }

    #[tokio::test]
    async fn empty_batch_never_contacts_the_store() {
        let store = MemoryRemoteStore::new();
        for mode in [SyncMode::DryRun, SyncMode::Live] {
            let report = execute(&store, &SyncRun::new(), &SyncBatch::new(), mode)
                .await
                .unwrap();
            assert_eq!(report.applied, 0);
        }
        assert_eq!(store.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn dry_run_transmits_nothing() {
        let store = MemoryRemoteStore::new();
        let report = execute(&store, &SyncRun::new(), &batch(), SyncMode::DryRun)
            .await
            .unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.upserts, 1);
        assert_eq!(report.tombstones, 1);
        assert_eq!(store.upsert_calls(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn live_sends_one_request() {
        let store = MemoryRemoteStore::new();
        let report = execute(&store, &SyncRun::new(), &batch(), SyncMode::Live)
            .await
            .unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(store.upsert_calls(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn live_failure_is_fatal() {
        let store = MemoryRemoteStore::new();
        store.fail_with(Some(500));
        let err = execute(&store, &SyncRun::new(), &batch(), SyncMode::Live)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::UnexpectedStatusCode { status: 500, .. }
        ));
    }
}
