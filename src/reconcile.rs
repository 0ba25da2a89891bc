//! Local/remote reconciliation.
//!
//! [`reconcile`] is a pure function of the two indexes and the tombstone
//! timestamp. It walks the sorted union of names and classifies each one:
//!
//! | local   | remote               | classification |
//! |---------|----------------------|----------------|
//! | present | absent               | Create         |
//! | present | live, other hash     | Update         |
//! | present | live, same hash      | Unchanged      |
//! | present | tombstoned           | Update         |
//! | absent  | live                 | Tombstone      |
//! | absent  | tombstoned           | Unchanged      |
//!
//! Only name and hash take part in the comparison. The local corpus is
//! authoritative, so a tombstoned remote item that reappears locally is
//! resurrected by a plain upsert.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::debug;

use crate::builder::LocalIndex;
use crate::models::{Item, Operation, Properties, RemoteItem, SyncBatch};
use crate::remote::RemoteIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Classification {
    Create,
    Update,
    Unchanged,
    Tombstone,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Create => "create",
            Classification::Update => "update",
            Classification::Unchanged => "unchanged",
            Classification::Tombstone => "tombstone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub name: String,
    pub classification: Classification,
}

/// Per-classification totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
}

impl ClassificationCounts {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.tombstoned
    }
}

/// The batch to apply plus one decision per name seen on either side.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub batch: SyncBatch,
    pub decisions: Vec<Decision>,
}

impl Reconciliation {
    pub fn counts(&self) -> ClassificationCounts {
        let mut counts = ClassificationCounts::default();
        for decision in &self.decisions {
            match decision.classification {
                Classification::Create => counts.created += 1,
                Classification::Update => counts.updated += 1,
                Classification::Unchanged => counts.unchanged += 1,
                Classification::Tombstone => counts.tombstoned += 1,
            }
        }
        counts
    }

    pub fn classification_of(&self, name: &str) -> Option<Classification> {
        self.decisions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.classification)
    }
}

/// Compare the local and remote indexes and emit the minimal batch.
pub fn reconcile(local: &LocalIndex, remote: &RemoteIndex, now: DateTime<Utc>) -> Reconciliation {
    let names: BTreeSet<&str> = local.names().chain(remote.names()).collect();
    let mut result = Reconciliation::default();

    for name in names {
        let classification = match (local.get(name), remote.get(name)) {
            (Some(item), None) => {
                result.batch.push(item.clone(), Operation::Upsert);
                Classification::Create
            }
            (Some(item), Some(existing)) if existing.is_tombstoned() => {
                let mut item = item.clone();
                item.delete_time = None;
                result.batch.push(item, Operation::Upsert);
                Classification::Update
            }
            (Some(item), Some(existing)) if existing.hash != item.hash => {
                result.batch.push(item.clone(), Operation::Upsert);
                Classification::Update
            }
            (Some(_), Some(_)) => Classification::Unchanged,
            (None, Some(existing)) if existing.is_tombstoned() => Classification::Unchanged,
            (None, Some(existing)) => {
                result
                    .batch
                    .push(tombstone_for(existing, now), Operation::Tombstone);
                Classification::Tombstone
            }
            (None, None) => continue,
        };

        debug!(name, classification = classification.as_str(), "reconciled");
        result.decisions.push(Decision {
            name: name.to_string(),
            classification,
        });
    }

    result
}

/// The soft-delete form of a remote item. Content and maps are left empty;
/// the store keeps what it already has.
fn tombstone_for(remote: &RemoteItem, now: DateTime<Utc>) -> Item {
    Item {
        name: remote.name.clone(),
        display_name: remote
            .display_name
            .clone()
            .unwrap_or_else(|| remote.name.clone()),
        content: String::new(),
        hash: remote.hash.clone(),
        create_time: remote.create_time.unwrap_or(now),
        update_time: now,
        properties: Properties::new(),
        metadata: Properties::new(),
        delete_time: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, hash: &str) -> Item {
        let now = Utc::now();
        Item {
            name: name.to_string(),
            display_name: name.to_string(),
            content: format!("body of {}", name),
            hash: hash.to_string(),
            create_time: now,
            update_time: now,
            properties: Properties::new(),
            metadata: Properties::new(),
            delete_time: None,
        }
    }

    fn remote(name: &str, hash: &str) -> RemoteItem {
        RemoteItem {
            name: name.to_string(),
            hash: hash.to_string(),
            update_time: Utc::now(),
            delete_time: None,
            display_name: None,
            create_time: None,
        }
    }

    fn dead(name: &str, hash: &str) -> RemoteItem {
        RemoteItem {
            delete_time: Some(Utc::now()),
            ..remote(name, hash)
        }
    }

    fn run(locals: Vec<Item>, remotes: Vec<RemoteItem>) -> Reconciliation {
        reconcile(
            &LocalIndex::from_items(locals),
            &RemoteIndex::from_items(remotes),
            Utc::now(),
        )
    }

    #[test]
    fn new_local_item_is_created() {
        let r = run(vec![local("notes/a", "H0")], vec![]);
        assert_eq!(r.batch.len(), 1);
        let entry = &r.batch.entries()[0];
        assert_eq!(entry.operation, Operation::Upsert);
        assert_eq!(entry.item.name, "notes/a");
        assert_eq!(r.classification_of("notes/a"), Some(Classification::Create));
    }

    #[test]
    fn changed_hash_is_updated() {
        let r = run(vec![local("x", "H2")], vec![remote("x", "H1")]);
        assert_eq!(r.batch.len(), 1);
        let entry = &r.batch.entries()[0];
        assert_eq!(entry.item.hash, "H2");
        assert_eq!(entry.item.content, "body of x");
        assert_eq!(r.classification_of("x"), Some(Classification::Update));
    }

    #[test]
    fn missing_locally_is_tombstoned() {
        let now = Utc::now();
        let r = reconcile(
            &LocalIndex::new(),
            &RemoteIndex::from_items(vec![remote("y", "H3")]),
            now,
        );
        assert_eq!(r.batch.len(), 1);
        let entry = &r.batch.entries()[0];
        assert_eq!(entry.operation, Operation::Tombstone);
        assert_eq!(entry.item.name, "y");
        assert_eq!(entry.item.hash, "H3");
        assert_eq!(entry.item.delete_time, Some(now));
        assert_eq!(entry.item.display_name, "y");
    }

    #[test]
    fn equal_hash_is_unchanged() {
        let r = run(vec![local("z", "H4")], vec![remote("z", "H4")]);
        assert!(r.batch.is_empty());
        assert_eq!(r.classification_of("z"), Some(Classification::Unchanged));
    }

    #[test]
    fn already_tombstoned_is_not_tombstoned_again() {
        let r = run(vec![], vec![dead("gone", "H5")]);
        assert!(r.batch.is_empty());
        assert_eq!(r.counts().unchanged, 1);
    }

    #[test]
    fn reappearing_item_is_resurrected() {
        let r = run(vec![local("back", "H6")], vec![dead("back", "H6")]);
        assert_eq!(r.batch.len(), 1);
        let entry = &r.batch.entries()[0];
        assert_eq!(entry.operation, Operation::Upsert);
        assert!(entry.item.delete_time.is_none());
        assert_eq!(r.classification_of("back"), Some(Classification::Update));
    }

    #[test]
    fn every_name_is_classified_exactly_once() {
        let r = run(
            vec![local("a", "1"), local("b", "2"), local("c", "3"), local("e", "5")],
            vec![remote("b", "x"), remote("c", "3"), remote("d", "4"), dead("e", "5"), dead("f", "6")],
        );
        let names: Vec<&str> = r.decisions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e", "f"]);

        let counts = r.counts();
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.created, 1);
        assert_eq!(counts.updated, 2);
        assert_eq!(counts.unchanged, 2);
        assert_eq!(counts.tombstoned, 1);
        assert_eq!(r.batch.len(), 4);
    }

    #[test]
    fn batch_is_sorted_by_name() {
        let r = run(
            vec![local("m", "1"), local("a", "1")],
            vec![remote("z", "1"), remote("c", "1")],
        );
        let names: Vec<&str> = r
            .batch
            .entries()
            .iter()
            .map(|e| e.item.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "c", "m", "z"]);
    }

    #[test]
    fn applying_the_batch_then_reconciling_again_is_empty() {
        let locals = vec![local("a", "1"), local("b", "2")];
        let first = run(locals.clone(), vec![remote("b", "old"), remote("c", "3")]);

        // What the store lists after applying the first batch.
        let after: Vec<RemoteItem> = first
            .batch
            .entries()
            .iter()
            .map(|e| RemoteItem {
                name: e.item.name.clone(),
                hash: e.item.hash.clone(),
                update_time: e.item.update_time,
                delete_time: e.item.delete_time,
                display_name: Some(e.item.display_name.clone()),
                create_time: Some(e.item.create_time),
            })
            .collect();

        let second = run(locals, after);
        assert!(second.batch.is_empty());
        assert_eq!(second.counts().unchanged, 3);
    }

    #[test]
    fn only_the_hash_is_compared() {
        let mut renamed = local("a", "1");
        renamed.display_name = "A brand new title".to_string();
        let mut listed = remote("a", "1");
        listed.display_name = Some("Old title".to_string());
        let r = run(vec![renamed], vec![listed]);
        assert!(r.batch.is_empty());
    }

    #[test]
    fn tombstone_keeps_remote_identity() {
        let created = Utc::now() - chrono::Duration::days(3);
        let mut listed = remote("old", "H9");
        listed.display_name = Some("Old Doc".to_string());
        listed.create_time = Some(created);
        let r = run(vec![], vec![listed]);
        let item = &r.batch.entries()[0].item;
        assert_eq!(item.display_name, "Old Doc");
        assert_eq!(item.create_time, created);
        assert!(item.content.is_empty());
    }
}
