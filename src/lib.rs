//! # content-sync
//!
//! One-way reconciliation of a markdown corpus into a remote item store.
//!
//! Each run walks a local source, fingerprints every document, compares the
//! result with the remote inventory and sends the minimal batch of creates,
//! updates and soft deletes (tombstones). Unchanged documents are never
//! re-sent and remote history is never destroyed. The local corpus is
//! authoritative.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//! │  Enumerator │──▶│ Front matter│──▶│ Fingerprint │──┐
//! │  FS / Git   │   │  + builder  │   │   SHA-256   │  │ local index
//! └─────────────┘   └─────────────┘   └─────────────┘  ▼
//!                                               ┌────────────┐   ┌──────────┐
//!                                               │ Reconciler │──▶│ Executor │
//!                                               └────────────┘   └────┬─────┘
//! ┌─────────────┐                                      ▲              │
//! │ Remote store│───────────── remote index ───────────┘              │
//! │ GET /items  │◀────────────── PATCH /items ────────────────────────┘
//! └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! csync init                                   # create the item database
//! csync serve &                                # start the reference store
//! csync sync filesystem ./docs                 # preview
//! csync sync filesystem ./docs --live          # apply
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Items, batches and correlation ids |
//! | [`error`] | Per-item and run-fatal error types |
//! | [`connector_fs`] | Filesystem enumerator |
//! | [`connector_git`] | Git checkout and commit timestamps |
//! | [`frontmatter`] | Front-matter split and YAML parsing |
//! | [`fingerprint`] | Canonical content hash |
//! | [`slug`] | Path to item name |
//! | [`builder`] | Local index construction |
//! | [`remote`] | Remote store trait, HTTP client, in-memory fake |
//! | [`reconcile`] | Local/remote classification |
//! | [`executor`] | Dry-run / live batch application |
//! | [`sync`] | Run orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`server`] | Reference item server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sources`] | Configured source listing |

pub mod builder;
pub mod config;
pub mod connector_fs;
pub mod connector_git;
pub mod db;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod frontmatter;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod remote;
pub mod server;
pub mod slug;
pub mod sources;
pub mod sync;
