//! Error taxonomy for a sync run.
//!
//! Errors fall into two groups:
//!
//! - [`SourceError`] — something is wrong with **one** document. The local
//!   item builder logs it, records it in the run report and moves on.
//! - [`SyncError`] — the run cannot continue (bad root, broken inventory
//!   read, rejected batch, cancellation). Nothing is applied.
//!
//! [`FrontMatterError`] keeps "no front matter" (not an error at all),
//! "broken delimiters" and "broken YAML" apart so callers can tell them
//! from one another.

use std::path::PathBuf;

/// Failure while splitting or parsing a front-matter block.
#[derive(Debug, thiserror::Error)]
pub enum FrontMatterError {
    /// The opening delimiter line was found but no closing one followed.
    #[error("front matter opened with '{delimiter}' but never closed")]
    Unterminated { delimiter: String },

    /// The block between the delimiters is not a YAML mapping, or it
    /// names the same key twice.
    #[error("front matter is not a valid YAML mapping: {0}")]
    InvalidYaml(serde_yaml::Error),
}

/// Per-item, recoverable failure. The item is skipped; the run goes on.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot walk directory entry: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    #[error("malformed front matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: FrontMatterError,
    },

    #[error("cannot fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} does not produce a usable item name")]
    UnusableName { path: PathBuf },

    #[error("{path} maps to item name '{name}', already taken by {first}")]
    DuplicateName {
        path: PathBuf,
        name: String,
        first: PathBuf,
    },
}

impl SourceError {
    /// The path of the offending source, when one is known.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            SourceError::Walk(e) => e.path(),
            SourceError::Unreadable { path, .. }
            | SourceError::NotUtf8 { path }
            | SourceError::FrontMatter { path, .. }
            | SourceError::Fingerprint { path, .. }
            | SourceError::UnusableName { path }
            | SourceError::DuplicateName { path, .. } => Some(path),
        }
    }
}

/// Run-fatal failure. The run aborts and nothing is applied.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid content root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("content source '{locator}' is unavailable: {message}")]
    SourceUnavailable { locator: String, message: String },

    #[error("unexpected status code {status} from {url}: {body}")]
    UnexpectedStatusCode {
        status: u16,
        url: String,
        body: String,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("sync cancelled")]
    Cancelled,

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
