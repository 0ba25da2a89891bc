//! Sync progress reporting.
//!
//! Progress goes to **stderr** so the run summary on stdout stays parseable.
//! Human output is one line per phase change (fingerprinting is throttled);
//! JSON output is one object per event.

use serde::Serialize;
use std::fmt;
use std::io::Write;

/// How often the human reporter prints fingerprinting progress.
const FINGERPRINT_EVERY: u64 = 250;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncProgressEvent {
    /// The source is being walked. Total unknown.
    Discovering { source: String },
    /// `n` of `total` documents read and fingerprinted.
    Fingerprinting { source: String, n: u64, total: u64 },
    /// Remote inventory fetched so far.
    Listing { source: String, items: u64 },
    /// Batch being sent.
    Applying { source: String, items: u64 },
}

impl fmt::Display for SyncProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncProgressEvent::Discovering { source } => write!(f, "sync {}  discovering...", source),
            SyncProgressEvent::Fingerprinting { source, n, total } => write!(
                f,
                "sync {}  fingerprinting  {} / {} files",
                source,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Listing { source, items } => {
                write!(f, "sync {}  listing remote  {} items", source, format_number(*items))
            }
            SyncProgressEvent::Applying { source, items } => {
                write!(f, "sync {}  applying  {} items", source, format_number(*items))
            }
        }
    }
}

pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-readable lines on stderr.
pub struct StderrProgress;

impl StderrProgress {
    fn wants(event: &SyncProgressEvent) -> bool {
        match event {
            SyncProgressEvent::Fingerprinting { n, total, .. } => {
                *n == *total || *n % FINGERPRINT_EVERY == 0
            }
            _ => true,
        }
    }
}

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        if Self::wants(&event) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", event);
            let _ = err.flush();
        }
    }
}

/// One JSON object per line on stderr, e.g.
/// `{"event":"progress","phase":"listing","source":"git:handbook","items":200}`.
pub struct JsonProgress;

#[derive(Serialize)]
struct JsonLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    progress: &'a SyncProgressEvent,
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = JsonLine {
            event: "progress",
            progress: &event,
        };
        if let Ok(json) = serde_json::to_string(&line) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", json);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// `1234567` → `"1,234,567"`.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - head) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `--progress off|human|json`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
