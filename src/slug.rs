//! Canonical item names.
//!
//! An item's name is derived from its path relative to the source root and
//! is the join key between the local and remote indexes, so it must not
//! depend on the platform's path separator or on letter case.

use std::path::{Component, Path};

/// Slug a relative path into an item name.
///
/// The extension is dropped, every segment is lower-cased and each run of
/// non-alphanumeric characters becomes a single `-`. Separators are kept as
/// `/`. Returns `None` when nothing usable remains.
///
/// ```
/// use content_sync::slug::canonical_name;
/// use std::path::Path;
///
/// assert_eq!(canonical_name(Path::new("notes/a.md")).as_deref(), Some("notes/a"));
/// assert_eq!(
///     canonical_name(Path::new("Guides/Getting Started!.md")).as_deref(),
///     Some("guides/getting-started")
/// );
/// ```
pub fn canonical_name(relative_path: &Path) -> Option<String> {
    let without_ext = relative_path.with_extension("");
    let segments: Vec<String> = without_ext
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(slug_segment(&s.to_string_lossy())),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn slug_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut pending_dash = false;
    for c in segment.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
