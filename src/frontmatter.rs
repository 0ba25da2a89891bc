//! Front-matter extraction.
//!
//! A document may start with a metadata block fenced by a delimiter line
//! (`---` by default):
//!
//! ```text
//! ---
//! title: Deploying
//! tags: [ops]
//! ---
//! # Deploying
//! ...
//! ```
//!
//! [`split`] separates the raw block from the body without interpreting
//! it; [`parse_properties`] turns the block into [`Properties`]. Keeping the
//! two steps apart lets callers tell a missing block, an unterminated
//! block and invalid YAML apart.

use serde::de::{Deserialize, Deserializer, Error as _, MapAccess, Visitor};
use std::fmt;

use crate::error::FrontMatterError;
use crate::models::Properties;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Explicit front-matter settings, threaded in from [`crate::config::SyncConfig`].
#[derive(Debug, Clone)]
pub struct FrontMatterConfig {
    pub delimiter: String,
}

impl Default for FrontMatterConfig {
    fn default() -> Self {
        Self {
            delimiter: "---".to_string(),
        }
    }
}

/// Result of [`split`]. `metadata` is `None` when the document has no
/// front matter at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted<'a> {
    pub metadata: Option<&'a [u8]>,
    pub body: &'a [u8],
}

/// Split `input` into an optional metadata block and the body.
pub fn split<'a>(input: &'a [u8], delimiter: &str) -> Result<Extracted<'a>, FrontMatterError> {
    let input = input.strip_prefix(BOM).unwrap_or(input);

    let mut lines = Lines::new(input);
    match lines.next() {
        Some((line, _)) if is_delimiter(line, delimiter) => {}
        _ => {
            return Ok(Extracted {
                metadata: None,
                body: input,
            })
        }
    }

    let metadata_start = lines.offset;
    while let Some((line, line_start)) = lines.next() {
        if is_delimiter(line, delimiter) {
            return Ok(Extracted {
                metadata: Some(&input[metadata_start..line_start]),
                body: &input[lines.offset..],
            });
        }
    }

    Err(FrontMatterError::Unterminated {
        delimiter: delimiter.to_string(),
    })
}

/// Parse a metadata block into a string-keyed mapping.
///
/// An empty block, or one that is YAML `null`, yields an empty mapping.
/// Keys are read as plain strings, so `1` and `"1"` are the same key and
/// a block naming both is rejected.
pub fn parse_properties(metadata: &[u8]) -> Result<Properties, FrontMatterError> {
    if metadata.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Properties::new());
    }
    let parsed: Option<UniqueKeys> =
        serde_yaml::from_slice(metadata).map_err(FrontMatterError::InvalidYaml)?;
    Ok(parsed.map(|p| p.0).unwrap_or_default())
}

/// Top-level mapping that fails on a repeated key instead of letting the
/// later entry win.
struct UniqueKeys(Properties);

impl<'de> Deserialize<'de> for UniqueKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = UniqueKeys;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<UniqueKeys, A::Error> {
                let mut out = Properties::new();
                while let Some((key, value)) = map.next_entry::<String, serde_yaml::Value>()? {
                    if out.contains_key(&key) {
                        return Err(A::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    out.insert(key, value);
                }
                Ok(UniqueKeys(out))
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}

fn is_delimiter(line: &[u8], delimiter: &str) -> bool {
    trim_end(line) == delimiter.as_bytes()
}

fn trim_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., last] = line {
        if last.is_ascii_whitespace() {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Line iterator over raw bytes that remembers where each line starts and
/// where the next one begins.
struct Lines<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> Lines<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, offset: 0 }
    }

    /// Returns the line (without its `\n`) and its start offset.
    fn next(&mut self) -> Option<(&'a [u8], usize)> {
        let input = self.input;
        if self.offset >= input.len() {
            return None;
        }
        let start = self.offset;
        let rest = &input[start..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.offset = start + pos + 1;
                Some((&rest[..pos], start))
            }
            None => {
                self.offset = input.len();
                Some((rest, start))
            }
        }
    }
}
