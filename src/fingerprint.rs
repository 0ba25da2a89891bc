//! Content fingerprints.
//!
//! The hash of an item covers its body, its front-matter properties and its
//! system metadata. Mappings are written in a canonical JSON form (keys
//! sorted at every depth, no whitespace) so reordering keys never changes
//! the result.

use serde::ser::Error as _;
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::models::Properties;

/// SHA-256 over `content ‖ canonical(properties) ‖ canonical(metadata)`,
/// as lower-case hex.
///
/// Fails only when a value cannot be represented as JSON, e.g. a nested
/// YAML mapping keyed by a sequence, or one whose keys `1` and `"1"` would
/// both become the JSON key `"1"`.
pub fn fingerprint(
    content: &str,
    properties: &Properties,
    metadata: &Properties,
) -> Result<String, serde_json::Error> {
    for value in properties.values().chain(metadata.values()) {
        reject_key_collisions(value)?;
    }
    let properties = canonical_bytes(properties)?;
    let metadata = canonical_bytes(metadata)?;

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(&properties);
    hasher.update(&metadata);
    Ok(hex::encode(hasher.finalize()))
}

/// Fail if two keys of any nested mapping turn into the same JSON key,
/// since JSON conversion would silently keep only one of them.
fn reject_key_collisions(value: &YamlValue) -> Result<(), serde_json::Error> {
    match value {
        YamlValue::Mapping(map) => {
            let mut seen = HashSet::new();
            for (key, value) in map {
                let key = json_key(key)?;
                if !seen.insert(key.clone()) {
                    return Err(serde_json::Error::custom(format!(
                        "mapping has more than one key reading as '{}'",
                        key
                    )));
                }
                reject_key_collisions(value)?;
            }
        }
        YamlValue::Sequence(values) => {
            for value in values {
                reject_key_collisions(value)?;
            }
        }
        YamlValue::Tagged(tagged) => reject_key_collisions(&tagged.value)?,
        _ => {}
    }
    Ok(())
}

/// The object key serde_json writes for a YAML mapping key.
fn json_key(key: &YamlValue) -> Result<String, serde_json::Error> {
    let mut single = serde_yaml::Mapping::new();
    single.insert(key.clone(), YamlValue::Null);
    let object = serde_json::to_value(&single)?;
    Ok(object
        .as_object()
        .and_then(|o| o.keys().next().cloned())
        .unwrap_or_default())
}

fn canonical_bytes(map: &Properties) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(map)?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(value, out)?;
            }
            out.push(b'}');
        }
        Value::Array(values) => {
            out.push(b'[');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(value, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
