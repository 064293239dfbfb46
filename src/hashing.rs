//! Hashing - Canonical JSON and Hook Digests
//!
//! Hook maps are fingerprinted so hosts can tell whether regenerated
//! start/end G-code actually changed.

use serde::Serialize;
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};
use std::io;

use crate::hooks::HookMap;

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    // `serde_json::Map` is ordered by key without `preserve_order`.
    serde_json::to_string(&serde_json::to_value(value)?)
}

/// Single-line JSON with `", "` and `": "` separators and sorted keys.
pub fn spaced_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let sorted = serde_json::to_value(value)?;
    let mut ser = serde_json::Serializer::with_formatter(Vec::new(), SpacedFormatter);
    sorted.serialize(&mut ser)?;
    String::from_utf8(ser.into_inner()).map_err(<serde_json::Error as serde::ser::Error>::custom)
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Digest of a hook map: `sha256(firmware + ":" + canonical(hooks) + ":" + engine)`.
pub fn hook_digest(firmware: &str, hooks: &HookMap, engine_version: &str) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(hooks)?;
    let combined = format!("{}:{}:{}", firmware, canonical, engine_version);
    Ok(sha256_hex(combined.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": {"y": [2, {"c": 1, "b": 0}], "x": null}});
        assert_eq!(canonical_json(&obj).unwrap(), r#"{"a":{"x":null,"y":[2,{"b":0,"c":1}]},"z":1}"#);
    }

    #[test]
    fn test_spaced_json_separators() {
        let obj = json!({"url": "https://example.com/printer", "id": "abc123", "tags": [1, {"b": [], "a": {}}]});
        assert_eq!(
            spaced_json(&obj).unwrap(),
            r#"{"id": "abc123", "tags": [1, {"a": {}, "b": []}], "url": "https://example.com/printer"}"#
        );
        assert_eq!(spaced_json(&json!("x")).unwrap(), r#""x""#);
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(sha256_hex(b"abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn test_hook_digest_sensitivity() {
        let mut hooks = HookMap::new();
        hooks.insert("start".into(), vec!["G28".into(), "M80".into()]);
        let a = hook_digest("marlin", &hooks, "1.0.0").unwrap();
        assert_eq!(a, hook_digest("marlin", &hooks.clone(), "1.0.0").unwrap());
        assert_ne!(a, hook_digest("klipper", &hooks, "1.0.0").unwrap());

        hooks.insert("start".into(), vec!["M80".into(), "G28".into()]);
        assert_ne!(a, hook_digest("marlin", &hooks, "1.0.0").unwrap());
    }
}
