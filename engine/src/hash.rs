//! Content hashing for records.
//!
//! The hash covers user fields only. Two records with the same user fields
//! always hash identically regardless of key order or any system metadata,
//! so the digest doubles as a cheap change detector during rebuilds.

use crate::FieldMap;
use sha2::{Digest, Sha256};

/// Number of digest bytes kept; hex-encoded this yields 12 characters.
const HASH_BYTES: usize = 6;

/// Compute the 12-hex-char content hash of a record's user fields.
///
/// Keys beginning with `_` are excluded, remaining keys are sorted by
/// Unicode code point, and each is emitted as `key:<canonical json>\n`
/// before hashing with SHA-256.
pub fn content_hash(fields: &FieldMap) -> String {
    let mut keys: Vec<&String> = fields.keys().filter(|k| !k.starts_with('_')).collect();
    keys.sort();

    let mut buf = Vec::new();
    for key in keys {
        buf.extend_from_slice(key.as_bytes());
        buf.push(b':');
        // serde_json emits minimal JSON; map keys serialize in sorted
        // order, so nested objects are canonical too.
        let value = &fields[key.as_str()];
        buf.extend_from_slice(
            serde_json::to_string(value)
                .expect("JSON value serialization cannot fail")
                .as_bytes(),
        );
        buf.push(b'\n');
    }

    let digest = Sha256::digest(&buf);
    hex::encode(&digest[..HASH_BYTES])
}
