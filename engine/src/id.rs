//! Record identifiers.
//!
//! Every record id is `<prefix><4 base-36 chars>` with an optional chain of
//! `.N` child segments, e.g. `inv-k3x9` or `inv-k3x9.2.1`. The prefix is
//! fixed per stash; the hierarchy is encoded textually, so parent/child
//! relationships are pure string arithmetic.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::Rng;

/// Alphabet used for the random portion of minted ids.
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Number of random characters appended to the prefix.
const MINT_LEN: usize = 4;

/// Validate a stash prefix: 2-4 lowercase ASCII letters followed by `-`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidPrefix {
        prefix: prefix.to_string(),
        reason: reason.to_string(),
    };

    if prefix.len() < 3 || prefix.len() > 5 {
        return Err(invalid("must be 3-5 characters long"));
    }
    if !prefix.ends_with('-') {
        return Err(invalid("must end with '-'"));
    }
    let letters = &prefix[..prefix.len() - 1];
    if !letters.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(invalid("must be lowercase ASCII letters before the '-'"));
    }
    Ok(())
}

/// Mint a new root id: prefix plus four random base-36 characters.
///
/// Randomness comes from the operating system. Collisions are possible in
/// a sufficiently large stash; callers that need uniqueness check the
/// cache and re-mint.
pub fn mint(prefix: &str) -> String {
    let mut rng = OsRng;
    let mut id = String::with_capacity(prefix.len() + MINT_LEN);
    id.push_str(prefix);
    for _ in 0..MINT_LEN {
        id.push(BASE36[rng.gen_range(0..BASE36.len())] as char);
    }
    id
}

/// Check that an id has the shape `<prefix><base36 x4>(.<digits>)*`.
pub fn validate_id(id: &str) -> Result<()> {
    let root = root_of(id);
    let dash = match root.find('-') {
        Some(i) => i,
        None => return Err(Error::InvalidId(id.to_string())),
    };
    let prefix = &root[..dash + 1];
    if validate_prefix(prefix).is_err() {
        return Err(Error::InvalidId(id.to_string()));
    }
    let rand_part = &root[dash + 1..];
    if rand_part.len() != MINT_LEN
        || !rand_part
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
    {
        return Err(Error::InvalidId(id.to_string()));
    }
    // Each child segment must be a non-empty run of digits.
    for seg in id[root.len()..].split('.').skip(1) {
        if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidId(id.to_string()));
        }
    }
    if id.len() > root.len() && !id[root.len()..].starts_with('.') {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Build the id of a child record: `parent.seq`.
pub fn child(parent: &str, seq: u64) -> String {
    format!("{}.{}", parent, seq)
}

/// The id before the last `.`, or `""` for a root id.
pub fn parent_of(id: &str) -> &str {
    match id.rfind('.') {
        Some(i) => &id[..i],
        None => "",
    }
}

/// The id before the first `.`, i.e. the top of the hierarchy.
pub fn root_of(id: &str) -> &str {
    match id.find('.') {
        Some(i) => &id[..i],
        None => id,
    }
}

/// Number of `.` separators, i.e. distance from the root.
pub fn depth(id: &str) -> usize {
    id.matches('.').count()
}

/// Whether `id` is a direct child of `parent`.
pub fn is_child_of(id: &str, parent: &str) -> bool {
    parent_of(id) == parent
}

/// Whether `id` sits anywhere below `ancestor`.
pub fn is_descendant_of(id: &str, ancestor: &str) -> bool {
    id != ancestor && id.starts_with(&format!("{}.", ancestor))
}
