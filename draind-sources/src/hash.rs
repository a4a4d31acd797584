//! Deterministic `EventID` derivation (spec §4.1, "Deduplication at the
//! source level"): the same underlying notification must always hash to the
//! same id so the Store's unique-key invariant is sufficient for dedup.

use sha2::{Digest, Sha256};

/// Hash `parts` (joined with `|`) into a stable hex-encoded id, prefixed
/// with `tag` so ids from different sources never collide even on
/// coincidentally identical payloads.
#[must_use]
pub fn stable_event_id(tag: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    for part in parts {
        hasher.update(b"|");
        hasher.update(part.as_bytes());
    }
    format!("{tag}-{:x}", hasher.finalize())
}
