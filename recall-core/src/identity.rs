/// Card identity helpers.
///
/// A card is identified by a digest of its pages. Two digests are kept: one over
/// the pages as extracted and one with the boundary markers stripped, so a card
/// survives a change of the boundary level it was parsed at.
use regex::Regex;
use sha2::{Digest, Sha256};

/// Upper bound (exclusive) of the per-card jitter, in milliseconds.
pub const JITTER_SPAN_MS: i64 = 1000;

/// SHA-256 of the joined pages, first 16 bytes hex encoded.
pub fn checksum<S: AsRef<str>>(pages: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(page.as_ref().as_bytes());
    }
    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}

/// Remove every line-leading boundary marker matched by `marker`.
pub fn strip_markers(text: &str, marker: &Regex) -> String {
    marker.replace_all(text, "").into_owned()
}

/// Checksum over the pages with boundary markers stripped.
pub fn stripped_checksum<S: AsRef<str>>(pages: &[S], marker: &Regex) -> String {
    let stripped: Vec<String> = pages
        .iter()
        .map(|page| strip_markers(page.as_ref(), marker))
        .collect();
    checksum(&stripped)
}

/// Deterministic jitter in `[0, JITTER_SPAN_MS)` derived from a checksum.
/// Spreads cards due on the same day without making ordering irreproducible.
pub fn jitter_ms(checksum: &str) -> i64 {
    let head = checksum.get(..8).unwrap_or(checksum);
    match u32::from_str_radix(head, 16) {
        Ok(value) => (value as i64) % JITTER_SPAN_MS,
        Err(_) => {
            let hash = Sha256::digest(checksum.as_bytes());
            (u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]) as i64) % JITTER_SPAN_MS
        }
    }
}
