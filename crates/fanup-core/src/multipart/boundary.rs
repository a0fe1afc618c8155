//! Deterministic boundary selection.
//!
//! The boundary is derived from a SHA-256 over a nonce and the parts being
//! encoded. Candidates are tried in nonce order until one occurs nowhere in
//! the part contents, names or filenames.

use sha2::{Digest, Sha256};

use crate::payload::UploadPart;

/// Boundary length in hex characters (30 digest bytes), well under RFC 2046's 70.
pub const BOUNDARY_LEN: usize = 60;

/// Choose the first safe boundary for `parts`, where `contents[i]` holds the
/// bytes of `parts[i]`.
pub(super) fn choose(parts: &[UploadPart], contents: &[&[u8]]) -> String {
    let mut nonce = 0u64;
    loop {
        let candidate = derive(parts, contents, nonce);
        if is_safe(&candidate, parts, contents) {
            return candidate;
        }
        nonce = nonce.wrapping_add(1);
    }
}

fn derive(parts: &[UploadPart], contents: &[&[u8]], nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.to_le_bytes());
    for (part, data) in parts.iter().zip(contents) {
        hasher.update(part.name.as_bytes());
        hasher.update([0]);
        if let Some(filename) = &part.filename {
            hasher.update(filename.as_bytes());
        }
        hasher.update([0]);
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..BOUNDARY_LEN / 2])
}

fn is_safe(candidate: &str, parts: &[UploadPart], contents: &[&[u8]]) -> bool {
    let needle = candidate.as_bytes();
    !contents.iter().any(|c| contains(c, needle))
        && !parts.iter().any(|p| {
            contains(p.name.as_bytes(), needle)
                || p.filename
                    .as_deref()
                    .is_some_and(|f| contains(f.as_bytes(), needle))
        })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
