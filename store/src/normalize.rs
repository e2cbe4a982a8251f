//! Text normalization used for both content hashing and FTS indexing.

use sha2::{Digest, Sha256};

/// Lowercase-folds, collapses line endings to `\n`, replaces NBSP/BOM with an
/// ordinary space, and trims leading/trailing whitespace.
///
/// This is the single definition of "the same content" for dedup purposes:
/// `hash(t) == hash(normalize(t))` for any `t`.
pub fn normalize_text(input: &str) -> String {
    let mut collapsed = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                collapsed.push('\n');
            }
            '\u{2028}' | '\u{2029}' | '\u{0085}' => collapsed.push('\n'),
            '\u{00A0}' => collapsed.push(' '),
            '\u{FEFF}' => {}
            other => collapsed.push(other),
        }
    }

    collapsed.to_lowercase().trim().to_string()
}

/// SHA-256 of the normalized text representation, as a lowercase hex string.
pub fn hash_text(plain_text: &str) -> String {
    let normalized = normalize_text(plain_text);
    hash_bytes(normalized.as_bytes())
}

/// SHA-256 of raw bytes (used for image/file content types), as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}
