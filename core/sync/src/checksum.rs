//! Content hashing for change detection.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Hash document text for change detection.
///
/// A leading byte-order mark is ignored and CRLF/CR line endings are hashed
/// as LF, so the same text saved by different editors hashes identically.
/// Not a security primitive.
pub fn content_hash(content: &str) -> String {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut hasher = Blake2b::<U32>::new();
    let mut rest = content;
    while let Some(pos) = rest.find('\r') {
        hasher.update(rest[..pos].as_bytes());
        hasher.update(b"\n");
        rest = &rest[pos + 1..];
        if let Some(stripped) = rest.strip_prefix('\n') {
            rest = stripped;
        }
    }
    hasher.update(rest.as_bytes());

    hex::encode(hasher.finalize())
}
