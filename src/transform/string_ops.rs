use std::borrow::Cow;

use sha2::{Digest, Sha256};

/// Returns at most `count` leading characters, staying on UTF-8 boundaries.
pub fn prefix_chars(value: &str, count: usize) -> Cow<'_, str> {
    match value.char_indices().nth(count) {
        Some((byte_idx, _)) => Cow::Borrowed(&value[..byte_idx]),
        None => Cow::Borrowed(value),
    }
}

/// Keeps a short prefix and appends `mask`, so the output never reveals the
/// original length.
pub fn mask_after(value: &str, keep: usize, mask: &str) -> String {
    let prefix = prefix_chars(value, keep);
    let mut masked = String::with_capacity(prefix.len() + mask.len());
    masked.push_str(&prefix);
    masked.push_str(mask);
    masked
}

/// Lower-case hex SHA-256 of `input`, cut to `length` characters.
pub fn sha256_prefix(input: &str, length: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    prefix_chars(&digest, length).into_owned()
}

/// Returns the `YYYY-MM` portion of an ISO date or date-time.
pub fn year_month(value: &str) -> Option<&str> {
    let bytes = value.as_bytes();
    let shaped = bytes.len() >= 7
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit);
    shaped.then(|| &value[..7])
}
