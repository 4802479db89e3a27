//! Binary-safe byte buffer helpers standing in for the spec's growable
//! string (§4.1). Plain `Vec<u8>` already carries explicit length and grows
//! geometrically; what's worth a shared helper module is the handful of
//! operations the engine needs that `Vec<u8>`/`[u8]` don't hand you for
//! free and that must stay binary-safe (no assumptions about embedded NUL
//! or UTF-8 validity).

/// Inclusive-range substring with Redis-style negative indexing: negative
/// indices count from the end, `start > end` or `start` past the end
/// yields an empty slice.
pub fn substr(data: &[u8], start: i64, end: i64) -> &[u8] {
    let len = data.len() as i64;
    let norm = |i: i64| -> i64 {
        if i < 0 { (len + i).max(0) } else { i }
    };
    let s = norm(start);
    let e = norm(end).min(len - 1);
    if len == 0 || s > e || s >= len {
        return &[];
    }
    &data[s as usize..=(e as usize)]
}

/// memcmp-style compare: common prefix first, then length, matching the
/// spec's growable-string compare contract.
pub fn compare(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        std::cmp::Ordering::Equal => a.len().cmp(&b.len()),
        other => other,
    }
}

/// Trims bytes present in `cutset` off both ends, binary-safe.
pub fn trim<'a>(data: &'a [u8], cutset: &[u8]) -> &'a [u8] {
    let mut start = 0;
    let mut end = data.len();
    while start < end && cutset.contains(&data[start]) {
        start += 1;
    }
    while end > start && cutset.contains(&data[end - 1]) {
        end -= 1;
    }
    &data[start..end]
}

/// Splits on a single-byte separator, binary-safe (no escaping, unlike the
/// inline protocol's tokenizer in `protocol::split_inline`).
pub fn split(data: &[u8], sep: u8) -> Vec<&[u8]> {
    data.split(|b| *b == sep).collect()
}

/// Parses the ASCII-decimal encoding of a signed 64-bit integer if `data`
/// round-trips exactly — used both for the INT string encoding (§3) and for
/// INCR/DECR's integer parse requirement.
pub fn parse_i64_strict(data: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(data).ok()?;
    let v: i64 = s.parse().ok()?;
    if v.to_string().as_bytes() == data { Some(v) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substr_negative_indices_cover_full_value() {
        assert_eq!(substr(b"Hello World", 0, -1), b"Hello World");
        assert_eq!(substr(b"Hello World", -5, -1), b"World");
        assert_eq!(substr(b"Hello World", 20, 30), b"");
    }

    #[test]
    fn strict_int_parse_rejects_non_canonical_forms() {
        assert_eq!(parse_i64_strict(b"123"), Some(123));
        assert_eq!(parse_i64_strict(b"+123"), None);
        assert_eq!(parse_i64_strict(b"0123"), None);
        assert_eq!(parse_i64_strict(b" 123"), None);
        assert_eq!(parse_i64_strict(b"abc"), None);
    }

    #[test]
    fn compare_uses_common_prefix_then_length() {
        assert_eq!(compare(b"ab", b"abc"), std::cmp::Ordering::Less);
        assert_eq!(compare(b"abc", b"abd"), std::cmp::Ordering::Less);
        assert_eq!(compare(b"abc", b"abc"), std::cmp::Ordering::Equal);
    }
}
