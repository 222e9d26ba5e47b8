/// Cap a string at roughly `max_bytes` bytes, appending "..." when
/// anything was cut. The cut point never lands inside a multi-byte
/// character: the end index backs up until the prefix is valid UTF-8 on
/// its own, so a capped excerpt is always safe to embed in JSON or logs.
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Collapse a multi-line string into a single line, squeezing runs of
/// whitespace. Used when embedding agent output into one-line summaries.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
