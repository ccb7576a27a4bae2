//! The one piece of parsing logic shared between the line-oriented field
//! parser ([`crate::parser`]) and the streaming data reader
//! ([`crate::line`]): splitting a raw line into an SSE field name/value
//! pair.

/// Splits a non-empty, non-comment line into `(field, value)` per the SSE
/// field algorithm: the field name is everything before the first `:`
/// (the whole line if there is none), and the value is everything after,
/// with exactly one leading space stripped if present.
pub(crate) fn split_field(line: &str) -> (&str, &str) {
    match line.find(':') {
        None => (line, ""),
        Some(idx) => {
            let field = &line[..idx];
            let value = &line[idx + 1..];
            (field, value.strip_prefix(' ').unwrap_or(value))
        }
    }
}
