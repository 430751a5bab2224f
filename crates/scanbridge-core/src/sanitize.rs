//! Format-safe text for host sinks
//!
//! The host's log and header primitives run their text through
//! printf-style formatting, so every `%` coming from a script has to be
//! doubled before it gets there.

use std::borrow::Cow;

/// Escape `%` as `%%` and optionally make sure the text ends with `\n`.
///
/// Text that needs neither change is returned as-is without allocating.
pub fn sanitize(text: &str, ensure_trailing_newline: bool) -> Cow<'_, str> {
    let percent_count = text.bytes().filter(|&b| b == b'%').count();
    let add_newline = ensure_trailing_newline && !text.ends_with('\n');

    if percent_count == 0 && !add_newline {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + percent_count + usize::from(add_newline));
    for c in text.chars() {
        escaped.push(c);
        if c == '%' {
            escaped.push('%');
        }
    }

    if add_newline {
        escaped.push('\n');
    }

    Cow::Owned(escaped)
}
