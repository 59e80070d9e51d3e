//! Logging helpers that keep rule aliases, node aliases and notification text on one line.

/// Longest preview written to the log for a single user-supplied value.
const MAX_PREVIEW: usize = 160;

/// Escape a string for single-line logging.
///
/// Newlines, carriage returns, tabs and backslashes are escaped, other control
/// characters become `\xNN`, and anything past [`MAX_PREVIEW`] characters is cut
/// with an ellipsis.
pub fn escape_log(s: &str) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Last four characters of a node id (`!433c1f6c` -> `1f6c`), the short form used in
/// log lines and as the fallback node alias.
pub fn short_node(node_id: &str) -> &str {
    let count = node_id.chars().count();
    if count <= 4 {
        return node_id;
    }
    let skip = count - 4;
    match node_id.char_indices().nth(skip) {
        Some((idx, _)) => &node_id[idx..],
        None => node_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_log("Hot\nin\there"), "Hot\\nin\\there");
        assert_eq!(escape_log("bell\u{7}"), "bell\\x07");
    }

    #[test]
    fn truncates_long_text() {
        let long = "x".repeat(MAX_PREVIEW + 20);
        let esc = escape_log(&long);
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), MAX_PREVIEW + 1);
    }

    #[test]
    fn short_node_takes_suffix() {
        assert_eq!(short_node("!433c1f6c"), "1f6c");
        assert_eq!(short_node("abc"), "abc");
        assert_eq!(short_node(""), "");
    }
}
