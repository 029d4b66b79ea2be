//! Quoting untrusted text for `sh -c` command lines.

/// Escape `text` for use inside a single-quoted shell argument.
///
/// Each `'` becomes `'\''`: close the quote, emit an escaped quote, reopen.
/// The caller supplies the surrounding quotes; see [`quote`].
pub fn escape_single_quoted(text: &str) -> String {
    text.replace('\'', r"'\''")
}

/// Wrap `text` as a complete single-quoted shell word.
pub fn quote(text: &str) -> String {
    format!("'{}'", escape_single_quoted(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal POSIX word parser covering single quotes and backslash escapes
    /// outside quotes, enough to invert `quote`.
    fn unquote(word: &str) -> String {
        let mut out = String::new();
        let mut chars = word.chars();
        let mut in_single = false;
        while let Some(c) = chars.next() {
            match c {
                '\'' => in_single = !in_single,
                '\\' if !in_single => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                _ => out.push(c),
            }
        }
        out
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(escape_single_quoted("hello world"), "hello world");
    }

    #[test]
    fn single_quote_is_closed_and_reopened() {
        assert_eq!(escape_single_quoted("it's"), r"it'\''s");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn other_metacharacters_stay_literal() {
        let text = r#"$HOME `id` "double" \n; rm -rf / && echo $(whoami)"#;
        assert_eq!(escape_single_quoted(text), text);
    }

    #[test]
    fn quote_round_trips() {
        for text in [
            "",
            "'",
            "''",
            "don't stop",
            "line one\nline 'two'\n",
            r"back\slash and 'quote'",
            "unicode ✓ 'ok'",
        ] {
            assert_eq!(unquote(&quote(text)), text, "round trip failed for {text:?}");
        }
    }
}
