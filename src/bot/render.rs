//! Text shaping for Telegram: chunking, HTML escaping, bold markup.

use std::sync::LazyLock;

use regex::Regex;

static BRACKETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]").expect("valid bracket regex"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Telegram's hard limit on message length.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Split `text` into chunks of at most `limit` characters.
///
/// Lines are kept whole where possible. A line longer than `limit` is
/// hard-split at the limit. Trailing whitespace is trimmed from each chunk.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let len = line.chars().count();
        if current_len + len > limit && !current.is_empty() {
            chunks.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        if len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                let piece: String = piece.iter().collect();
                chunks.push(piece.trim_end().to_string());
            }
            continue;
        }
        current.push_str(line);
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks
}

/// Escape a string for Telegram's HTML parse mode.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape for use inside an HTML attribute value.
pub fn html_escape_attr(s: &str) -> String {
    html_escape(s).replace('\'', "&#39;").replace('"', "&quot;")
}

/// Rewrite `[token]` markers as bold tags. Unpaired brackets stay literal,
/// so the tags always balance.
pub fn bold_brackets(s: &str) -> String {
    BRACKETED_RE.replace_all(s, "<b>$1</b>").into_owned()
}

/// Plain-text rendering of Telegram HTML: tags dropped, entities decoded.
pub fn strip_html(s: &str) -> String {
    TAG_RE
        .replace_all(s, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Shorten for log lines, respecting char boundaries.
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_paragraph_hard_split() {
        let text = "a".repeat(9000);
        let chunks = split_message(&text, TELEGRAM_MESSAGE_LIMIT);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 4096);
        assert_eq!(chunks[2].len(), 9000 - 2 * 4096);
        assert!(chunks.iter().all(|c| c.chars().count() <= TELEGRAM_MESSAGE_LIMIT));
    }

    #[test]
    fn test_short_text_single_chunk() {
        assert_eq!(split_message("hello\nworld\n", 4096), vec!["hello\nworld"]);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn test_splits_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc\n";
        // Each line is 5 chars with its newline; two fit in 10.
        assert_eq!(split_message(text, 10), vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_long_line_between_short_ones() {
        let text = format!("ab\n{}\ncd", "x".repeat(12));
        let chunks = split_message(&text, 5);
        assert_eq!(chunks, vec!["ab", "xxxxx", "xxxxx", "xx", "cd"]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "é".repeat(6);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks, vec!["éééé", "éé"]);
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        let chunks = split_message("abc   \n\n", 100);
        assert_eq!(chunks, vec!["abc"]);
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("hello"), "hello");
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
        assert_eq!(html_escape_attr("it's \"x\""), "it&#39;s &quot;x&quot;");
    }

    #[test]
    fn test_bold_brackets() {
        assert_eq!(
            bold_brackets("[Mon] up [120]\n"),
            "<b>Mon</b> up <b>120</b>\n"
        );
    }

    #[test]
    fn test_bold_brackets_unpaired_stay_literal() {
        let out = bold_brackets("[Mon] buy now [SALE [10]");
        assert_eq!(out, "<b>Mon</b> buy now [SALE <b>10</b>");
        assert_eq!(out.matches("<b>").count(), out.matches("</b>").count());

        assert_eq!(bold_brackets("a ] b [ c"), "a ] b [ c");
        assert_eq!(bold_brackets("[]"), "<b></b>");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<b>Mon</b> up &amp; away <a href='x'>link</a> &lt;3"),
            "Mon up & away link <3"
        );
        assert_eq!(strip_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello world", 5), "hello...");
        assert_eq!(preview("ééé", 2), "éé...");
    }
}
