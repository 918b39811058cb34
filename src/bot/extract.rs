//! First-match-wins extraction over line-oriented tool output.

use regex::Regex;

/// Pulls a value out of a single line of text.
pub trait Extractor {
    type Output;

    fn extract(&self, line: &str) -> Option<Self::Output>;
}

/// A regex extracts its first capture group, trimmed.
impl Extractor for Regex {
    type Output = String;

    fn extract(&self, line: &str) -> Option<String> {
        self.captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}

/// Scan `text` line by line; on each line try every extractor in order.
/// The first hit wins.
pub fn first_match<E: Extractor>(text: &str, extractors: &[E]) -> Option<E::Output> {
    text.lines()
        .find_map(|line| extractors.iter().find_map(|e| e.extract(line)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Prefix(&'static str);

    impl Extractor for Prefix {
        type Output = usize;

        fn extract(&self, line: &str) -> Option<usize> {
            line.strip_prefix(self.0).map(str::len)
        }
    }

    #[test]
    fn test_earlier_line_wins_over_earlier_extractor() {
        let extractors = [
            Regex::new(r"^B: (.*)").unwrap(),
            Regex::new(r"^A: (.*)").unwrap(),
        ];
        let text = "noise\nA: first\nB: second\n";
        assert_eq!(first_match(text, &extractors).as_deref(), Some("first"));
    }

    #[test]
    fn test_extractor_order_within_a_line() {
        let extractors = [
            Regex::new(r"file=(\S+)").unwrap(),
            Regex::new(r"(.*)").unwrap(),
        ];
        assert_eq!(first_match("x file=a.m4a", &extractors).as_deref(), Some("a.m4a"));
    }

    #[test]
    fn test_no_match() {
        let extractors = [Regex::new(r"^nothing (.*)").unwrap()];
        assert_eq!(first_match("a\nb", &extractors), None);
        assert_eq!(first_match("", &extractors), None);
    }

    #[test]
    fn test_custom_extractor() {
        let extractors = [Prefix("len:"), Prefix("size:")];
        assert_eq!(first_match("size:abc\nlen:a", &extractors), Some(3));
    }
}
