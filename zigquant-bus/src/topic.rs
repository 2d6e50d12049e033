//! Dot-separated topic strings and their wildcard grammar (spec §4.A).
//!
//! `*` matches exactly one segment; `#` matches zero-or-more trailing
//! segments and is only meaningful as the final segment of a pattern.

use std::fmt;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Matches a concrete topic against a subscription pattern.
    ///
    /// Consistent with the documented grammar:
    /// - A literal segment must match exactly.
    /// - `*` matches exactly one segment.
    /// - `#` matches zero-or-more trailing segments and terminates matching.
    pub fn matches(&self, pattern: &Topic) -> bool {
        let mut topic_segments = self.segments();
        let mut pattern_segments = pattern.segments();

        loop {
            match (topic_segments.next(), pattern_segments.next()) {
                (_, Some("#")) => return true,
                (Some(_), Some("*")) => continue,
                (Some(t), Some(p)) => {
                    if t != p {
                        return false;
                    }
                }
                (None, None) => return true,
                (None, Some(_)) | (Some(_), None) => return false,
            }
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Topic::new(value)
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Topic::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let t = Topic::new("order.filled");
        let p = Topic::new("order.filled");
        assert!(t.matches(&p));
    }

    #[test]
    fn single_segment_wildcard() {
        let p = Topic::new("market_data.*");
        assert!(Topic::new("market_data.BTC-USDT").matches(&p));
        assert!(!Topic::new("market_data.BTC-USDT.trade").matches(&p));
    }

    #[test]
    fn hash_matches_zero_or_more_trailing_segments() {
        let p = Topic::new("order.#");
        assert!(Topic::new("order").matches(&p)); // '#' matches zero trailing segments
        assert!(Topic::new("order.filled").matches(&p));
        assert!(Topic::new("order.filled.btc").matches(&p));
        assert!(!Topic::new("orders").matches(&p)); // literal prefix must still match exactly
    }

    #[test]
    fn bare_hash_matches_everything() {
        let p = Topic::new("#");
        assert!(Topic::new("anything.at.all").matches(&p));
        assert!(Topic::new("x").matches(&p));
    }

    #[test]
    fn matching_is_idempotent() {
        let t = Topic::new("position.updated");
        let p = Topic::new("position.*");
        assert_eq!(t.matches(&p), t.matches(&p));
    }

    #[test]
    fn no_match_on_wrong_literal() {
        let t = Topic::new("account.balance");
        let p = Topic::new("order.*");
        assert!(!t.matches(&p));
    }
}
