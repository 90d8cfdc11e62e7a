//! Topic pattern compilation and matching (§4.2).
//!
//! Grounded on `llmspell-events::pattern::EventPattern`/`PatternMatcher`
//! for the compile-then-match shape, but the matching algorithm itself is
//! new: the teacher only supports a single trailing `*`, while this
//! module implements literal / `*` (single-segment) / `**`
//! (multi-segment, final-only) matching as spec.md §4.2 requires.

use std::fmt;

use crate::error::PatternError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Segment {
    Literal(String),
    Single,
    Multi,
}

fn is_literal_segment(seg: &str) -> bool {
    !seg.is_empty()
        && seg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A compiled, immutable topic pattern (§4.2 "Matchers are immutable
/// after compile").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    source: String,
    pub(crate) segments: Vec<Segment>,
}

impl Pattern {
    /// Compile a raw pattern string.
    ///
    /// # Errors
    /// Returns [`PatternError`] if the pattern is empty, contains an
    /// invalid segment, or uses `**` anywhere but the final segment.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let raw_segments: Vec<&str> = pattern.split('.').collect();
        let mut segments = Vec::with_capacity(raw_segments.len());

        for (idx, raw) in raw_segments.iter().enumerate() {
            let is_last = idx + 1 == raw_segments.len();
            let segment = match *raw {
                "**" => {
                    if !is_last {
                        return Err(PatternError::MultiWildcardNotFinal);
                    }
                    Segment::Multi
                }
                "*" => Segment::Single,
                lit if is_literal_segment(lit) => Segment::Literal(lit.to_string()),
                other => return Err(PatternError::InvalidSegment(other.to_string())),
            };
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// The original pattern text this was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test whether `topic` matches this pattern (§4.2, §8 item 5
    /// determinism).
    ///
    /// `**` never matches zero segments in an otherwise-empty pattern
    /// equal to a root topic unless the pattern is exactly `**`
    /// (enforced implicitly: a bare `**` pattern is the single-segment
    /// case below).
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let topic_segments: Vec<&str> = topic.split('.').collect();
        matches_segments(&self.segments, &topic_segments)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

pub(crate) fn matches_segments(pattern: &[Segment], topic: &[&str]) -> bool {
    match (pattern.first(), topic.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(Segment::Multi), _) => true,
        (Some(Segment::Literal(lit)), Some(t)) => {
            lit == t && matches_segments(&pattern[1..], &topic[1..])
        }
        (Some(Segment::Single), Some(_)) => matches_segments(&pattern[1..], &topic[1..]),
        (Some(_), None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matches_identical_literal() {
        let p = Pattern::compile("weather.alert.severe").unwrap();
        assert!(p.matches("weather.alert.severe"));
        assert!(!p.matches("weather.alert.minor"));
    }

    #[test]
    fn single_wildcard_matches_one_segment() {
        let p = Pattern::compile("weather.*").unwrap();
        assert!(p.matches("weather.alert"));
        assert!(!p.matches("weather.alert.severe"));
        assert!(!p.matches("weather"));
    }

    #[test]
    fn multi_wildcard_matches_zero_or_more_trailing_segments() {
        let p = Pattern::compile("weather.**").unwrap();
        assert!(p.matches("weather"));
        assert!(p.matches("weather.alert"));
        assert!(p.matches("weather.alert.severe"));
    }

    #[test]
    fn bare_multi_wildcard_matches_any_topic_including_root() {
        let p = Pattern::compile("**").unwrap();
        assert!(p.matches("a"));
        assert!(p.matches("a.b.c"));
    }

    #[test]
    fn rejects_non_final_multi_wildcard() {
        assert_eq!(
            Pattern::compile("a.**.b").unwrap_err(),
            PatternError::MultiWildcardNotFinal
        );
    }

    #[test]
    fn rejects_empty_pattern() {
        assert_eq!(Pattern::compile("").unwrap_err(), PatternError::Empty);
    }

    #[test]
    fn s1_wildcard_routing_scenario() {
        let multi = Pattern::compile("weather.**").unwrap();
        let single = Pattern::compile("weather.*").unwrap();
        let literal = Pattern::compile("weather.alert.severe").unwrap();

        assert!(multi.matches("weather.alert.severe"));
        assert!(!single.matches("weather.alert.severe"));
        assert!(literal.matches("weather.alert.severe"));
    }

    proptest::proptest! {
        #[test]
        fn matching_is_deterministic(pattern in "[a-z]{1,4}(\\.[a-z*]{1,4}){0,3}", topic in "[a-z]{1,4}(\\.[a-z]{1,4}){0,3}") {
            if let Ok(compiled) = Pattern::compile(&pattern) {
                let first = compiled.matches(&topic);
                let second = compiled.matches(&topic);
                proptest::prop_assert_eq!(first, second);
            }
        }
    }
}
