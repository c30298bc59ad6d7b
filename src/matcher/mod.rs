//! Pluggable scanners that pull artifacts of interest out of backend text.

use anyhow::Result;
use regex::Regex;
use std::ops::Range;

/// Characters of surrounding text kept with each match.
pub const CONTEXT_RADIUS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub value: String,
    pub span: Range<usize>,
}

/// Stateless scanner. Results are ordered by position in `text`.
pub trait PatternMatcher: Send + Sync {
    fn find_matches(&self, text: &str) -> Vec<PatternMatch>;
}

impl<F> PatternMatcher for F
where
    F: Fn(&str) -> Vec<PatternMatch> + Send + Sync,
{
    fn find_matches(&self, text: &str) -> Vec<PatternMatch> {
        self(text)
    }
}

pub struct RegexMatcher {
    patterns: Vec<Regex>,
}

impl RegexMatcher {
    pub const DEFAULT_PATTERNS: [&'static str; 2] = [r"(?i)flag\{[^}\s]+\}", r"(?i)ctf\{[^}\s]+\}"];

    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for RegexMatcher {
    fn default() -> Self {
        Self {
            patterns: Self::DEFAULT_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl PatternMatcher for RegexMatcher {
    fn find_matches(&self, text: &str) -> Vec<PatternMatch> {
        let mut found: Vec<PatternMatch> = self
            .patterns
            .iter()
            .flat_map(|re| re.find_iter(text))
            .map(|m| PatternMatch {
                value: m.as_str().to_string(),
                span: m.range(),
            })
            .collect();

        found.sort_by_key(|m| (m.span.start, m.span.end));
        // Overlapping patterns may report the same span twice.
        found.dedup_by(|a, b| a.span == b.span);
        found
    }
}

/// Returns the text within `radius` characters of `span`, clamped to the
/// string and to char boundaries. A span edge inside a multi-byte character
/// is widened to cover the whole character.
pub fn extract_context(text: &str, span: &Range<usize>, radius: usize) -> String {
    let mut start = span.start.min(text.len());
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = span.end.clamp(start, text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }

    let before = text[..start]
        .char_indices()
        .rev()
        .nth(radius.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    let before = if radius == 0 { start } else { before };

    let after = text[end..]
        .char_indices()
        .nth(radius)
        .map_or(text.len(), |(i, _)| end + i);

    text[before..after].to_string()
}
