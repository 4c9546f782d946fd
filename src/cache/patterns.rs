//! Include/exclude URI patterns.
//!
//! A pattern is a regular expression body matched anywhere in the URI (no implicit
//! anchoring), so `blog` matches `blog/post-1`. Two spellings are special: the empty
//! pattern matches only the homepage (optionally followed by a query string) and `*`
//! matches everything. Boundary slashes are insignificant on both sides.

use regex::Regex;
use tracing::warn;

const HOMEPAGE_PATTERN: &str = r"^(\?.*)?$";
const ANY_PATTERN: &str = ".*";

/// A compiled, ordered list of URI patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    /// Compile the patterns. A pattern that is not a valid regular expression is
    /// matched literally instead.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|pattern| compile_pattern(pattern.as_ref()))
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when any pattern matches the URI.
    pub fn matches(&self, uri: &str) -> bool {
        let uri = uri.trim_matches('/');
        self.patterns.iter().any(|pattern| pattern.is_match(uri))
    }
}

/// One-shot form of [`PatternSet::matches`].
pub fn matches_uri_patterns<S: AsRef<str>>(uri: &str, patterns: &[S]) -> bool {
    PatternSet::compile(patterns).matches(uri)
}

fn compile_pattern(raw: &str) -> Option<Regex> {
    let body = normalize(raw);
    match Regex::new(&body) {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!(
                target = "quire::cache::patterns",
                pattern = raw,
                error = %err,
                "invalid URI pattern; matching it literally"
            );
            Regex::new(&regex::escape(&body)).ok()
        }
    }
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    match trimmed {
        "" => HOMEPAGE_PATTERN.to_string(),
        "*" => ANY_PATTERN.to_string(),
        other => other.to_string(),
    }
}
