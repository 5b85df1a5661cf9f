//! Glob patterns for classifying changed paths.
//!
//! Patterns are compiled once, at configuration load, with the `glob` crate:
//!
//! - `*` matches any run of characters within one path segment
//! - `?` matches a single character within one path segment
//! - `[abc]` and `[!abc]` match one character from (or outside) a set
//! - `**` as a whole segment matches zero or more segments
//! - a trailing `/` is shorthand for `/**`
//! - a pattern without `/` is matched against the last segment only
//!
//! Matching is case-sensitive.

use glob::{MatchOptions, Pattern};
use thiserror::Error;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,
    #[error("pattern '{0}' must be relative (no leading '/')")]
    Absolute(String),
    #[error("pattern '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("pattern '{0}' uses '**' inside a segment; '**' must be a whole segment")]
    PartialRecursive(String),
    #[error("pattern '{pattern}' is not a valid glob: {message}")]
    Invalid { pattern: String, message: String },
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    basename_only: bool,
    compiled: Pattern,
}

impl GlobPattern {
    /// Compile a pattern, rejecting malformed input.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if pattern.starts_with('/') {
            return Err(PatternError::Absolute(pattern.to_string()));
        }

        let body = pattern.strip_suffix('/').unwrap_or(pattern);
        for segment in body.split('/') {
            if segment.is_empty() {
                return Err(PatternError::EmptySegment(pattern.to_string()));
            }
            if segment != "**" && segment.contains("**") {
                return Err(PatternError::PartialRecursive(pattern.to_string()));
            }
        }

        let expanded = if pattern.ends_with('/') {
            format!("{}**", pattern)
        } else {
            pattern.to_string()
        };
        let compiled = Pattern::new(&expanded).map_err(|e| PatternError::Invalid {
            pattern: pattern.to_string(),
            message: e.msg.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            basename_only: !pattern.contains('/'),
            compiled,
        })
    }

    /// The pattern as written in configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test a changed path against this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let candidate = if self.basename_only {
            path.rsplit('/').next().unwrap_or(path)
        } else {
            path
        };
        self.compiled.matches_with(candidate, MATCH_OPTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        GlobPattern::new(pattern).unwrap().matches(path)
    }

    #[test]
    fn test_extension_matches_any_depth() {
        assert!(matches("*.py", "service/handler.py"));
        assert!(matches("*.py", "setup.py"));
        assert!(!matches("*.py", "service/handler.pyc"));
    }

    #[test]
    fn test_anchored_single_star_stays_in_segment() {
        assert!(matches("web/*.ts", "web/app.ts"));
        assert!(!matches("web/*.ts", "web/components/app.ts"));
    }

    #[test]
    fn test_recursive_segment() {
        assert!(matches("docs/**", "docs/guide/intro.md"));
        assert!(matches("docs/**", "docs/index.md"));
        assert!(matches("web/**/*.tsx", "web/App.tsx"));
        assert!(matches("web/**/*.tsx", "web/a/b/App.tsx"));
        assert!(!matches("docs/**", "src/docs/x.md"));
    }

    #[test]
    fn test_literal_and_case_sensitive() {
        assert!(matches("Cargo.lock", "crates/x/Cargo.lock"));
        assert!(!matches("cargo.lock", "Cargo.lock"));
        assert!(matches("a+b/c.txt", "a+b/c.txt"));
    }

    #[test]
    fn test_trailing_slash_is_recursive() {
        assert!(matches("infra/", "infra/terraform/main.tf"));
    }

    #[test]
    fn test_character_class() {
        assert!(matches("src/[ab].rs", "src/a.rs"));
        assert!(!matches("src/[ab].rs", "src/c.rs"));
        assert!(matches("src/[!ab].rs", "src/c.rs"));
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        assert_eq!(GlobPattern::new("").unwrap_err(), PatternError::Empty);
        assert!(matches!(
            GlobPattern::new("/abs/*.rs"),
            Err(PatternError::Absolute(_))
        ));
        assert!(matches!(
            GlobPattern::new("src//x"),
            Err(PatternError::EmptySegment(_))
        ));
        assert!(matches!(
            GlobPattern::new("src/a**b"),
            Err(PatternError::PartialRecursive(_))
        ));
        assert!(matches!(
            GlobPattern::new("src/[ab.rs"),
            Err(PatternError::Invalid { .. })
        ));
    }
}
