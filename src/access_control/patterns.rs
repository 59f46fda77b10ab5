//! Pattern matching for resource classification
//!
//! Case-insensitive regex sets used to sort resource types into families.

use crate::error::ConfigError;
use regex::{Regex, RegexBuilder};

/// Compiled pattern matcher
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    patterns: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Compile one pattern the way every matcher in the crate does
pub(crate) fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

impl PatternMatcher {
    /// Create a new pattern matcher from a list of regex patterns
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|source| {
                Ok(CompiledPattern {
                    source: source.clone(),
                    regex: compile(source)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { patterns })
    }

    /// Create an empty pattern matcher (matches nothing)
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.patterns.iter().any(|p| p.regex.is_match(subject))
    }

    /// Return the source of the first pattern matching `subject`
    pub fn find_match(&self, subject: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(subject))
            .map(|p| p.source.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::empty()
    }
}
