//! Resource classification
//!
//! Sorts resource types into write kinds (for config-only mode) and marks
//! the structure family (for rate categories).

use super::patterns::PatternMatcher;
use super::types::{Operation, WriteKind};
use crate::config::ResourceConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct ResourceClassifier {
    content: PatternMatcher,
    ops: PatternMatcher,
    structure: PatternMatcher,
}

impl ResourceClassifier {
    pub fn from_config(config: &ResourceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            content: PatternMatcher::new(&config.content)?,
            ops: PatternMatcher::new(&config.ops)?,
            structure: PatternMatcher::new(&config.structure)?,
        })
    }

    /// Write kind of a resource type; anything unrecognised is configuration
    pub fn write_kind(&self, resource_type: &str) -> WriteKind {
        if self.content.matches(resource_type) {
            WriteKind::Content
        } else if self.ops.matches(resource_type) {
            WriteKind::Ops
        } else {
            WriteKind::Config
        }
    }

    pub fn is_structural(&self, resource_type: &str) -> bool {
        self.structure.matches(resource_type)
    }

    /// Classify `action` against `resource_type`
    pub fn operation(&self, action: &str, resource_type: &str) -> Operation {
        Operation::classify(action, self.is_structural(resource_type))
    }
}
