//! Declarative validation tables
//!
//! A table is an ordered list of `pattern -> verdict` rules plus a default
//! verdict. Evaluation is pure: the first rule whose pattern matches the
//! value decides, otherwise the default applies.

use super::patterns::compile;
use crate::config::{PolicyRuleConfig, PolicyTableConfig};
use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Outcome of a single rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Allow,
    Deny,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => f.write_str("allow"),
            Verdict::Deny => f.write_str("deny"),
        }
    }
}

#[derive(Debug, Clone)]
struct PolicyRule {
    source: String,
    regex: Regex,
    verdict: Verdict,
}

/// One compiled table
#[derive(Debug, Clone)]
pub struct PolicyTable {
    name: String,
    rules: Vec<PolicyRule>,
    default: Verdict,
}

/// Verdict plus the rule that produced it (`None` when the default applied)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyOutcome {
    pub verdict: Verdict,
    pub matched: Option<String>,
}

impl PolicyTable {
    pub fn new(name: impl Into<String>, config: &PolicyTableConfig) -> Result<Self, ConfigError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                Ok(PolicyRule {
                    source: rule.pattern.clone(),
                    regex: compile(&rule.pattern)?,
                    verdict: rule.verdict,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            name: name.into(),
            rules,
            default: config.default,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, value: &str) -> PolicyOutcome {
        match self.rules.iter().find(|r| r.regex.is_match(value)) {
            Some(rule) => PolicyOutcome {
                verdict: rule.verdict,
                matched: Some(rule.source.clone()),
            },
            None => PolicyOutcome {
                verdict: self.default,
                matched: None,
            },
        }
    }
}

/// Extensions that must never be accepted for upload
const EXECUTABLE_EXTENSIONS: &str = r"^\.?(php[0-9]?|phtml|phar|cgi|pl|py|sh|bash|exe|bat|cmd|com|msi|jar|vbs|ps1|htaccess)$";

fn deny_rule(pattern: &str) -> PolicyRuleConfig {
    PolicyRuleConfig {
        pattern: pattern.to_string(),
        verdict: Verdict::Deny,
    }
}

/// Tables shipped when the configuration does not override them
pub fn default_tables() -> HashMap<String, PolicyTableConfig> {
    let mut tables = HashMap::new();
    tables.insert(
        "upload_extension".to_string(),
        PolicyTableConfig {
            default: Verdict::Allow,
            rules: vec![deny_rule(EXECUTABLE_EXTENSIONS)],
        },
    );
    tables.insert(
        "uri_scheme".to_string(),
        PolicyTableConfig {
            default: Verdict::Allow,
            rules: vec![deny_rule(r"^\s*(javascript|data|vbscript):")],
        },
    );
    tables.insert(
        "role_name".to_string(),
        PolicyTableConfig {
            default: Verdict::Allow,
            rules: vec![deny_rule(r"^\s*administrator\s*$")],
        },
    );
    tables
}

/// All named tables known to a gateway
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    tables: HashMap<String, PolicyTable>,
}

impl PolicySet {
    /// Compile the built-in tables, replacing any the configuration names
    pub fn from_config(configured: &HashMap<String, PolicyTableConfig>) -> Result<Self, ConfigError> {
        let mut merged = default_tables();
        for (name, table) in configured {
            merged.insert(name.clone(), table.clone());
        }

        let tables = merged
            .iter()
            .map(|(name, table)| Ok((name.clone(), PolicyTable::new(name, table)?)))
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;

        Ok(Self { tables })
    }

    /// Evaluate `value` against the named table; `None` if no such table
    pub fn evaluate(&self, name: &str, value: &str) -> Option<PolicyOutcome> {
        self.tables.get(name).map(|t| t.evaluate(value))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Table names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
