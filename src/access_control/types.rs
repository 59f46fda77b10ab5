//! Access control types
//!
//! Core vocabulary shared by the scope resolver, the rate limiter and the
//! gateway.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A coarse capability grant attached to a calling principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Write,
    Admin,
}

impl Scope {
    /// Get the scope name as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Write => "write",
            Scope::Admin => "admin",
        }
    }

    /// Try to parse a scope from a string
    pub fn try_parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Scope::Read),
            "write" => Some(Scope::Write),
            "admin" => Some(Scope::Admin),
            _ => None,
        }
    }

    /// Get all scopes
    pub const fn all() -> &'static [Scope] {
        &[Scope::Read, Scope::Write, Scope::Admin]
    }

    const fn bit(self) -> u8 {
        match self {
            Scope::Read => 0b001,
            Scope::Write => 0b010,
            Scope::Admin => 0b100,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable set of scopes.
///
/// Scopes are granted independently: holding `admin` says nothing about
/// `write`, and holding `write` says nothing about `read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScopeSet(u8);

impl ScopeSet {
    pub const EMPTY: ScopeSet = ScopeSet(0);

    /// Set containing every scope
    pub const fn all() -> Self {
        ScopeSet(0b111)
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.0 & scope.bit() != 0
    }

    #[must_use]
    pub fn with(self, scope: Scope) -> Self {
        ScopeSet(self.0 | scope.bit())
    }

    #[must_use]
    pub fn without(self, scope: Scope) -> Self {
        ScopeSet(self.0 & !scope.bit())
    }

    #[must_use]
    pub fn intersection(self, other: ScopeSet) -> Self {
        ScopeSet(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        Scope::all().iter().copied().filter(|s| self.contains(*s))
    }

    /// Parse a comma-separated scope list, ignoring unknown names
    pub fn parse(list: &str) -> Self {
        list.split(',').filter_map(Scope::try_parse).collect()
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        iter.into_iter().fold(ScopeSet::EMPTY, ScopeSet::with)
    }
}

impl<'a> FromIterator<&'a Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = &'a Scope>>(iter: I) -> Self {
        iter.into_iter().copied().collect()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Scope>::deserialize(deserializer).map(|v| v.into_iter().collect())
    }
}

/// Kind of state a write touches, used by config-only mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    /// Configuration entities (content types, fields, views, settings)
    Config,
    /// Content entities (nodes, terms, users, media)
    Content,
    /// Operational actions (cache clears, cron, reindexing)
    Ops,
}

impl WriteKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Config => "config",
            WriteKind::Content => "content",
            WriteKind::Ops => "ops",
        }
    }

    pub const fn all() -> &'static [WriteKind] {
        &[WriteKind::Config, WriteKind::Content, WriteKind::Ops]
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket of mutating operations sharing one quota.
///
/// Read operations have no category and are never rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCategory {
    Writes,
    Deletes,
    StructureChanges,
}

impl RateCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RateCategory::Writes => "writes",
            RateCategory::Deletes => "deletes",
            RateCategory::StructureChanges => "structure_changes",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "writes" => Some(RateCategory::Writes),
            "deletes" => Some(RateCategory::Deletes),
            "structure_changes" => Some(RateCategory::StructureChanges),
            _ => None,
        }
    }

    pub const fn all() -> &'static [RateCategory] {
        &[
            RateCategory::Writes,
            RateCategory::Deletes,
            RateCategory::StructureChanges,
        ]
    }
}

impl fmt::Display for RateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const READ_VERBS: &[&str] = &[
    "read", "view", "get", "list", "search", "export", "preview", "analyze",
];

const DELETE_VERBS: &[&str] = &["delete", "remove", "purge", "revoke", "uninstall"];

/// What a gated call does, as far as policy is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "category")]
pub enum Operation {
    /// Needs `read`; never rate limited
    Read,
    /// Needs `write`; charged to the given category
    Mutate(RateCategory),
    /// Needs `admin`; charged to `structure_changes`
    Admin,
}

impl Operation {
    /// Map an action verb onto an operation.
    ///
    /// The verb is the leading word of `action` (`delete_node` and
    /// `delete` both classify as deletes). `structural` tells whether the
    /// target resource type belongs to the structure family.
    pub fn classify(action: &str, structural: bool) -> Self {
        let normalized = action.trim().to_ascii_lowercase();
        let verb = normalized
            .split(|c: char| c == '_' || c == '-' || c == ':' || c == '.' || c.is_whitespace())
            .next()
            .unwrap_or_default();

        if verb == "admin" {
            Operation::Admin
        } else if READ_VERBS.contains(&verb) {
            Operation::Read
        } else if DELETE_VERBS.contains(&verb) {
            Operation::Mutate(RateCategory::Deletes)
        } else if structural {
            Operation::Mutate(RateCategory::StructureChanges)
        } else {
            Operation::Mutate(RateCategory::Writes)
        }
    }

    /// Scope the operation requires
    pub const fn required_scope(&self) -> Scope {
        match self {
            Operation::Read => Scope::Read,
            Operation::Mutate(_) => Scope::Write,
            Operation::Admin => Scope::Admin,
        }
    }

    /// Rate category charged for the operation, if any
    pub const fn category(&self) -> Option<RateCategory> {
        match self {
            Operation::Read => None,
            Operation::Mutate(category) => Some(*category),
            Operation::Admin => Some(RateCategory::StructureChanges),
        }
    }

    pub const fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Mutate(category) => write!(f, "mutate({})", category),
            Operation::Admin => f.write_str("admin"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_roundtrip() {
        for scope in Scope::all() {
            assert_eq!(Scope::try_parse(scope.as_str()), Some(*scope));
        }
        assert_eq!(Scope::try_parse(" WRITE "), Some(Scope::Write));
        assert_eq!(Scope::try_parse("owner"), None);
    }

    #[test]
    fn test_scope_set_is_not_hierarchical() {
        let admin_only: ScopeSet = [Scope::Admin].iter().collect();
        assert!(admin_only.contains(Scope::Admin));
        assert!(!admin_only.contains(Scope::Write));
        assert!(!admin_only.contains(Scope::Read));
    }

    #[test]
    fn test_scope_set_parse_ignores_unknown() {
        let set = ScopeSet::parse("read, bogus,admin");
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_string(), "read,admin");
        assert!(ScopeSet::parse("").is_empty());
    }

    #[test]
    fn test_scope_set_serde() {
        let set: ScopeSet = serde_json::from_str(r#"["write","read"]"#).unwrap();
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["read","write"]"#);
    }

    #[test]
    fn test_category_roundtrip() {
        for category in RateCategory::all() {
            assert_eq!(RateCategory::try_parse(category.as_str()), Some(*category));
        }
    }

    #[test]
    fn test_operation_classify() {
        assert_eq!(Operation::classify("list", false), Operation::Read);
        assert_eq!(Operation::classify("get_node", false), Operation::Read);
        assert_eq!(
            Operation::classify("delete", false),
            Operation::Mutate(RateCategory::Deletes)
        );
        assert_eq!(
            Operation::classify("create", true),
            Operation::Mutate(RateCategory::StructureChanges)
        );
        assert_eq!(
            Operation::classify("Update", false),
            Operation::Mutate(RateCategory::Writes)
        );
        assert_eq!(Operation::classify("admin", false), Operation::Admin);
    }

    #[test]
    fn test_operation_requirements() {
        assert_eq!(Operation::Read.required_scope(), Scope::Read);
        assert_eq!(Operation::Read.category(), None);
        assert!(!Operation::Read.is_mutating());
        assert_eq!(
            Operation::Admin.category(),
            Some(RateCategory::StructureChanges)
        );
        assert_eq!(
            Operation::Mutate(RateCategory::Deletes).required_scope(),
            Scope::Write
        );
    }
}
