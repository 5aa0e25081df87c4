//! Experimental conditions ("groups") and the configured group set.

use crate::{AssignmentError, AssignmentResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest accepted group identifier.
pub const MAX_GROUP_ID_LEN: usize = 64;

/// Validated name of an experimental condition, e.g. `TemplateLiteral`.
///
/// Accepts ASCII letters, digits, `_` and `-`, after trimming surrounding
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "openapi", schema(value_type = String, example = "TemplateLiteral"))]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    pub fn new(raw: &str) -> AssignmentResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AssignmentError::invalid_input("group", "must not be empty"));
        }
        if trimmed.len() > MAX_GROUP_ID_LEN {
            return Err(AssignmentError::invalid_input(
                "group",
                format!("must be at most {} characters", MAX_GROUP_ID_LEN),
            ));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(AssignmentError::invalid_input(
                "group",
                format!("unexpected character {:?}", bad),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GroupId {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for GroupId {
    type Error = AssignmentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.0
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// GROUP SET
// ============================================================================

/// The fixed set of conditions known at startup. Never empty, keeps the
/// configured order, drops duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSet {
    groups: Vec<GroupId>,
}

impl GroupSet {
    pub fn new(groups: impl IntoIterator<Item = GroupId>) -> AssignmentResult<Self> {
        let mut unique: Vec<GroupId> = Vec::new();
        for group in groups {
            if !unique.contains(&group) {
                unique.push(group);
            }
        }
        if unique.is_empty() {
            return Err(AssignmentError::configuration(
                "groups",
                "at least one group must be configured",
            ));
        }
        Ok(Self { groups: unique })
    }

    /// Parse a comma-separated list such as `A,B,C`. Blank entries are skipped.
    pub fn parse_list(raw: &str) -> AssignmentResult<Self> {
        let mut groups = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let group = GroupId::new(part).map_err(|e| match e {
                AssignmentError::InvalidInput { reason, .. } => {
                    AssignmentError::configuration("groups", format!("{}: {}", part, reason))
                }
                other => other,
            })?;
            groups.push(group);
        }
        Self::new(groups)
    }

    pub fn contains(&self, group: &GroupId) -> bool {
        self.groups.contains(group)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupId> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn as_slice(&self) -> &[GroupId] {
        &self.groups
    }

    /// Validate a caller-supplied group name against this set.
    pub fn resolve(&self, raw: &str) -> AssignmentResult<GroupId> {
        let group = GroupId::new(raw)?;
        if !self.contains(&group) {
            return Err(AssignmentError::invalid_input(
                "group",
                format!("unknown group {}", group),
            ));
        }
        Ok(group)
    }
}

impl fmt::Display for GroupSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", group)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a GroupSet {
    type Item = &'a GroupId;
    type IntoIter = std::slice::Iter<'a, GroupId>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_trims_and_validates() -> AssignmentResult<()> {
        assert_eq!(GroupId::new("  Backslash ")?.as_str(), "Backslash");
        assert!(GroupId::new("").is_err());
        assert!(GroupId::new("   ").is_err());
        assert!(GroupId::new("Angle Bracket").is_err());
        assert!(GroupId::new("x'; DROP TABLE").is_err());
        assert!(GroupId::new(&"a".repeat(MAX_GROUP_ID_LEN + 1)).is_err());
        Ok(())
    }

    #[test]
    fn test_group_set_rejects_empty() {
        let err = GroupSet::new(Vec::new()).unwrap_err();
        assert!(matches!(err, AssignmentError::Configuration { .. }));
        assert!(matches!(
            GroupSet::parse_list(" , ,"),
            Err(AssignmentError::Configuration { .. })
        ));
    }

    #[test]
    fn test_group_set_parse_keeps_order_and_dedups() -> AssignmentResult<()> {
        let set = GroupSet::parse_list("AngleBracket, Backslash,TemplateLiteral,Backslash")?;
        let names: Vec<&str> = set.iter().map(GroupId::as_str).collect();
        assert_eq!(names, vec!["AngleBracket", "Backslash", "TemplateLiteral"]);
        assert_eq!(set.to_string(), "AngleBracket,Backslash,TemplateLiteral");
        Ok(())
    }

    #[test]
    fn test_group_set_parse_reports_bad_entry_as_configuration() {
        let err = GroupSet::parse_list("A,B C").unwrap_err();
        assert!(matches!(err, AssignmentError::Configuration { .. }));
    }

    #[test]
    fn test_resolve_rejects_unknown_group() -> AssignmentResult<()> {
        let set = GroupSet::parse_list("A,B")?;
        assert_eq!(set.resolve("B")?.as_str(), "B");
        assert!(matches!(
            set.resolve("C"),
            Err(AssignmentError::InvalidInput { .. })
        ));
        assert!(matches!(
            set.resolve("%%"),
            Err(AssignmentError::InvalidInput { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_group_id_deserialize_validates() {
        assert!(serde_json::from_str::<GroupId>("\"Backslash\"").is_ok());
        assert!(serde_json::from_str::<GroupId>("\"no spaces\"").is_err());
    }
}
