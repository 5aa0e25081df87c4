//! API Configuration Module
//!
//! Configuration for CORS, the assignment service and the backing store.
//! Everything is loaded from environment variables with defaults suited to
//! development; anything that cannot be parsed into a usable assignment
//! setup is a startup error.

use crate::constants::{
    DEFAULT_CORS_MAX_AGE_SECS, DEFAULT_GROUPS, DEFAULT_QUESTION_COUNT, DEFAULT_SYNTAX_COUNT,
};
use counterbalance_core::{AssignmentError, AssignmentResult, GroupSet, StimulusCounts};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP-facing configuration (CORS).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `COUNTERBALANCE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `COUNTERBALANCE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `COUNTERBALANCE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("COUNTERBALANCE_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("COUNTERBALANCE_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("COUNTERBALANCE_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CORS_MAX_AGE_SECS);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

// ============================================================================
// ASSIGNMENT CONFIGURATION
// ============================================================================

/// How the group of a new assignment is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllocationMode {
    /// The balancer picks the least-loaded group unless the client names one.
    #[default]
    Balanced,
    /// The client always names the group; the service only rotates.
    ClientAssigned,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::Balanced => "balanced",
            AllocationMode::ClientAssigned => "client-assigned",
        }
    }
}

impl fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationMode {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "balanced" => Ok(AllocationMode::Balanced),
            "client-assigned" | "client_assigned" | "client" => Ok(AllocationMode::ClientAssigned),
            other => Err(AssignmentError::configuration(
                "COUNTERBALANCE_ALLOCATION_MODE",
                format!("unknown allocation mode {:?}", other),
            )),
        }
    }
}

/// Assignment service configuration.
#[derive(Debug, Clone)]
pub struct AssignmentConfig {
    pub groups: GroupSet,
    pub mode: AllocationMode,
    /// Used by `GET /next-group` when the query omits `questionCount`.
    pub default_question_count: i64,
    /// Used by `GET /next-group` when the query omits `syntaxCount`.
    pub default_syntax_count: i64,
}

impl AssignmentConfig {
    pub fn new(groups: GroupSet, mode: AllocationMode) -> Self {
        Self {
            groups,
            mode,
            default_question_count: DEFAULT_QUESTION_COUNT,
            default_syntax_count: DEFAULT_SYNTAX_COUNT,
        }
    }

    /// Create AssignmentConfig from environment variables.
    ///
    /// Environment variables:
    /// - `COUNTERBALANCE_GROUPS`: Comma-separated group names
    ///   (default: `AngleBracket,Backslash,TemplateLiteral`)
    /// - `COUNTERBALANCE_ALLOCATION_MODE`: `balanced` or `client-assigned` (default: balanced)
    /// - `COUNTERBALANCE_DEFAULT_QUESTION_COUNT` / `COUNTERBALANCE_DEFAULT_SYNTAX_COUNT`
    ///   (default: 5 / 7)
    ///
    /// An empty or malformed group list, or a default count outside
    /// `1..=MAX_STIMULUS_COUNT`, is a configuration error.
    pub fn from_env() -> AssignmentResult<Self> {
        let raw_groups =
            std::env::var("COUNTERBALANCE_GROUPS").unwrap_or_else(|_| DEFAULT_GROUPS.to_string());
        let groups = GroupSet::parse_list(&raw_groups)?;

        let mode = match std::env::var("COUNTERBALANCE_ALLOCATION_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => AllocationMode::default(),
        };

        let config = Self {
            groups,
            mode,
            default_question_count: count_from_env(
                QUESTION_COUNT_VAR,
                DEFAULT_QUESTION_COUNT,
            )?,
            default_syntax_count: count_from_env(SYNTAX_COUNT_VAR, DEFAULT_SYNTAX_COUNT)?,
        };
        config.validate_defaults()?;
        Ok(config)
    }

    /// The default counts must themselves be a valid request, otherwise
    /// every `GET /next-group` without overrides would fail.
    pub fn validate_defaults(&self) -> AssignmentResult<()> {
        StimulusCounts::new(self.default_question_count, self.default_syntax_count)
            .map(|_| ())
            .map_err(|e| match e {
                AssignmentError::InvalidInput { field, reason } => {
                    let var = if field == "questionCount" {
                        QUESTION_COUNT_VAR
                    } else {
                        SYNTAX_COUNT_VAR
                    };
                    AssignmentError::configuration(var, reason)
                }
                other => other,
            })
    }
}

const QUESTION_COUNT_VAR: &str = "COUNTERBALANCE_DEFAULT_QUESTION_COUNT";
const SYNTAX_COUNT_VAR: &str = "COUNTERBALANCE_DEFAULT_SYNTAX_COUNT";

fn count_from_env(var: &str, default: i64) -> AssignmentResult<i64> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AssignmentError::configuration(var, format!("not an integer: {:?}", raw))
        }),
        Err(_) => Ok(default),
    }
}

// ============================================================================
// STORE SELECTION
// ============================================================================

/// Which store backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Postgres,
    /// Process-local; state is lost on restart. Development only.
    Memory,
}

impl StoreKind {
    /// Read `COUNTERBALANCE_STORE` (`postgres` | `memory`, default postgres).
    pub fn from_env() -> AssignmentResult<Self> {
        match std::env::var("COUNTERBALANCE_STORE") {
            Ok(raw) => raw.parse(),
            Err(_) => Ok(StoreKind::default()),
        }
    }
}

impl FromStr for StoreKind {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "memory" | "in-memory" => Ok(StoreKind::Memory),
            other => Err(AssignmentError::configuration(
                "COUNTERBALANCE_STORE",
                format!("unknown store {:?}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.cors_origins.is_empty());
        assert!(!config.cors_allow_credentials);
        assert_eq!(config.cors_max_age_secs, 86400);
        assert!(!config.is_production());
    }

    #[test]
    fn test_allocation_mode_parse() {
        assert_eq!("balanced".parse::<AllocationMode>(), Ok(AllocationMode::Balanced));
        assert_eq!(
            "Client-Assigned".parse::<AllocationMode>(),
            Ok(AllocationMode::ClientAssigned)
        );
        assert!(matches!(
            "random".parse::<AllocationMode>(),
            Err(AssignmentError::Configuration { .. })
        ));
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("memory".parse::<StoreKind>(), Ok(StoreKind::Memory));
        assert_eq!("POSTGRES".parse::<StoreKind>(), Ok(StoreKind::Postgres));
        assert!("sqlite".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_default_counts_are_validated() -> AssignmentResult<()> {
        let groups = GroupSet::parse_list(DEFAULT_GROUPS)?;
        let config = AssignmentConfig::new(groups, AllocationMode::Balanced);
        config.validate_defaults()?;

        let zero_questions = AssignmentConfig {
            default_question_count: 0,
            ..config.clone()
        };
        match zero_questions.validate_defaults() {
            Err(AssignmentError::Configuration { field, .. }) => {
                assert_eq!(field, "COUNTERBALANCE_DEFAULT_QUESTION_COUNT")
            }
            other => panic!("expected configuration error, got {:?}", other),
        }

        let huge_syntaxes = AssignmentConfig {
            default_syntax_count: i64::MAX,
            ..config
        };
        match huge_syntaxes.validate_defaults() {
            Err(AssignmentError::Configuration { field, .. }) => {
                assert_eq!(field, "COUNTERBALANCE_DEFAULT_SYNTAX_COUNT")
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_default_groups_parse() -> AssignmentResult<()> {
        let groups = GroupSet::parse_list(DEFAULT_GROUPS)?;
        assert_eq!(groups.len(), 3);
        Ok(())
    }
}
