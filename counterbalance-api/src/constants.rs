//! Constants for the counterbalance API
//!
//! This module contains all constant values used throughout the API.
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// ASSIGNMENT
// ============================================================================

/// Conditions used when `COUNTERBALANCE_GROUPS` is unset.
pub const DEFAULT_GROUPS: &str = "AngleBracket,Backslash,TemplateLiteral";

/// Question count used by `GET /next-group` when the query omits it.
pub const DEFAULT_QUESTION_COUNT: i64 = 5;

/// Syntax count used by `GET /next-group` when the query omits it.
pub const DEFAULT_SYNTAX_COUNT: i64 = 7;

/// Upper bound on ids accepted by one completion request.
pub const MAX_COMPLETION_IDS: usize = 32;

// ============================================================================
// ABANDONMENT REAPER
// ============================================================================

/// How often the reaper sweeps for stale assignments (1 minute)
pub const DEFAULT_REAPER_CHECK_INTERVAL_SECS: u64 = 60;

/// Incomplete assignments older than this are abandoned (30 minutes)
pub const DEFAULT_REAPER_TIMEOUT_SECS: u64 = 1800;

// ============================================================================
// DATABASE
// ============================================================================

/// Default Postgres database name
pub const DEFAULT_DB_NAME: &str = "counterbalance";

/// Default connection pool size
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Default pool checkout timeout in seconds
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// SERVER
// ============================================================================

/// Default listen port
pub const DEFAULT_API_PORT: u16 = 3000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaper_defaults_are_sane() {
        assert!(DEFAULT_REAPER_CHECK_INTERVAL_SECS < DEFAULT_REAPER_TIMEOUT_SECS);
    }

    #[test]
    fn test_default_counts_are_positive() {
        assert!(DEFAULT_QUESTION_COUNT > 0);
        assert!(DEFAULT_SYNTAX_COUNT > 0);
    }
}
