//! Abandonment Reaper Background Task
//!
//! Participants who close the browser never report completion. Every
//! `check_interval` this task finds assignments that are neither completed
//! nor abandoned and whose claim is older than `timeout`, and applies the
//! configured [`ReaperPolicy`]:
//!
//! - `MarkAbandoned` flags them so the next allocation in that group can
//!   reclaim the rotation counter.
//! - `Delete` removes them. A deleted counter is not reclaimed: the next
//!   allocation takes max + 1 over the surviving rows, so a deleted counter
//!   at the top of its group is issued again while gaps below it stay empty.
//!   The policy must not be switched on a live study.
//!
//! Each sweep is a single statement against the store and never takes the
//! `assignment-balancer` lock.
//!
//! # Configuration
//!
//! ```rust
//! use counterbalance_api::jobs::{ReaperConfig, ReaperPolicy};
//! use std::time::Duration;
//!
//! let config = ReaperConfig {
//!     check_interval: Duration::from_secs(60), // Sweep every minute
//!     timeout: Duration::from_secs(1800),      // 30 minutes
//!     policy: ReaperPolicy::MarkAbandoned,
//!     log_reclaims: true,
//! };
//! ```

use crate::constants::{DEFAULT_REAPER_CHECK_INTERVAL_SECS, DEFAULT_REAPER_TIMEOUT_SECS};
use crate::telemetry::metrics::with_metrics;
use counterbalance_core::{AssignmentError, AssignmentRecord, AssignmentResult, Timestamp};
use counterbalance_storage::AssignmentStore;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// What a sweep does to stale assignments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReaperPolicy {
    /// Set `abandoned = true`; the slot is reclaimed by a later allocation.
    #[default]
    MarkAbandoned,
    /// Delete the rows outright.
    Delete,
}

impl ReaperPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaperPolicy::MarkAbandoned => "mark-abandoned",
            ReaperPolicy::Delete => "delete",
        }
    }
}

impl fmt::Display for ReaperPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReaperPolicy {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mark-abandoned" | "mark_abandoned" | "mark" => Ok(ReaperPolicy::MarkAbandoned),
            "delete" => Ok(ReaperPolicy::Delete),
            other => Err(AssignmentError::configuration(
                "COUNTERBALANCE_REAPER_POLICY",
                format!("unknown reaper policy {:?}", other),
            )),
        }
    }
}

/// Configuration for the abandonment reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to sweep (default: 60 seconds)
    pub check_interval: Duration,

    /// Incomplete assignments claimed longer ago than this are stale
    /// (default: 30 minutes)
    pub timeout: Duration,

    /// What to do with stale assignments (default: mark abandoned)
    pub policy: ReaperPolicy,

    /// Whether to log each reaped assignment (default: true)
    pub log_reclaims: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_REAPER_CHECK_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_REAPER_TIMEOUT_SECS),
            policy: ReaperPolicy::default(),
            log_reclaims: true,
        }
    }
}

impl ReaperConfig {
    /// Create ReaperConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `COUNTERBALANCE_REAPER_CHECK_INTERVAL_SECS`: Sweep interval (default: 60)
    /// - `COUNTERBALANCE_REAPER_TIMEOUT_SECS`: Staleness threshold (default: 1800)
    /// - `COUNTERBALANCE_REAPER_POLICY`: `mark-abandoned` or `delete` (default: mark-abandoned)
    /// - `COUNTERBALANCE_REAPER_LOG_RECLAIMS`: Whether to log each reaped record (default: true)
    pub fn from_env() -> AssignmentResult<Self> {
        let check_interval = Duration::from_secs(
            std::env::var("COUNTERBALANCE_REAPER_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REAPER_CHECK_INTERVAL_SECS),
        );

        let timeout = Duration::from_secs(
            std::env::var("COUNTERBALANCE_REAPER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REAPER_TIMEOUT_SECS),
        );

        let policy = match std::env::var("COUNTERBALANCE_REAPER_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => ReaperPolicy::default(),
        };

        let log_reclaims = std::env::var("COUNTERBALANCE_REAPER_LOG_RECLAIMS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let config = Self {
            check_interval,
            timeout,
            policy,
            log_reclaims,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration for development/testing with shorter timeouts.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            policy: ReaperPolicy::MarkAbandoned,
            log_reclaims: true,
        }
    }

    /// Create a configuration for production with a longer grace period.
    pub fn production() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_REAPER_CHECK_INTERVAL_SECS),
            timeout: Duration::from_secs(3600), // 1 hour
            policy: ReaperPolicy::MarkAbandoned,
            log_reclaims: false,
        }
    }

    /// Reject zero durations; `interval` panics on a zero period.
    pub fn validate(&self) -> AssignmentResult<()> {
        if self.check_interval.is_zero() {
            return Err(AssignmentError::configuration(
                "COUNTERBALANCE_REAPER_CHECK_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }
        if self.timeout.is_zero() {
            return Err(AssignmentError::configuration(
                "COUNTERBALANCE_REAPER_TIMEOUT_SECS",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    fn cutoff(&self, now: Timestamp) -> AssignmentResult<Timestamp> {
        chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .ok_or_else(|| {
                AssignmentError::configuration("COUNTERBALANCE_REAPER_TIMEOUT_SECS", "out of range")
            })
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for reaper activity since startup.
#[derive(Debug, Default)]
pub struct ReaperMetrics {
    /// Completed sweeps, successful or not
    pub sweeps: AtomicU64,

    /// Assignments marked abandoned or deleted
    pub records_reaped: AtomicU64,

    /// Sweeps that failed against the store
    pub sweep_errors: AtomicU64,
}

impl ReaperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> ReaperSnapshot {
        ReaperSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            records_reaped: self.records_reaped.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of reaper metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperSnapshot {
    pub sweeps: u64,
    pub records_reaped: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// SWEEP
// ============================================================================

/// Run one sweep as of `now` and return the affected records.
///
/// A record is stale iff `claimed_at < now - timeout`.
pub async fn sweep_once(
    store: &dyn AssignmentStore,
    config: &ReaperConfig,
    now: Timestamp,
) -> AssignmentResult<Vec<AssignmentRecord>> {
    let cutoff = config.cutoff(now)?;
    match config.policy {
        ReaperPolicy::MarkAbandoned => store.mark_stale_abandoned(cutoff).await,
        ReaperPolicy::Delete => store.delete_stale(cutoff).await,
    }
}

async fn sweep(store: &dyn AssignmentStore, config: &ReaperConfig, metrics: &ReaperMetrics) {
    metrics.sweeps.fetch_add(1, Ordering::Relaxed);

    match sweep_once(store, config, chrono::Utc::now()).await {
        Ok(reaped) => {
            metrics
                .records_reaped
                .fetch_add(reaped.len() as u64, Ordering::Relaxed);
            with_metrics(|m| m.record_reaper_sweep(config.policy.as_str(), Some(reaped.len())));

            if reaped.is_empty() {
                tracing::trace!("Reaper sweep found nothing stale");
                return;
            }
            if config.log_reclaims {
                for record in &reaped {
                    tracing::info!(
                        assignment_id = %record.id,
                        group = %record.group,
                        counter = record.rotation_counter,
                        claimed_at = %record.claimed_at,
                        policy = %config.policy,
                        "Stale assignment reaped"
                    );
                }
            }
            tracing::info!(count = reaped.len(), policy = %config.policy, "Reaper sweep finished");
        }
        Err(e) => {
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            with_metrics(|m| m.record_reaper_sweep(config.policy.as_str(), None));
            tracing::error!(error = %e, "Reaper sweep failed; retrying next tick");
        }
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sweep every `check_interval` until the shutdown signal is received.
///
/// The first sweep runs immediately. Returns `metrics` once stopped. A dropped
/// sender counts as shutdown.
pub async fn reaper_task(
    store: Arc<dyn AssignmentStore>,
    config: ReaperConfig,
    metrics: Arc<ReaperMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ReaperMetrics> {
    let mut ticker = interval(config.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        timeout_secs = config.timeout.as_secs(),
        policy = %config.policy,
        "Abandonment reaper started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Abandonment reaper shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                sweep(store.as_ref(), &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        records_reaped = snapshot.records_reaped,
        sweep_errors = snapshot.sweep_errors,
        "Abandonment reaper stopped"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllocationMode, AssignmentConfig};
    use crate::services::request_assignment;
    use chrono::Utc;
    use counterbalance_core::{GroupId, GroupSet};
    use counterbalance_storage::InMemoryAssignmentStore;

    fn record(group: &str, counter: i64, claimed_at: Timestamp) -> AssignmentRecord {
        AssignmentRecord::new(GroupId::new(group).expect("valid group"), counter, claimed_at)
    }

    #[test]
    fn test_config_defaults() {
        let config = ReaperConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.timeout, Duration::from_secs(1800));
        assert_eq!(config.policy, ReaperPolicy::MarkAbandoned);
        assert!(config.log_reclaims);
    }

    #[test]
    fn test_presets() {
        let dev = ReaperConfig::development();
        let prod = ReaperConfig::production();
        assert!(dev.timeout < prod.timeout);
        assert!(dev.validate().is_ok());
        assert!(prod.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ReaperConfig {
            check_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AssignmentError::Configuration { .. })));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("delete".parse::<ReaperPolicy>(), Ok(ReaperPolicy::Delete));
        assert_eq!("Mark-Abandoned".parse::<ReaperPolicy>(), Ok(ReaperPolicy::MarkAbandoned));
        assert!("purge".parse::<ReaperPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_sweep_respects_timeout_boundary() {
        let store = InMemoryAssignmentStore::new();
        let claimed = Utc::now();
        store.seed(record("Backslash", 0, claimed)).expect("seed");
        let config = ReaperConfig {
            timeout: Duration::from_secs(60),
            ..Default::default()
        };

        let before = sweep_once(&store, &config, claimed + chrono::Duration::seconds(59))
            .await
            .expect("early sweep");
        assert!(before.is_empty());

        // Exactly at the timeout the claim is not yet strictly older.
        let at = sweep_once(&store, &config, claimed + chrono::Duration::seconds(60))
            .await
            .expect("boundary sweep");
        assert!(at.is_empty());

        let after = sweep_once(&store, &config, claimed + chrono::Duration::seconds(61))
            .await
            .expect("late sweep");
        assert_eq!(after.len(), 1);
        assert!(store.records().expect("records")[0].abandoned);
    }

    #[tokio::test]
    async fn test_delete_policy_removes_rows() {
        let store = InMemoryAssignmentStore::new();
        let claimed = Utc::now() - chrono::Duration::hours(2);
        store.seed(record("Backslash", 0, claimed)).expect("seed");
        let config = ReaperConfig {
            policy: ReaperPolicy::Delete,
            ..Default::default()
        };

        let reaped = sweep_once(&store, &config, Utc::now()).await.expect("sweep");
        assert_eq!(reaped.len(), 1);
        assert_eq!(store.assignment_count(), Ok(0));
    }

    #[tokio::test]
    async fn test_delete_policy_reissues_only_the_top_counter() {
        let store = InMemoryAssignmentStore::new();
        let stale = Utc::now() - chrono::Duration::hours(2);
        store.seed(record("Backslash", 0, stale)).expect("seed");
        store.seed(record("Backslash", 1, Utc::now())).expect("seed");
        store.seed(record("Backslash", 2, stale)).expect("seed");
        let config = ReaperConfig {
            policy: ReaperPolicy::Delete,
            ..Default::default()
        };
        sweep_once(&store, &config, Utc::now()).await.expect("sweep");

        let groups = GroupSet::parse_list("Backslash").expect("valid groups");
        let assignment_config = AssignmentConfig::new(groups, AllocationMode::Balanced);
        let next = request_assignment(&store, &assignment_config, Some("Backslash"), 5, 7)
            .await
            .expect("allocation");

        assert!(!next.reclaimed);
        assert_eq!(next.rotation_counter, 2);
        let counters: Vec<i64> = store
            .records()
            .expect("records")
            .iter()
            .map(|r| r.rotation_counter)
            .collect();
        assert_eq!(counters, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_sweep_is_counted() {
        let store = InMemoryAssignmentStore::new();
        store.set_unavailable(true);
        let metrics = ReaperMetrics::new();

        sweep(&store, &ReaperConfig::default(), &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sweeps, 1);
        assert_eq!(snapshot.sweep_errors, 1);
        assert_eq!(snapshot.records_reaped, 0);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let store: Arc<dyn AssignmentStore> = Arc::new(InMemoryAssignmentStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(ReaperMetrics::new());

        let handle = tokio::spawn(reaper_task(
            store,
            ReaperConfig::development(),
            Arc::clone(&metrics),
            shutdown_rx,
        ));
        shutdown_tx.send(true).expect("receiver alive");

        let finished = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task stops")
            .expect("task does not panic");
        assert_eq!(finished.snapshot().sweep_errors, 0);
    }
}
