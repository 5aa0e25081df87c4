//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, and the Postgres
//! implementation of [`AssignmentStore`].
//!
//! Allocation runs in one transaction whose first statement is
//! `pg_advisory_xact_lock` on the `assignment-balancer` key, so every
//! process sharing the database serialises on it. The lock is released by
//! COMMIT or ROLLBACK; dropping the transaction handle on an error path
//! rolls back.

use crate::constants::{DEFAULT_DB_NAME, DEFAULT_DB_POOL_SIZE, DEFAULT_DB_TIMEOUT_SECS};
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use counterbalance_core::{
    AdvisoryLockName, AssignmentError, AssignmentId, AssignmentRecord, AssignmentResult, GroupId,
    GroupLoad, ParticipantProfile, ParticipantResults, ProgrammingLanguage, ResultId,
    ResultsSubmission, Sex, Timestamp,
};
use counterbalance_storage::{AllocationTx, AssignmentStore, StoreSession};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

/// Schema applied by [`DbClient::migrate`].
const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Serialises concurrent schema migrations from several replicas.
const SCHEMA_MIGRATION_LOCK: AdvisoryLockName = AdvisoryLockName::new("schema-migration");

const ASSIGNMENT_COLUMNS: &str =
    "id, group_name, rotation_counter, completed, abandoned, created_at, claimed_at";

const RESULTS_COLUMNS: &str = "id, assignment_ids, group_name, years_programming, age, sex, \
     language, email, accuracy, task_accuracy, question_ids, durations_ms, total_time_ms, \
     submitted_at";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection and checkout timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// - `COUNTERBALANCE_DB_HOST`, `COUNTERBALANCE_DB_PORT`, `COUNTERBALANCE_DB_NAME`
    /// - `COUNTERBALANCE_DB_USER`, `COUNTERBALANCE_DB_PASSWORD`
    /// - `COUNTERBALANCE_DB_POOL_SIZE`, `COUNTERBALANCE_DB_TIMEOUT` (seconds)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("COUNTERBALANCE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("COUNTERBALANCE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("COUNTERBALANCE_DB_NAME")
                .unwrap_or_else(|_| DEFAULT_DB_NAME.to_string()),
            user: std::env::var("COUNTERBALANCE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("COUNTERBALANCE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("COUNTERBALANCE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                std::env::var("COUNTERBALANCE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Connection loss, shutdown and serialisation conflicts are retryable;
/// everything else is a storage fault.
fn store_err(err: tokio_postgres::Error) -> AssignmentError {
    if err.is_closed() {
        return AssignmentError::store_unavailable(format!("connection closed: {}", err));
    }
    match err.as_db_error() {
        Some(db) => {
            let code = db.code();
            if *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED
                || *code == SqlState::ADMIN_SHUTDOWN
                || *code == SqlState::CANNOT_CONNECT_NOW
                || *code == SqlState::TOO_MANY_CONNECTIONS
            {
                AssignmentError::store_unavailable(format!("{}: {}", code.code(), db.message()))
            } else {
                AssignmentError::storage(format!("{}: {}", code.code(), db.message()))
            }
        }
        None => AssignmentError::storage(err.to_string()),
    }
}

fn pool_err(err: deadpool_postgres::PoolError) -> AssignmentError {
    AssignmentError::store_unavailable(format!("connection pool: {}", err))
}

fn column<'a, T>(row: &'a Row, name: &str) -> AssignmentResult<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name)
        .map_err(|e| AssignmentError::storage(format!("column {}: {}", name, e)))
}

fn parse_group(raw: &str) -> AssignmentResult<GroupId> {
    GroupId::new(raw)
        .map_err(|e| AssignmentError::storage(format!("stored group {:?} is invalid: {}", raw, e)))
}

fn assignment_from_row(row: &Row) -> AssignmentResult<AssignmentRecord> {
    let group: String = column(row, "group_name")?;
    Ok(AssignmentRecord {
        id: AssignmentId::from_uuid(column(row, "id")?),
        group: parse_group(&group)?,
        rotation_counter: column(row, "rotation_counter")?,
        completed: column(row, "completed")?,
        abandoned: column(row, "abandoned")?,
        created_at: column(row, "created_at")?,
        claimed_at: column(row, "claimed_at")?,
    })
}

fn results_from_row(row: &Row) -> AssignmentResult<ParticipantResults> {
    let assignment_ids: Vec<Uuid> = column(row, "assignment_ids")?;
    let group: Option<String> = column(row, "group_name")?;
    let sex: String = column(row, "sex")?;
    let language: String = column(row, "language")?;

    Ok(ParticipantResults {
        id: ResultId::from_uuid(column(row, "id")?),
        assignment_ids: assignment_ids.into_iter().map(AssignmentId::from_uuid).collect(),
        submission: ResultsSubmission {
            profile: ParticipantProfile {
                years_programming: column(row, "years_programming")?,
                age: column(row, "age")?,
                sex: Sex::from_db_str(&sex)
                    .map_err(|e| AssignmentError::storage(e.to_string()))?,
                language: ProgrammingLanguage::from_db_str(&language),
                email: column(row, "email")?,
            },
            group: group.as_deref().map(parse_group).transpose()?,
            accuracy: column(row, "accuracy")?,
            task_accuracy: column(row, "task_accuracy")?,
            question_ids: column(row, "question_ids")?,
            durations_ms: column(row, "durations_ms")?,
            total_time_ms: column(row, "total_time_ms")?,
        },
        submitted_at: column(row, "submitted_at")?,
    })
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client that wraps a connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    async fn get_conn(&self) -> AssignmentResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_err)
    }

    /// Apply the embedded schema. Idempotent and safe to run from several
    /// replicas at once.
    pub async fn migrate(&self) -> ApiResult<()> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&SCHEMA_MIGRATION_LOCK.key])
            .await?;
        tx.batch_execute(SCHEMA_SQL).await?;
        tx.commit().await?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }

    async fn sweep_stale(&self, sql: &str, cutoff: Timestamp) -> AssignmentResult<Vec<AssignmentRecord>> {
        let conn = self.get_conn().await?;
        let rows = conn.query(sql, &[&cutoff]).await.map_err(store_err)?;
        rows.iter().map(assignment_from_row).collect()
    }
}

#[async_trait]
impl AssignmentStore for DbClient {
    async fn session(&self) -> AssignmentResult<Box<dyn StoreSession>> {
        let conn = self.get_conn().await?;
        Ok(Box::new(PgSession { conn }))
    }

    async fn get(&self, id: AssignmentId) -> AssignmentResult<Option<AssignmentRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM assignments WHERE id = $1", ASSIGNMENT_COLUMNS),
                &[&id.as_uuid()],
            )
            .await
            .map_err(store_err)?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn record_completion(
        &self,
        ids: &[AssignmentId],
        submission: &ResultsSubmission,
        now: Timestamp,
    ) -> AssignmentResult<ParticipantResults> {
        if ids.is_empty() {
            return Err(AssignmentError::invalid_input(
                "assignmentIds",
                "at least one assignment id is required",
            ));
        }
        let uuids: Vec<Uuid> = ids.iter().map(AssignmentId::as_uuid).collect();

        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(store_err)?;

        // Lock in id order so concurrent completions cannot deadlock.
        let rows = tx
            .query(
                "SELECT id, completed FROM assignments WHERE id = ANY($1) ORDER BY id FOR UPDATE",
                &[&uuids],
            )
            .await
            .map_err(store_err)?;

        let mut completed: HashMap<Uuid, bool> = HashMap::with_capacity(rows.len());
        for row in &rows {
            completed.insert(column(row, "id")?, column(row, "completed")?);
        }
        for id in ids {
            match completed.get(&id.as_uuid()) {
                None => return Err(AssignmentError::not_found("Assignment", id)),
                Some(true) => return Err(AssignmentError::already_completed(id)),
                Some(false) => {}
            }
        }

        let results = ParticipantResults::new(ids.to_vec(), submission.clone(), now);
        let profile = &submission.profile;
        let group = submission.group.as_ref().map(GroupId::as_str);

        tx.execute(
            &format!(
                "INSERT INTO participant_results ({}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                RESULTS_COLUMNS
            ),
            &[
                &results.id.as_uuid(),
                &uuids,
                &group,
                &profile.years_programming,
                &profile.age,
                &profile.sex.as_db_str(),
                &profile.language.as_db_str(),
                &profile.email,
                &submission.accuracy,
                &submission.task_accuracy,
                &submission.question_ids,
                &submission.durations_ms,
                &submission.total_time_ms,
                &now,
            ],
        )
        .await
        .map_err(store_err)?;

        let question_rows = submission.question_rows();
        if !question_rows.is_empty() {
            let positions: Vec<i32> = question_rows.iter().map(|q| q.position).collect();
            tx.execute(
                "INSERT INTO participant_question_results \
                     (result_id, position, question_id, correct, duration_ms) \
                 SELECT $1, p, q, c, d \
                 FROM UNNEST($2::INTEGER[], $3::INTEGER[], $4::BOOLEAN[], $5::BIGINT[]) AS t(p, q, c, d)",
                &[
                    &results.id.as_uuid(),
                    &positions,
                    &submission.question_ids,
                    &submission.task_accuracy,
                    &submission.durations_ms,
                ],
            )
            .await
            .map_err(store_err)?;
        }

        tx.execute(
            "UPDATE assignments SET completed = TRUE, abandoned = FALSE WHERE id = ANY($1)",
            &[&uuids],
        )
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(results)
    }

    async fn get_results(&self, id: ResultId) -> AssignmentResult<Option<ParticipantResults>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM participant_results WHERE id = $1", RESULTS_COLUMNS),
                &[&id.as_uuid()],
            )
            .await
            .map_err(store_err)?;
        row.as_ref().map(results_from_row).transpose()
    }

    async fn mark_stale_abandoned(&self, cutoff: Timestamp) -> AssignmentResult<Vec<AssignmentRecord>> {
        self.sweep_stale(
            &format!(
                "UPDATE assignments SET abandoned = TRUE \
                 WHERE NOT completed AND NOT abandoned AND claimed_at < $1 \
                 RETURNING {}",
                ASSIGNMENT_COLUMNS
            ),
            cutoff,
        )
        .await
    }

    async fn delete_stale(&self, cutoff: Timestamp) -> AssignmentResult<Vec<AssignmentRecord>> {
        self.sweep_stale(
            &format!(
                "DELETE FROM assignments \
                 WHERE NOT completed AND NOT abandoned AND claimed_at < $1 \
                 RETURNING {}",
                ASSIGNMENT_COLUMNS
            ),
            cutoff,
        )
        .await
    }

    async fn group_loads(&self) -> AssignmentResult<HashMap<GroupId, GroupLoad>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "SELECT group_name, \
                        COUNT(*) FILTER (WHERE NOT abandoned) AS active, \
                        COUNT(*) FILTER (WHERE completed) AS completed, \
                        COUNT(*) FILTER (WHERE abandoned) AS abandoned \
                 FROM assignments GROUP BY group_name",
                &[],
            )
            .await
            .map_err(store_err)?;

        let mut loads = HashMap::with_capacity(rows.len());
        for row in &rows {
            let group: String = column(row, "group_name")?;
            let active: i64 = column(row, "active")?;
            let completed: i64 = column(row, "completed")?;
            let abandoned: i64 = column(row, "abandoned")?;
            loads.insert(
                parse_group(&group)?,
                GroupLoad {
                    active: active.max(0) as u64,
                    completed: completed.max(0) as u64,
                    abandoned: abandoned.max(0) as u64,
                },
            );
        }
        Ok(loads)
    }

    async fn health_check(&self) -> AssignmentResult<()> {
        let conn = self.get_conn().await?;
        conn.execute("SELECT 1", &[]).await.map_err(store_err)?;
        Ok(())
    }
}

// ============================================================================
// ALLOCATION SESSION / TRANSACTION
// ============================================================================

struct PgSession {
    conn: deadpool_postgres::Object,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn begin_allocation<'a>(&'a mut self) -> AssignmentResult<Box<dyn AllocationTx + 'a>> {
        let tx = self.conn.transaction().await.map_err(store_err)?;
        let lock = AdvisoryLockName::ASSIGNMENT_BALANCER;
        // Blocks until every other allocator has committed or rolled back.
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&lock.key])
            .await
            .map_err(store_err)?;
        tracing::trace!(lock = lock.name, "advisory lock acquired");
        Ok(Box::new(PgAllocationTx { tx: Some(tx) }))
    }
}

struct PgAllocationTx<'a> {
    tx: Option<deadpool_postgres::Transaction<'a>>,
}

impl<'a> PgAllocationTx<'a> {
    fn tx(&self) -> AssignmentResult<&deadpool_postgres::Transaction<'a>> {
        self.tx
            .as_ref()
            .ok_or_else(|| AssignmentError::storage("allocation transaction already finished"))
    }
}

#[async_trait]
impl AllocationTx for PgAllocationTx<'_> {
    async fn active_counts(&mut self) -> AssignmentResult<HashMap<GroupId, u64>> {
        let rows = self
            .tx()?
            .query(
                "SELECT group_name, COUNT(*) AS active FROM assignments \
                 WHERE NOT abandoned GROUP BY group_name",
                &[],
            )
            .await
            .map_err(store_err)?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in &rows {
            let group: String = column(row, "group_name")?;
            let active: i64 = column(row, "active")?;
            counts.insert(parse_group(&group)?, active.max(0) as u64);
        }
        Ok(counts)
    }

    async fn oldest_abandoned(&mut self, group: &GroupId) -> AssignmentResult<Option<AssignmentRecord>> {
        let row = self
            .tx()?
            .query_opt(
                &format!(
                    "SELECT {} FROM assignments WHERE group_name = $1 AND abandoned \
                     ORDER BY rotation_counter ASC LIMIT 1 FOR UPDATE",
                    ASSIGNMENT_COLUMNS
                ),
                &[&group.as_str()],
            )
            .await
            .map_err(store_err)?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn reclaim(&mut self, id: AssignmentId, now: Timestamp) -> AssignmentResult<AssignmentRecord> {
        // The slot moves to a fresh id; a late submission under the old one
        // then finds nothing to complete.
        let fresh = AssignmentId::now_v7();
        let row = self
            .tx()?
            .query_opt(
                &format!(
                    "UPDATE assignments SET id = $3, abandoned = FALSE, completed = FALSE, claimed_at = $2 \
                     WHERE id = $1 AND abandoned RETURNING {}",
                    ASSIGNMENT_COLUMNS
                ),
                &[&id.as_uuid(), &now, &fresh.as_uuid()],
            )
            .await
            .map_err(store_err)?;
        match row {
            Some(row) => assignment_from_row(&row),
            None => Err(AssignmentError::storage(format!(
                "assignment {} is not abandoned",
                id
            ))),
        }
    }

    async fn max_rotation_counter(&mut self, group: &GroupId) -> AssignmentResult<Option<i64>> {
        let row = self
            .tx()?
            .query_one(
                "SELECT MAX(rotation_counter) AS max_counter FROM assignments WHERE group_name = $1",
                &[&group.as_str()],
            )
            .await
            .map_err(store_err)?;
        column(&row, "max_counter")
    }

    async fn insert(&mut self, record: &AssignmentRecord) -> AssignmentResult<()> {
        self.tx()?
            .execute(
                &format!(
                    "INSERT INTO assignments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    ASSIGNMENT_COLUMNS
                ),
                &[
                    &record.id.as_uuid(),
                    &record.group.as_str(),
                    &record.rotation_counter,
                    &record.completed,
                    &record.abandoned,
                    &record.created_at,
                    &record.claimed_at,
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn commit(&mut self) -> AssignmentResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AssignmentError::storage("allocation transaction already finished"))?;
        tx.commit().await.map_err(store_err)
    }
}
