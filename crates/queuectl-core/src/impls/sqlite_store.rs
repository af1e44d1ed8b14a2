//! SqliteJobStore - SQLite を正本とする JobStore / WorkerRegistry 実装
//!
//! # 並行性
//! - claim は `UPDATE ... WHERE state = 'pending' RETURNING ...` の 1 文で行い、返った行の有無で勝敗を判定
//! - WAL + busy_timeout で、複数プロセスの worker が同じ DB ファイルを共有できる
//!
//! # スキーマ移行
//! - `CREATE TABLE IF NOT EXISTS` の後、足りない列だけ `ALTER TABLE ADD COLUMN` する
//! - 既存の行は消さない（古いバージョンが作った DB もそのまま使える）

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::domain::{JobId, JobRecord, JobState, QueueError, Result, WorkerId, timestamp};
use crate::ports::{JobStore, WorkerRegistry};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 8;

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, available_at, \
                           claimed_by, last_error, created_at, updated_at";

/// Columns added after the first release of the schema, in the order they appeared.
const JOB_COLUMN_MIGRATIONS: [(&str, &str); 3] = [
    (
        "available_at",
        "ALTER TABLE jobs ADD COLUMN available_at TEXT",
    ),
    ("claimed_by", "ALTER TABLE jobs ADD COLUMN claimed_by TEXT"),
    ("last_error", "ALTER TABLE jobs ADD COLUMN last_error TEXT"),
];

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    available_at: Option<String>,
    claimed_by: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self> {
        let state = JobState::from_str(&row.state).map_err(|_| {
            QueueError::StoreFailure(format!("job '{}' has unknown state '{}'", row.id, row.state))
        })?;
        Ok(JobRecord {
            id: JobId::from(row.id),
            command: row.command,
            state,
            attempts: u32::try_from(row.attempts.max(0)).unwrap_or(u32::MAX),
            max_retries: u32::try_from(row.max_retries.max(0)).unwrap_or(u32::MAX),
            available_at: row.available_at.as_deref().map(timestamp::parse).transpose()?,
            claimed_by: row.claimed_by,
            last_error: row.last_error,
            created_at: timestamp::parse(&row.created_at)?,
            updated_at: timestamp::parse(&row.updated_at)?,
        })
    }
}

/// SQLite-backed store. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (or create) the database file at `db_path` and bring its schema up to date.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                QueueError::StoreFailure(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                QueueError::StoreFailure(format!(
                    "failed to open queue database {}: {e}",
                    db_path.display()
                ))
            })?;

        Self::new(pool).await
    }

    /// Transient database for tests. A single connection keeps the data alive.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, creating and migrating tables as needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::StoreFailure(format!("failed to create jobs table: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::StoreFailure(format!("failed to create config table: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workers (
                id TEXT PRIMARY KEY,
                pid INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                heartbeat_at TEXT NOT NULL,
                stop_requested INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::StoreFailure(format!("failed to create workers table: {e}")))?;

        self.migrate_job_columns().await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_claimable
             ON jobs(state, available_at, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::StoreFailure(format!("failed to create jobs index: {e}")))?;

        Ok(())
    }

    async fn migrate_job_columns(&self) -> Result<()> {
        for (column, alter_sql) in JOB_COLUMN_MIGRATIONS {
            if self.job_column_exists(column).await? {
                continue;
            }
            match sqlx::query(alter_sql).execute(&self.pool).await {
                Ok(_) => tracing::info!(column, "added column to jobs table"),
                // Another process migrated between our check and the ALTER.
                Err(e) if e.to_string().contains("duplicate column name") => {}
                Err(e) => {
                    return Err(QueueError::StoreFailure(format!(
                        "failed to add {column} column: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn job_column_exists(&self, column: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM pragma_table_info('jobs') WHERE name = ?1 LIMIT 1",
        )
        .bind(column)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::StoreFailure(format!("failed to inspect jobs columns: {e}")))?;
        Ok(found.is_some())
    }

    /// Terminal/retry writes are keyed by id only; a missing row means the job was
    /// deleted under us, which the caller should hear about.
    fn expect_one_row(id: &JobId, rows_affected: u64, op: &str) -> Result<()> {
        if rows_affected == 0 {
            return Err(QueueError::StoreFailure(format!(
                "{op}: job '{id}' does not exist"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &JobRecord) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, available_at,
                               claimed_by, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(job.id.as_str())
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_retries))
        .bind(job.available_at.map(timestamp::format))
        .bind(job.claimed_by.as_deref())
        .bind(job.last_error.as_deref())
        .bind(timestamp::format(job.created_at))
        .bind(timestamp::format(job.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::DuplicateId(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn find_next_claimable(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE state = 'pending' AND (available_at IS NULL OR available_at <= ?1)
             ORDER BY created_at ASC, rowid ASC
             LIMIT 1"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(timestamp::format(now))
            .fetch_optional(&self.pool)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn try_claim(
        &self,
        id: &JobId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let sql = format!(
            "UPDATE jobs SET state = 'processing', claimed_by = ?1, updated_at = ?2
             WHERE id = ?3 AND state = 'pending'
               AND (available_at IS NULL OR available_at <= ?2)
             RETURNING {JOB_COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(worker.to_string())
            .bind(timestamp::format(now))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn complete(&self, id: &JobId, attempts: u32, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'completed', attempts = ?1, available_at = NULL,
                             claimed_by = NULL, last_error = NULL, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(i64::from(attempts))
        .bind(timestamp::format(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Self::expect_one_row(id, result.rows_affected(), "complete")
    }

    async fn reschedule(
        &self,
        id: &JobId,
        attempts: u32,
        now: DateTime<Utc>,
        available_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', attempts = ?1, available_at = ?2,
                             claimed_by = NULL, last_error = ?3, updated_at = ?4
             WHERE id = ?5",
        )
        .bind(i64::from(attempts))
        .bind(timestamp::format(available_at))
        .bind(last_error)
        .bind(timestamp::format(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Self::expect_one_row(id, result.rows_affected(), "reschedule")
    }

    async fn kill(
        &self,
        id: &JobId,
        attempts: u32,
        now: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'dead', attempts = ?1, available_at = NULL,
                             claimed_by = NULL, last_error = ?2, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(i64::from(attempts))
        .bind(last_error)
        .bind(timestamp::format(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Self::expect_one_row(id, result.rows_affected(), "kill")
    }

    async fn revive_from_dead(&self, id: &JobId, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', attempts = 0, available_at = NULL,
                             claimed_by = NULL, last_error = NULL, updated_at = ?1
             WHERE id = ?2 AND state = 'dead'",
        )
        .bind(timestamp::format(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', claimed_by = NULL, updated_at = ?1
             WHERE state IN ('processing', 'failed')
               AND updated_at < ?2
               AND (claimed_by IS NULL
                    OR claimed_by NOT IN (SELECT id FROM workers WHERE heartbeat_at >= ?3))",
        )
        .bind(timestamp::format(now))
        .bind(timestamp::format(stale_before))
        .bind(timestamp::format(live_since))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_by_state(&self, state: JobState) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE state = ?1")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<JobRecord>> {
        let rows = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1
                     ORDER BY created_at ASC, rowid ASC"
                );
                sqlx::query_as::<_, JobRow>(&sql)
                    .bind(state.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC, rowid ASC");
                sqlx::query_as::<_, JobRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(JobRecord::try_from).collect()
    }
}

#[async_trait]
impl WorkerRegistry for SqliteJobStore {
    async fn register_worker(&self, worker: &WorkerId, pid: u32, now: DateTime<Utc>) -> Result<()> {
        let now = timestamp::format(now);
        sqlx::query(
            "INSERT OR REPLACE INTO workers (id, pid, started_at, heartbeat_at, stop_requested)
             VALUES (?1, ?2, ?3, ?3, 0)",
        )
        .bind(worker.to_string())
        .bind(i64::from(pid))
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(&self, worker: &WorkerId, now: DateTime<Utc>) -> Result<bool> {
        let stop = sqlx::query_scalar::<_, i64>(
            "UPDATE workers SET heartbeat_at = ?1 WHERE id = ?2 RETURNING stop_requested",
        )
        .bind(timestamp::format(now))
        .bind(worker.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(stop.is_some_and(|flag| flag != 0))
    }

    async fn deregister_worker(&self, worker: &WorkerId) -> Result<()> {
        sqlx::query("DELETE FROM workers WHERE id = ?1")
            .bind(worker.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn request_stop(&self, live_since: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("UPDATE workers SET stop_requested = 1 WHERE heartbeat_at >= ?1")
            .bind(timestamp::format(live_since))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_workers(&self, silent_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workers WHERE heartbeat_at < ?1")
            .bind(timestamp::format(silent_before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_live_workers(&self, since: DateTime<Utc>) -> Result<u64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM workers WHERE heartbeat_at >= ?1")
                .bind(timestamp::format(since))
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}
