//! Ingestion state store
//!
//! One row per watched file in the `state` table: identity (`file_path`),
//! change signature (`etag`), lifecycle `status`, and the retry budget.
//! A file is eligible for (re)processing iff its status is not `ready` and
//! it has fewer than [`MAX_RETRIES`] failed attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ifr_common::{IfrError, Result};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::debug;

use super::db_err;

/// Retry budget per file; at this count a file is abandoned.
pub const MAX_RETRIES: i32 = 3;

/// File lifecycle status.
///
/// Progression is strictly forward: each pipeline stage advances exactly
/// one step on success. `Ready` is terminal; only a fresh upsert from the
/// change detector moves a file back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Extracting,
    Transforming,
    Loading,
    Ready,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Extracting => "extracting",
            FileStatus::Transforming => "transforming",
            FileStatus::Loading => "loading",
            FileStatus::Ready => "ready",
        }
    }

    /// The next status in the pipeline progression, if any.
    pub fn next(&self) -> Option<FileStatus> {
        match self {
            FileStatus::Pending => Some(FileStatus::Extracting),
            FileStatus::Extracting => Some(FileStatus::Transforming),
            FileStatus::Transforming => Some(FileStatus::Loading),
            FileStatus::Loading => Some(FileStatus::Ready),
            FileStatus::Ready => None,
        }
    }
}

impl std::str::FromStr for FileStatus {
    type Err = IfrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "extracting" => Ok(FileStatus::Extracting),
            "transforming" => Ok(FileStatus::Transforming),
            "loading" => Ok(FileStatus::Loading),
            "ready" => Ok(FileStatus::Ready),
            other => Err(IfrError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `state` table.
#[derive(Debug, Clone)]
pub struct FileState {
    pub file_path: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub status: FileStatus,
    pub retries: i32,
    pub last_checked: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileState {
    /// The eligibility predicate: not terminal and retry budget remaining.
    pub fn is_eligible(&self) -> bool {
        self.status != FileStatus::Ready && self.retries < MAX_RETRIES
    }
}

impl FromRow<'_, PgRow> for FileState {
    fn from_row(row: &PgRow) -> std::result::Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(FileState {
            file_path: row.try_get("file_path")?,
            etag: row.try_get("etag")?,
            last_modified: row.try_get("last_modified")?,
            status: status
                .parse()
                .map_err(|e: IfrError| sqlx::Error::Decode(Box::new(e)))?,
            retries: row.try_get("retries")?,
            last_checked: row.try_get("last_checked")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Upsert payload emitted by the change detector.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub file_path: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
}

/// Advisory-lock claim on one file for the duration of its pipeline stages.
///
/// The lock is session-scoped, so the claim pins a pool connection until it
/// is released. Callers must release on every exit path; the claim is not
/// released implicitly on drop because the pooled session outlives it.
pub struct FileClaim {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    file_path: String,
}

impl FileClaim {
    pub async fn release(mut self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
            .bind(&self.file_path)
            .execute(&mut *self.conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Object-safe handle over a held claim, for callers that take claims
/// through [`StateBackend`].
#[async_trait]
pub trait ClaimHandle: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
impl ClaimHandle for FileClaim {
    async fn release(self: Box<Self>) -> Result<()> {
        FileClaim::release(*self).await
    }
}

/// State-table operations the pipeline driver depends on, as a seam so the
/// driver can be exercised against an in-memory double.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn list_eligible(&self) -> Result<Vec<String>>;

    async fn try_claim(&self, file_path: &str) -> Result<Option<Box<dyn ClaimHandle>>>;

    async fn set_status(&self, file_path: &str, status: FileStatus) -> Result<()>;

    async fn increment_retries(&self, file_path: &str) -> Result<()>;
}

#[async_trait]
impl StateBackend for StateStore {
    async fn list_eligible(&self) -> Result<Vec<String>> {
        StateStore::list_eligible(self).await
    }

    async fn try_claim(&self, file_path: &str) -> Result<Option<Box<dyn ClaimHandle>>> {
        let claim = StateStore::try_claim(self, file_path).await?;
        Ok(claim.map(|c| Box::new(c) as Box<dyn ClaimHandle>))
    }

    async fn set_status(&self, file_path: &str, status: FileStatus) -> Result<()> {
        StateStore::set_status(self, file_path, status).await
    }

    async fn increment_retries(&self, file_path: &str) -> Result<()> {
        StateStore::increment_retries(self, file_path).await
    }
}

/// Persistent registry of every watched file.
#[derive(Clone)]
pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, file_path: &str) -> Result<Option<FileState>> {
        sqlx::query_as::<_, FileState>(
            r#"
            SELECT file_path, etag, last_modified, status, retries,
                   last_checked, created_at, updated_at
            FROM state
            WHERE file_path = $1
            "#,
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Insert or overwrite a file's row, marking it `pending` with a fresh
    /// retry budget. Atomic per file: concurrent watch cycles against the
    /// same path cannot produce lost updates.
    pub async fn upsert(&self, change: &FileChange) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO state (file_path, etag, last_modified, status, retries, last_checked)
            VALUES ($1, $2, $3, 'pending', 0, $4)
            ON CONFLICT (file_path) DO UPDATE
            SET etag = EXCLUDED.etag,
                last_modified = EXCLUDED.last_modified,
                status = 'pending',
                retries = 0,
                last_checked = EXCLUDED.last_checked,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&change.file_path)
        .bind(&change.etag)
        .bind(change.last_modified)
        .bind(change.last_checked)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(file_path = %change.file_path, "state upserted to pending");
        Ok(())
    }

    /// Transition a file's status. A missing row is a tolerated no-op: a
    /// race with external deletion is not worth failing a run over.
    pub async fn set_status(&self, file_path: &str, status: FileStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE state
            SET status = $1, updated_at = CURRENT_TIMESTAMP
            WHERE file_path = $2
            "#,
        )
        .bind(status.as_str())
        .bind(file_path)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Atomically add one failed attempt. Status is left untouched, so the
    /// file stays eligible until the budget runs out.
    pub async fn increment_retries(&self, file_path: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE state
            SET retries = retries + 1, updated_at = CURRENT_TIMESTAMP
            WHERE file_path = $1
            "#,
        )
        .bind(file_path)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// All files still needing work: not `ready`, retry budget remaining.
    pub async fn list_eligible(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT file_path
            FROM state
            WHERE status != 'ready' AND retries < $1
            ORDER BY file_path
            "#,
        )
        .bind(MAX_RETRIES)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows)
    }

    /// Cheap existence probe over the same predicate as [`list_eligible`],
    /// used by the trigger watcher to decide whether to start a run at all.
    ///
    /// [`list_eligible`]: StateStore::list_eligible
    pub async fn has_eligible(&self) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM state WHERE status != 'ready' AND retries < $1
            )
            "#,
        )
        .bind(MAX_RETRIES)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(exists)
    }

    /// Files that exhausted their retry budget without reaching `ready`.
    /// These never reappear in `list_eligible`; the watcher logs them so
    /// abandonment is observable rather than silent.
    pub async fn list_abandoned(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT file_path
            FROM state
            WHERE status != 'ready' AND retries >= $1
            ORDER BY file_path
            "#,
        )
        .bind(MAX_RETRIES)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows)
    }

    /// Operator recovery path for abandoned files: zero the retry counter
    /// and mark the file `pending` again. Returns false if the path is
    /// unknown.
    pub async fn reset_retries(&self, file_path: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE state
            SET retries = 0, status = 'pending', updated_at = CURRENT_TIMESTAMP
            WHERE file_path = $1
            "#,
        )
        .bind(file_path)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Claim a file against loosely-concurrent runs via a session advisory
    /// lock keyed on the path. Returns `None` when another run holds it.
    pub async fn try_claim(&self, file_path: &str) -> Result<Option<FileClaim>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;

        let locked = sqlx::query_scalar::<_, bool>(
            "SELECT pg_try_advisory_lock(hashtext($1)::bigint)",
        )
        .bind(file_path)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;

        if locked {
            Ok(Some(FileClaim {
                conn,
                file_path: file_path.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}
