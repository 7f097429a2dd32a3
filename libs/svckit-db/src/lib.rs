//! Datastore collaborator for svckit.
//!
//! A thin wrapper over an SQLx SQLite pool with typed connect options,
//! scoped per-request transactions and recovery of unique-constraint
//! metadata. Handlers never touch the pool directly: the scoped-database
//! middleware checks a transaction out at the start of a request and
//! guarantees its release on every exit path.

use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// A transaction scoped to a single request.
///
/// Dropping it without an explicit commit rolls the transaction back,
/// which is the backstop for panics and client disconnects.
pub type ScopedTx = sqlx::Transaction<'static, sqlx::Sqlite>;

/// Pool construction options.
#[derive(Debug, Clone)]
pub struct ConnectOpts {
    /// Maximum number of connections in the pool.
    pub max_conns: u32,
    /// Timeout to acquire a connection from the pool.
    pub acquire_timeout: Duration,
    /// Idle timeout before a connection is closed, `None` to keep forever.
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime for a connection, `None` for unlimited.
    pub max_lifetime: Option<Duration>,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            max_conns: 5,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl ConnectOpts {
    /// Options suitable for an in-memory database: a single connection
    /// that is never recycled, so the database outlives individual
    /// checkouts.
    pub fn in_memory() -> Self {
        Self {
            max_conns: 1,
            idle_timeout: None,
            max_lifetime: None,
            ..Self::default()
        }
    }
}

/// Handle to the connection pool.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn connect(dsn: &str, opts: ConnectOpts) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(opts.max_conns)
            .acquire_timeout(opts.acquire_timeout)
            .idle_timeout(opts.idle_timeout)
            .max_lifetime(opts.max_lifetime)
            .connect(dsn)
            .await
            .map_err(DbError::Connect)?;
        tracing::debug!(dsn, "database pool created");
        Ok(Self { pool })
    }

    /// Begin a scoped transaction.
    pub async fn begin(&self) -> Result<ScopedTx> {
        Ok(self.pool.begin().await?)
    }

    /// Run a multi-statement SQL script, e.g. schema setup in tests.
    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Recover the column behind a unique-constraint violation.
///
/// SQLite reports `UNIQUE constraint failed: <table>.<column>`; the column
/// is taken from that diagnostic rather than guessed from the payload.
/// Returns `None` when the error is not a unique violation or the message
/// has an unexpected shape.
pub fn unique_violation_column(err: &sqlx::Error) -> Option<String> {
    let db_err = match err {
        sqlx::Error::Database(e) => e,
        _ => return None,
    };
    if !matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) {
        return None;
    }
    let msg = db_err.message();
    let target = msg.rsplit(':').next()?.trim();
    let column = target.rsplit('.').next()?.trim();
    if column.is_empty() {
        None
    } else {
        Some(column.to_string())
    }
}
