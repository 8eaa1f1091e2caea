use std::{path::Path, time::Duration};

use sqlx::{
    Error, Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};

pub mod models;

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    fn pool_options() -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(20)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .acquire_timeout(Duration::from_secs(30))
    }

    fn connect_options(database_path: &Path) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .synchronous(SqliteSynchronous::Normal)
    }

    /// Opens (or creates) the database file and applies pending migrations.
    pub async fn new(database_path: &Path) -> Result<DBService, Error> {
        let pool = Self::pool_options()
            .connect_with(Self::connect_options(database_path))
            .await?;
        Self::migrate(&pool).await?;
        sqlx::query("PRAGMA optimize").execute(&pool).await?;
        tracing::debug!(path = %database_path.display(), "Database ready");
        Ok(DBService { pool })
    }

    /// Wraps an existing pool. Migrations are the caller's responsibility.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        DBService { pool }
    }

    pub async fn migrate(pool: &Pool<Sqlite>) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }
}

/// True when the error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
