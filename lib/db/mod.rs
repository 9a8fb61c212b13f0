pub mod models;
pub mod schema;
#[cfg(feature = "sqlite-tests")]
pub mod sqlite_test;

use diesel::Connection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::deadpool::{BuildError, Pool, PoolError};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncMysqlConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use thiserror::Error;

pub type DbPool = Pool<AsyncMysqlConnection>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to build database pool: {0}")]
    PoolBuild(#[from] BuildError),

    #[error("database unreachable: {0}")]
    Unreachable(#[from] PoolError),

    #[error("database connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("migration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Builds the MySQL pool.
///
/// Everything runs sequentially, so a couple of connections are plenty; the second one covers
/// a connection being recycled mid-run.
pub fn build_db_pool(db_url: &str, max_size: usize) -> Result<DbPool, DbError> {
    let manager = AsyncDieselConnectionManager::<AsyncMysqlConnection>::new(db_url);
    Ok(Pool::builder(manager).max_size(max_size.max(1)).build()?)
}

/// Checks out one connection so an unreachable database fails the run before any work starts.
pub async fn verify_connectivity(pool: &DbPool) -> Result<(), DbError> {
    let _conn = pool.get().await?;
    Ok(())
}

/// Applies the embedded migrations on a blocking thread through the sync wrapper.
pub async fn run_migrations(db_url: &str) -> Result<usize, DbError> {
    let db_url = db_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = AsyncConnectionWrapper::<AsyncMysqlConnection>::establish(&db_url)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| DbError::Migration(err.to_string()))?;
        Ok(applied.len())
    })
    .await?
}
