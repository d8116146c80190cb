use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::Migrator, Pool, Sqlite};

use crate::utils::errors::StoreError;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct DbPool {
    pub pool: Pool<Sqlite>,
}

impl DbPool {
    pub async fn new(database_url: &str) -> Result<DbPool, StoreError> {
        let pool = SqlitePoolOptions::new().connect(database_url).await?;
        MIGRATOR.run(&pool).await?;
        Ok(DbPool { pool })
    }

    /// A private in-memory database, for tests and local experiments. The
    /// pool is capped at one connection so every query sees the same
    /// database.
    pub async fn in_memory() -> Result<DbPool, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(DbPool { pool })
    }
}
