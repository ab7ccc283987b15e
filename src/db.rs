use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::error::AppError;

pub type Db = Pool<Sqlite>;

pub async fn connect(url: &str) -> Result<Db, AppError> {
    let opts = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(opts).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
pub async fn connect_in_memory() -> Result<Db, AppError> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(db: &Db) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(db).await?;
    Ok(())
}

/// Current time as unix seconds, the unit every timestamp column uses.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
