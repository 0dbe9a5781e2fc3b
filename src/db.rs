use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;

/// Open the PostgreSQL connection pool. Acquired once at engine
/// construction and shared for the process lifetime.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}
