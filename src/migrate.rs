use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Times are unix milliseconds; delete_time is NULL for live rows.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            name TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            create_time INTEGER NOT NULL,
            update_time INTEGER NOT NULL,
            delete_time INTEGER,
            properties_json TEXT NOT NULL DEFAULT '{}',
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_delete_time ON items(delete_time)")
        .execute(pool)
        .await?;

    Ok(())
}
