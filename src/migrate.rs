use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates all tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create applications table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS applications (
            name TEXT PRIMARY KEY,
            description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create services table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS services (
            name TEXT NOT NULL,
            application TEXT NOT NULL,
            description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (name, application),
            FOREIGN KEY (application) REFERENCES applications(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create schema_versions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            id TEXT PRIMARY KEY,
            application TEXT NOT NULL,
            service TEXT,
            version INTEGER NOT NULL CHECK (version > 0),
            schema_type TEXT NOT NULL,
            original_file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            content_json TEXT NOT NULL,
            content_hash TEXT,
            metadata_json TEXT NOT NULL,
            is_latest INTEGER NOT NULL DEFAULT 1,
            uploaded_at INTEGER NOT NULL,
            FOREIGN KEY (application) REFERENCES applications(name),
            FOREIGN KEY (service, application) REFERENCES services(name, application)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (key, version), and at most one latest row per key.
    // A NULL service is the application-level namespace.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_schema_versions_key_version
        ON schema_versions(application, IFNULL(service, ''), version)
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_schema_versions_latest
        ON schema_versions(application, IFNULL(service, ''))
        WHERE is_latest = 1
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_services_application ON services(application)")
        .execute(pool)
        .await?;

    Ok(())
}
