//! Catalog of known applications and services.
//!
//! Rows are created lazily the first time a name shows up in an accepted
//! upload. The upserts take a connection rather than the pool so they run
//! inside the upload transaction and roll back with it.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::Result;
use crate::models::{format_ts_iso, Application, Service};

/// Returns the application row, creating it if needed.
pub async fn ensure_application(conn: &mut SqliteConnection, name: &str) -> Result<Application> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO applications (name, created_at, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT name, description, created_at, updated_at FROM applications WHERE name = ?",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;
    Ok(application_from_row(&row))
}

/// Returns the service row under `application`, creating it if needed.
///
/// The application row must already exist.
pub async fn ensure_service(
    conn: &mut SqliteConnection,
    name: &str,
    application: &str,
) -> Result<Service> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO services (name, application, created_at, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(name, application) DO NOTHING",
    )
    .bind(name)
    .bind(application)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT name, application, description, created_at, updated_at
         FROM services WHERE name = ? AND application = ?",
    )
    .bind(name)
    .bind(application)
    .fetch_one(&mut *conn)
    .await?;
    Ok(service_from_row(&row))
}

pub async fn list_applications(pool: &SqlitePool) -> Result<Vec<Application>> {
    let rows = sqlx::query(
        "SELECT name, description, created_at, updated_at FROM applications ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(application_from_row).collect())
}

pub async fn list_services(pool: &SqlitePool, application: &str) -> Result<Vec<Service>> {
    let rows = sqlx::query(
        "SELECT name, application, description, created_at, updated_at
         FROM services WHERE application = ? ORDER BY name",
    )
    .bind(application)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(service_from_row).collect())
}

/// (applications, services) row counts.
pub async fn counts(pool: &SqlitePool) -> Result<(i64, i64)> {
    let apps: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications")
        .fetch_one(pool)
        .await?;
    let services: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services")
        .fetch_one(pool)
        .await?;
    Ok((apps, services))
}

fn application_from_row(row: &SqliteRow) -> Application {
    Application {
        name: row.get("name"),
        description: row.get("description"),
        created_at: format_ts_iso(row.get("created_at")),
        updated_at: format_ts_iso(row.get("updated_at")),
    }
}

fn service_from_row(row: &SqliteRow) -> Service {
    Service {
        name: row.get("name"),
        application: row.get("application"),
        description: row.get("description"),
        created_at: format_ts_iso(row.get("created_at")),
        updated_at: format_ts_iso(row.get("updated_at")),
    }
}
