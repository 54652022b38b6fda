//! Version store: the versioning engine.
//!
//! Each key owns a contiguous sequence of immutable version rows. Exactly one
//! of them carries the latest flag, and it is always the highest version.
//!
//! The only mutation path is
//! [`resolve_candidate_version`] → [`commit_new_version`], executed on one
//! transaction while the caller holds the key's lock from [`KeyLocks`].
//! The unique indexes created by the migrations back this up across
//! processes: a writer that slips past both fails on insert instead of
//! producing a duplicate version or a second latest row.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use crate::canonical::has_changed;
use crate::error::{RegistryError, Result};
use crate::models::{
    format_ts_iso, NewSchemaVersion, SchemaFormat, SchemaKey, SchemaMetadata, SchemaVersion,
    SchemaVersionSummary,
};

/// One async mutex per key, handed out on demand.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<SchemaKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &SchemaKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Entries nobody holds or waits on can go.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Outcome of comparing a candidate document with the key's latest version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub version: i64,
    pub is_new: bool,
    /// Row id of the current latest version that a commit must demote.
    pub superseded: Option<String>,
}

/// Decides the version number for `candidate`. Performs no writes.
pub async fn resolve_candidate_version(
    conn: &mut SqliteConnection,
    key: &SchemaKey,
    candidate: &Value,
) -> Result<Resolution> {
    let latest = sqlx::query(
        "SELECT id, version, content_json FROM schema_versions
         WHERE application = ? AND service IS ? AND is_latest = 1",
    )
    .bind(&key.application)
    .bind(key.service())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = latest else {
        return Ok(Resolution {
            version: 1,
            is_new: true,
            superseded: None,
        });
    };

    let id: String = row.get("id");
    let version: i64 = row.get("version");
    let content_json: String = row.get("content_json");

    let changed = match serde_json::from_str::<Value>(&content_json) {
        Ok(stored) => has_changed(candidate, &stored),
        Err(_) => true,
    };

    if changed {
        Ok(Resolution {
            version: version + 1,
            is_new: true,
            superseded: Some(id),
        })
    } else {
        Ok(Resolution {
            version,
            is_new: false,
            superseded: None,
        })
    }
}

/// Demotes the superseded latest row (if any) and inserts the new latest.
pub async fn commit_new_version(
    conn: &mut SqliteConnection,
    new: &NewSchemaVersion,
    superseded: Option<&str>,
) -> Result<()> {
    if let Some(id) = superseded {
        let demoted = sqlx::query(
            "UPDATE schema_versions SET is_latest = 0 WHERE id = ? AND is_latest = 1",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        if demoted.rows_affected() != 1 {
            return Err(RegistryError::Persistence(format!(
                "latest version of {} changed concurrently",
                new.key
            )));
        }
    }

    let content_json = serde_json::to_string(&new.content)?;
    let metadata_json = serde_json::to_string(&new.metadata)?;

    sqlx::query(
        r#"
        INSERT INTO schema_versions (id, application, service, version, schema_type,
                                     original_file_name, file_path, content_json,
                                     content_hash, metadata_json, is_latest, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&new.key.application)
    .bind(new.key.service())
    .bind(new.version)
    .bind(new.schema_type.as_str())
    .bind(&new.original_file_name)
    .bind(&new.file_path)
    .bind(&content_json)
    .bind(&new.content_hash)
    .bind(&metadata_json)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

const FULL_COLUMNS: &str = "application, service, version, schema_type, original_file_name, \
                            file_path, content_json, metadata_json, is_latest, uploaded_at";

pub async fn get_latest(pool: &SqlitePool, key: &SchemaKey) -> Result<Option<SchemaVersion>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM schema_versions WHERE application = ? AND service IS ? AND is_latest = 1",
        FULL_COLUMNS
    ))
    .bind(&key.application)
    .bind(key.service())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(version_from_row).transpose()
}

pub async fn get_version(
    pool: &SqlitePool,
    key: &SchemaKey,
    version: i64,
) -> Result<Option<SchemaVersion>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM schema_versions WHERE application = ? AND service IS ? AND version = ?",
        FULL_COLUMNS
    ))
    .bind(&key.application)
    .bind(key.service())
    .bind(version)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(version_from_row).transpose()
}

/// All versions of a key, newest first, without document bodies.
pub async fn list_versions(pool: &SqlitePool, key: &SchemaKey) -> Result<Vec<SchemaVersionSummary>> {
    let rows = sqlx::query(
        "SELECT version, schema_type, original_file_name, is_latest, metadata_json, uploaded_at
         FROM schema_versions WHERE application = ? AND service IS ?
         ORDER BY version DESC",
    )
    .bind(&key.application)
    .bind(key.service())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(SchemaVersionSummary {
                version: row.get("version"),
                schema_type: format_from_row(row)?,
                original_file_name: row.get("original_file_name"),
                is_latest: row.get("is_latest"),
                metadata: metadata_from_row(row)?,
                uploaded_at: format_ts_iso(row.get("uploaded_at")),
            })
        })
        .collect()
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM schema_versions")
        .fetch_one(pool)
        .await?)
}

/// Every stored artifact location, for reconciliation against the disk.
pub async fn all_file_paths(pool: &SqlitePool) -> Result<Vec<(SchemaKey, i64, String)>> {
    let rows = sqlx::query(
        "SELECT application, service, version, file_path FROM schema_versions
         ORDER BY application, service, version",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| {
            let service: Option<String> = row.get("service");
            (
                SchemaKey::new(row.get::<String, _>("application"), service.as_deref()),
                row.get("version"),
                row.get("file_path"),
            )
        })
        .collect())
}

fn version_from_row(row: &SqliteRow) -> Result<SchemaVersion> {
    let content_json: String = row.get("content_json");
    Ok(SchemaVersion {
        application: row.get("application"),
        service: row.get("service"),
        version: row.get("version"),
        schema_type: format_from_row(row)?,
        original_file_name: row.get("original_file_name"),
        file_path: row.get("file_path"),
        schema: serde_json::from_str(&content_json)?,
        metadata: metadata_from_row(row)?,
        is_latest: row.get("is_latest"),
        uploaded_at: format_ts_iso(row.get("uploaded_at")),
    })
}

fn format_from_row(row: &SqliteRow) -> Result<SchemaFormat> {
    let raw: String = row.get("schema_type");
    SchemaFormat::parse(&raw)
        .ok_or_else(|| RegistryError::Persistence(format!("unknown schema_type '{}'", raw)))
}

fn metadata_from_row(row: &SqliteRow) -> Result<SchemaMetadata> {
    let raw: String = row.get("metadata_json");
    Ok(serde_json::from_str(&raw)?)
}
