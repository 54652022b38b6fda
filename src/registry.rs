//! Upload orchestration and the read façade.
//!
//! [`SchemaRegistry`] is the handle everything else goes through: the HTTP
//! server holds one behind an `Arc`, the CLI opens one per command, and the
//! tests build one per temporary directory.
//!
//! # Upload ordering
//!
//! ```text
//! input checks → parse → validate → extract metadata      (no side effects)
//!   → key lock → BEGIN
//!       → catalog upsert → resolve version
//!       → unchanged? COMMIT, done
//!       → demote + insert → write artifact → COMMIT
//! ```
//!
//! Anything that fails before `BEGIN` leaves no trace. A failure inside the
//! transaction rolls back the catalog rows with it. If the commit itself
//! fails the freshly written artifact is removed. The one gap is a crash
//! between the artifact write and the commit, which leaves an orphan file on
//! disk; [`SchemaRegistry::reconcile`] finds and removes those, and restores
//! artifacts whose database row exists but whose file is missing.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactStore, StorageStats};
use crate::canonical;
use crate::catalog;
use crate::config::Config;
use crate::db;
use crate::error::{RegistryError, Result};
use crate::metadata::extract_metadata;
use crate::migrate;
use crate::models::{
    Application, NewSchemaVersion, SchemaFormat, SchemaKey, SchemaMetadata, SchemaVersion,
    SchemaVersionSummary, Service,
};
use crate::validator::{parse_document, OpenApiValidator, StructuralValidator};
use crate::versions::{self, KeyLocks};

/// A schema upload as received from a client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub application: String,
    pub service: Option<String>,
    pub file: Option<UploadedFile>,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Result of an accepted upload, new version or not.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub application: String,
    pub service: Option<String>,
    pub version: i64,
    pub is_new_version: bool,
    pub metadata: SchemaMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionListing {
    pub application: String,
    pub service: Option<String>,
    pub total_versions: usize,
    pub versions: Vec<SchemaVersionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceListing {
    pub application: String,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub applications: i64,
    pub services: i64,
    pub schema_versions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub database: DatabaseStats,
    pub file_system: StorageStats,
}

/// One check in a [`CheckReport`].
#[derive(Debug, Clone, Serialize)]
pub struct CheckDetail {
    pub id: String,
    pub name: String,
    pub status: String,
    pub info: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub total_checks: u32,
    pub passed: u32,
    pub failed: u32,
    pub details: Vec<CheckDetail>,
}

/// Re-validation of the latest stored artifact for a key.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub application: String,
    pub service: Option<String>,
    pub schema_version: i64,
    pub uploaded_at: String,
    pub file_name: String,
    /// Raw artifact text the check ran against. Empty if it could not be read.
    pub schema_content: String,
    pub schema_metadata: SchemaMetadata,
    pub summary: CheckSummary,
    pub ran_at: String,
}

/// What a reconciliation sweep found (and, unless dry-run, fixed).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Artifact files with no database row.
    pub orphaned_artifacts: Vec<String>,
    /// Database rows whose artifact file was missing.
    pub missing_artifacts: Vec<String>,
    /// Leftover temp files from interrupted writes.
    pub stale_temp_files: Vec<String>,
    pub dry_run: bool,
}

/// Files younger than this are left alone by the CLI sweep; they may belong
/// to an upload that is still committing in another process.
pub const DEFAULT_ORPHAN_MIN_AGE: Duration = Duration::from_secs(300);

pub struct SchemaRegistry {
    pool: SqlitePool,
    artifacts: ArtifactStore,
    validator: Arc<dyn StructuralValidator>,
    locks: KeyLocks,
    /// Uploads hold it shared; a reconciliation sweep holds it exclusively.
    sweep_gate: RwLock<()>,
    max_upload_bytes: usize,
}

impl SchemaRegistry {
    /// Connects to the configured database, applies migrations, and prepares
    /// the storage root. Uses the bundled [`OpenApiValidator`].
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let artifacts = ArtifactStore::new(config.storage.root.clone());
        artifacts.ensure_root().await?;
        Ok(Self::new(pool, artifacts, Arc::new(OpenApiValidator::new()))
            .with_max_upload_bytes(config.upload.max_bytes))
    }

    pub fn new(
        pool: SqlitePool,
        artifacts: ArtifactStore,
        validator: Arc<dyn StructuralValidator>,
    ) -> Self {
        Self {
            pool,
            artifacts,
            validator,
            locks: KeyLocks::new(),
            sweep_gate: RwLock::new(()),
            max_upload_bytes: usize::MAX,
        }
    }

    pub fn with_max_upload_bytes(mut self, max: usize) -> Self {
        self.max_upload_bytes = max;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Validates and stores an uploaded schema.
    ///
    /// Returns the existing version with `is_new_version = false` when the
    /// document is canonically equal to the key's latest version.
    pub async fn upload(&self, req: UploadRequest) -> Result<UploadOutcome> {
        let application = req.application.trim();
        if application.is_empty() {
            return Err(RegistryError::Input("Application name is required".into()));
        }
        let file = match req.file {
            Some(f) if !f.bytes.is_empty() => f,
            _ => return Err(RegistryError::Input("Schema file is required".into())),
        };
        let format = SchemaFormat::from_file_name(&file.file_name).ok_or_else(|| {
            RegistryError::Input(
                "Unsupported file format. Only JSON and YAML files are supported.".into(),
            )
        })?;
        if file.bytes.len() > self.max_upload_bytes {
            return Err(RegistryError::Input(format!(
                "File too large. Maximum size is {} bytes.",
                self.max_upload_bytes
            )));
        }

        let document = parse_document(&file.bytes, format)?;
        self.validator
            .validate(&document)
            .await
            .map_err(|details| RegistryError::validation("Schema validation failed", details))?;
        let metadata = extract_metadata(&document);

        let key = SchemaKey::new(application, req.service.as_deref());

        let _sweep = self.sweep_gate.read().await;
        let _guard = self.locks.lock(&key).await;

        let mut tx = self.pool.begin().await?;

        // The first statement is a write, so SQLite takes the write lock here
        // and the read in resolve_candidate_version sees a stable latest row.
        catalog::ensure_application(&mut tx, &key.application).await?;
        if let Some(service) = key.service() {
            catalog::ensure_service(&mut tx, service, &key.application).await?;
        }

        let resolution = versions::resolve_candidate_version(&mut tx, &key, &document).await?;
        if !resolution.is_new {
            tx.commit().await?;
            debug!(%key, version = resolution.version, "schema unchanged");
            return Ok(UploadOutcome {
                application: key.application.clone(),
                service: key.service.clone(),
                version: resolution.version,
                is_new_version: false,
                metadata,
            });
        }

        let location = self.artifacts.location(&key, resolution.version, format);
        let new = NewSchemaVersion {
            key: key.clone(),
            version: resolution.version,
            schema_type: format,
            original_file_name: file.file_name,
            file_path: location.to_string_lossy().into_owned(),
            content_hash: canonical::content_hash(&document),
            content: document,
            metadata: metadata.clone(),
        };
        versions::commit_new_version(&mut tx, &new, resolution.superseded.as_deref()).await?;

        // Dropping `tx` on error rolls everything back.
        self.artifacts.save(&location, &new.content).await?;

        if let Err(e) = tx.commit().await {
            warn!(%key, version = new.version, error = %e, "commit failed, removing artifact");
            if let Err(cleanup) = self.artifacts.remove(&location).await {
                warn!(path = %location.display(), error = %cleanup, "artifact cleanup failed");
            }
            return Err(e.into());
        }

        info!(%key, version = new.version, file = %new.file_path, "stored new schema version");
        Ok(UploadOutcome {
            application: key.application,
            service: key.service,
            version: new.version,
            is_new_version: true,
            metadata,
        })
    }

    pub async fn latest(&self, key: &SchemaKey) -> Result<SchemaVersion> {
        versions::get_latest(&self.pool, key)
            .await?
            .ok_or_else(|| RegistryError::NotFound("Schema not found".into()))
    }

    pub async fn version(&self, key: &SchemaKey, version: i64) -> Result<SchemaVersion> {
        versions::get_version(&self.pool, key, version)
            .await?
            .ok_or_else(|| RegistryError::NotFound("Schema version not found".into()))
    }

    /// Every version of `key`, newest first. Empty for an unknown key.
    pub async fn versions(&self, key: &SchemaKey) -> Result<VersionListing> {
        let versions = versions::list_versions(&self.pool, key).await?;
        Ok(VersionListing {
            application: key.application.clone(),
            service: key.service.clone(),
            total_versions: versions.len(),
            versions,
        })
    }

    pub async fn applications(&self) -> Result<Vec<Application>> {
        catalog::list_applications(&self.pool).await
    }

    pub async fn services(&self, application: &str) -> Result<ServiceListing> {
        let application = application.trim();
        Ok(ServiceListing {
            application: application.to_string(),
            services: catalog::list_services(&self.pool, application).await?,
        })
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        let (applications, services) = catalog::counts(&self.pool).await?;
        let schema_versions = versions::count(&self.pool).await?;
        Ok(RegistryStats {
            database: DatabaseStats {
                applications,
                services,
                schema_versions,
            },
            file_system: self.artifacts.storage_stats().await,
        })
    }

    /// Reads the latest artifact for `key` back from disk and re-validates it.
    pub async fn check_latest(&self, key: &SchemaKey) -> Result<CheckReport> {
        let latest = self.latest(key).await?;
        let location = PathBuf::from(&latest.file_path);

        let text = self.artifacts.read_text(&location).await;
        let outcome = match &text {
            Ok(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(doc) => self.validator.validate(&doc).await,
                Err(e) => Err(format!("stored artifact is not valid JSON: {}", e)),
            },
            Err(e) => Err(e.to_string()),
        };
        let detail = match &outcome {
            Ok(()) => CheckDetail {
                id: "openapi-1".into(),
                name: "OpenAPI schema validation".into(),
                status: "passed".into(),
                info: "Schema is valid".into(),
            },
            Err(msg) => CheckDetail {
                id: "openapi-1".into(),
                name: "OpenAPI schema validation".into(),
                status: "failed".into(),
                info: msg.clone(),
            },
        };
        let passed = u32::from(outcome.is_ok());

        Ok(CheckReport {
            application: latest.application,
            service: latest.service,
            schema_version: latest.version,
            uploaded_at: latest.uploaded_at,
            file_name: location
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            schema_content: text.unwrap_or_default(),
            schema_metadata: latest.metadata,
            summary: CheckSummary {
                total_checks: 1,
                passed,
                failed: 1 - passed,
                details: vec![detail],
            },
            ran_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Brings the storage tree back in line with the database.
    ///
    /// Artifact files without a row are deleted, rows without a file get
    /// their artifact rewritten from the stored content, and leftover temp
    /// files are removed. Files modified within `min_age` are skipped.
    pub async fn reconcile(&self, dry_run: bool, min_age: Duration) -> Result<ReconcileReport> {
        let _exclusive = self.sweep_gate.write().await;
        let mut report = ReconcileReport {
            dry_run,
            ..Default::default()
        };

        let rows = versions::all_file_paths(&self.pool).await?;
        let known: HashSet<PathBuf> = rows.iter().map(|(_, _, p)| PathBuf::from(p)).collect();
        let scan = self.artifacts.scan().await?;

        for path in scan.artifacts {
            if known.contains(&path) || !old_enough(&path, min_age) {
                continue;
            }
            report.orphaned_artifacts.push(path.display().to_string());
            if !dry_run {
                self.artifacts.remove(&path).await?;
                info!(path = %path.display(), "removed orphaned artifact");
            }
        }

        for path in scan.temp_files {
            if !old_enough(&path, min_age) {
                continue;
            }
            report.stale_temp_files.push(path.display().to_string());
            if !dry_run {
                self.artifacts.remove(&path).await?;
            }
        }

        for (key, version, file_path) in rows {
            let path = PathBuf::from(&file_path);
            if self.artifacts.exists(&path).await {
                continue;
            }
            report.missing_artifacts.push(file_path);
            if !dry_run {
                let stored = self.version(&key, version).await?;
                self.artifacts.save(&path, &stored.schema).await?;
                info!(%key, version, "restored missing artifact");
            }
        }

        Ok(report)
    }
}

fn old_enough(path: &std::path::Path, min_age: Duration) -> bool {
    if min_age.is_zero() {
        return true;
    }
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= min_age)
}
