//! On-disk artifact storage for schema versions.
//!
//! Layout under the storage root:
//!
//! ```text
//! {root}/{application}/schema_v{N}.{json|yaml}            # no service
//! {root}/{application}/{service}/schema_v{N}.{json|yaml}
//! ```
//!
//! Content is always written as pretty-printed JSON; the extension records
//! the syntax the document was uploaded in.
//!
//! Name components are sanitized to `[A-Za-z0-9_-]`. A component that had to
//! be rewritten also gets `~` plus a digest of the raw name appended, which
//! keeps `a.b` and `a_b` apart. Names that pass through untouched never
//! contain `~`.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{RegistryError, Result};
use crate::models::{SchemaFormat, SchemaKey};

const ARTIFACT_PREFIX: &str = "schema_v";
const TEMP_SUFFIX: &str = ".tmp";

/// Handle on a storage root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// Aggregate counts over the storage tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub total_applications: u64,
    pub total_services: u64,
    pub total_schemas: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Replaces unsafe characters, tagging rewritten names with a digest suffix.
pub fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized == name {
        return sanitized;
    }
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    format!("{}~{}", sanitized, &digest[..16])
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Storage location for one version of a key.
    pub fn location(&self, key: &SchemaKey, version: i64, format: SchemaFormat) -> PathBuf {
        let mut dir = self.root.join(sanitize_component(&key.application));
        if let Some(service) = key.service() {
            dir.push(sanitize_component(service));
        }
        dir.join(format!("{}{}.{}", ARTIFACT_PREFIX, version, format.as_str()))
    }

    /// Writes the document at `location`, replacing any previous file atomically.
    pub async fn save(&self, location: &Path, content: &Value) -> Result<()> {
        let parent = location
            .parent()
            .ok_or_else(|| RegistryError::Persistence("artifact location has no parent".into()))?;
        tokio::fs::create_dir_all(parent).await?;

        let body = serde_json::to_vec_pretty(content)?;
        let file_name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(
            ".{}.{}{}",
            file_name,
            uuid::Uuid::new_v4(),
            TEMP_SUFFIX
        ));

        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, location).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn read(&self, location: &Path) -> Result<Value> {
        Ok(serde_json::from_str(&self.read_text(location).await?)?)
    }

    /// The artifact file exactly as stored.
    pub async fn read_text(&self, location: &Path) -> Result<String> {
        tokio::fs::read_to_string(location).await.map_err(|e| {
            RegistryError::Persistence(format!("failed to read schema file: {}", e))
        })
    }

    /// Deletes an artifact. A file that is already gone is not an error.
    pub async fn remove(&self, location: &Path) -> Result<()> {
        match tokio::fs::remove_file(location).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, location: &Path) -> bool {
        tokio::fs::try_exists(location).await.unwrap_or(false)
    }

    /// Every artifact file under the root, plus leftover temp files from
    /// interrupted writes.
    pub async fn scan(&self) -> Result<ArtifactScan> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_tree(&root))
            .await
            .map_err(|e| RegistryError::Persistence(format!("scan task failed: {}", e)))?
    }

    /// Counts applications, services, and artifacts on disk.
    ///
    /// Diagnostic only: failures come back as zero counts with `error` set.
    pub async fn storage_stats(&self) -> StorageStats {
        let root = self.root.clone();
        let result = tokio::task::spawn_blocking(move || count_tree(&root)).await;
        match result {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => StorageStats {
                error: Some(e.to_string()),
                ..Default::default()
            },
            Err(e) => StorageStats {
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }
}

/// Result of walking the storage tree.
#[derive(Debug, Default)]
pub struct ArtifactScan {
    pub artifacts: Vec<PathBuf>,
    pub temp_files: Vec<PathBuf>,
}

fn scan_tree(root: &Path) -> Result<ArtifactScan> {
    let mut scan = ArtifactScan::default();
    if !root.exists() {
        return Ok(scan);
    }
    for entry in WalkDir::new(root).min_depth(2).max_depth(3) {
        let entry = entry.map_err(|e| RegistryError::Persistence(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(ARTIFACT_PREFIX) {
            scan.artifacts.push(entry.into_path());
        } else if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
            scan.temp_files.push(entry.into_path());
        }
    }
    scan.artifacts.sort();
    Ok(scan)
}

fn count_tree(root: &Path) -> std::io::Result<StorageStats> {
    let mut stats = StorageStats::default();
    for app in std::fs::read_dir(root)? {
        let app = app?;
        if !app.file_type()?.is_dir() {
            continue;
        }
        stats.total_applications += 1;
        for item in std::fs::read_dir(app.path())? {
            let item = item?;
            let name = item.file_name();
            if item.file_type()?.is_dir() {
                stats.total_services += 1;
                for schema in std::fs::read_dir(item.path())? {
                    if schema?
                        .file_name()
                        .to_string_lossy()
                        .starts_with(ARTIFACT_PREFIX)
                    {
                        stats.total_schemas += 1;
                    }
                }
            } else if name.to_string_lossy().starts_with(ARTIFACT_PREFIX) {
                stats.total_schemas += 1;
            }
        }
    }
    Ok(stats)
}
