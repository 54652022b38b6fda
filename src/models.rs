//! Core data models used throughout apivault.
//!
//! These types represent the catalog entries, schema versions, and derived
//! metadata that flow through the upload and query paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The (application, service) pair that scopes a version sequence.
///
/// An absent service is the application-level namespace. Names are trimmed
/// here, so reads and writes agree; a blank service folds into the
/// application namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub application: String,
    pub service: Option<String>,
}

impl SchemaKey {
    pub fn new(application: impl Into<String>, service: Option<&str>) -> Self {
        let application: String = application.into();
        Self {
            application: application.trim().to_string(),
            service: service
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(s) => write!(f, "{}/{}", self.application, s),
            None => write!(f, "{}", self.application),
        }
    }
}

/// Source syntax of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFormat {
    Json,
    Yaml,
}

impl SchemaFormat {
    /// Picks the format from a file name's extension (`json`, `yaml`, `yml`).
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Self::Json),
            "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Structural summary derived from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    /// Value of `openapi` or `swagger`, or `"unknown"`.
    pub open_api_version: String,
    pub title: String,
    /// The API's own declared version (`info.version`).
    pub version: String,
    pub servers: Vec<String>,
    pub paths_count: usize,
    pub components_count: usize,
}

/// Catalog entry for an application.
#[derive(Debug, Clone, Serialize)]
pub struct Application {
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Catalog entry for a service, scoped under an application.
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub name: String,
    pub application: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A stored schema version, including the full document.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaVersion {
    pub application: String,
    pub service: Option<String>,
    pub version: i64,
    pub schema_type: SchemaFormat,
    pub original_file_name: String,
    #[serde(skip)]
    pub file_path: String,
    pub schema: serde_json::Value,
    pub metadata: SchemaMetadata,
    #[serde(skip)]
    pub is_latest: bool,
    pub uploaded_at: String,
}

/// Listing projection of a schema version. Carries no document body.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaVersionSummary {
    pub version: i64,
    pub schema_type: SchemaFormat,
    pub original_file_name: String,
    pub is_latest: bool,
    pub metadata: SchemaMetadata,
    pub uploaded_at: String,
}

/// A version row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewSchemaVersion {
    pub key: SchemaKey,
    pub version: i64,
    pub schema_type: SchemaFormat,
    pub original_file_name: String,
    pub file_path: String,
    pub content: serde_json::Value,
    pub content_hash: Option<String>,
    pub metadata: SchemaMetadata,
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
