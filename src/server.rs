//! HTTP API server.
//!
//! Exposes upload, query, catalog, and diagnostic endpoints as JSON over
//! HTTP. All handlers share one [`SchemaRegistry`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/schemas/upload` | Multipart upload (`application`, `service`, file field `spec`) |
//! | `GET`  | `/api/schemas/latest/{application}[/{service}]` | Latest version with full document |
//! | `GET`  | `/api/schemas/version/{application}/{version}[/{service}]` | One specific version |
//! | `GET`  | `/api/schemas/versions/{application}[/{service}]` | All versions, newest first, no bodies |
//! | `GET`  | `/api/applications` | Known applications |
//! | `GET`  | `/api/applications/{application}/services` | Services of one application |
//! | `GET`  | `/api/stats` | Database and storage counts |
//! | `POST` | `/api/tests/run` | Re-validate the latest stored artifact of a key |
//! | `GET`  | `/api/health` | Health check (returns version) |
//!
//! # Response Contract
//!
//! Success bodies are wrapped as `{ "success": true, "message"?: ..., "data": ... }`.
//! Errors look like:
//!
//! ```json
//! { "success": false, "error": { "code": "validation_failed", "message": "Schema validation failed", "details": "missing required object 'paths'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `validation_failed` (400),
//! `not_found` (404), `internal` (500).

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::RegistryError;
use crate::models::SchemaKey;
use crate::registry::{SchemaRegistry, UploadRequest, UploadedFile};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    registry: Arc<SchemaRegistry>,
    max_upload_bytes: usize,
}

/// Starts the HTTP server.
///
/// Opens the registry described by `config`, binds to `[server].bind`, and
/// serves until Ctrl-C, then closes the database pool.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let registry = Arc::new(SchemaRegistry::open(config).await?);
    let app = router(registry.clone(), config.upload.max_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "apivault listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    registry.close().await;
    Ok(())
}

/// Builds the router around an existing registry.
pub fn router(registry: Arc<SchemaRegistry>, max_upload_bytes: usize) -> Router {
    let state = AppState {
        registry,
        max_upload_bytes,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing adds a little on top of the file itself.
    let body_limit = max_upload_bytes.saturating_add(64 * 1024);

    Router::new()
        .route("/", get(handle_index))
        .route("/api/schemas/upload", post(handle_upload))
        .route("/api/schemas/latest/{application}", get(handle_latest))
        .route(
            "/api/schemas/latest/{application}/{service}",
            get(handle_latest_service),
        )
        .route(
            "/api/schemas/version/{application}/{version}",
            get(handle_version),
        )
        .route(
            "/api/schemas/version/{application}/{version}/{service}",
            get(handle_version_service),
        )
        .route("/api/schemas/versions/{application}", get(handle_versions))
        .route(
            "/api/schemas/versions/{application}/{service}",
            get(handle_versions_service),
        )
        .route("/api/applications", get(handle_applications))
        .route(
            "/api/applications/{application}/services",
            get(handle_services),
        )
        .route("/api/stats", get(handle_stats))
        .route("/api/tests/run", post(handle_run_check))
        .route("/api/health", get(handle_health))
        .fallback(handle_fallback)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

// ============ Response envelope ============

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: None,
        data,
    })
}

fn ok_with_message<T: Serialize>(message: &str, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: Some(message.to_string()),
        data,
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        details: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
        details: None,
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Input(message) => bad_request(message),
            RegistryError::Validation { message, details } => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "validation_failed".to_string(),
                message,
                details: Some(details),
            },
            RegistryError::NotFound(message) => not_found(message),
            RegistryError::Persistence(details) => {
                // Full cause stays in the log; clients get a fixed diagnostic.
                error!(error = %details, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message: "Internal server error".to_string(),
                    details: Some("storage operation failed".to_string()),
                }
            }
        }
    }
}

// ============ GET / ============

async fn handle_index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "apivault schema upload and versioning API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "upload": "POST /api/schemas/upload",
            "latest": "GET /api/schemas/latest/{application}/{service?}",
            "version": "GET /api/schemas/version/{application}/{version}/{service?}",
            "versions": "GET /api/schemas/versions/{application}/{service?}",
            "applications": "GET /api/applications",
            "services": "GET /api/applications/{application}/services",
            "stats": "GET /api/stats",
            "tests": "POST /api/tests/run",
            "health": "GET /api/health"
        }
    }))
}

// ============ POST /api/schemas/upload ============

/// Handler for `POST /api/schemas/upload`.
///
/// Reads the `application` and `service` text fields and the `spec` file
/// field. Answers 201 for a new version and 200 when the document matches
/// the current latest version.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let too_large = || {
        bad_request(format!(
            "File too large. Maximum size is {} bytes.",
            state.max_upload_bytes
        ))
    };
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            bad_request(format!("invalid multipart body: {}", e.body_text()))
        }
    };

    let mut application = String::new();
    let mut service: Option<String> = None;
    let mut file: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("application") => application = field.text().await.map_err(multipart_error)?,
            Some("service") => service = Some(field.text().await.map_err(multipart_error)?),
            Some("spec") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let outcome = state
        .registry
        .upload(UploadRequest {
            application,
            service,
            file,
        })
        .await?;

    let response = if outcome.is_new_version {
        (
            StatusCode::CREATED,
            ok_with_message("Schema uploaded successfully", outcome),
        )
            .into_response()
    } else {
        (
            StatusCode::OK,
            ok_with_message("Schema unchanged, no new version created", outcome),
        )
            .into_response()
    };
    Ok(response)
}

// ============ GET /api/schemas/latest ============

async fn handle_latest(
    State(state): State<AppState>,
    Path(application): Path<String>,
) -> Result<Response, AppError> {
    latest(&state, SchemaKey::new(application, None)).await
}

async fn handle_latest_service(
    State(state): State<AppState>,
    Path((application, service)): Path<(String, String)>,
) -> Result<Response, AppError> {
    latest(&state, SchemaKey::new(application, Some(&service))).await
}

async fn latest(state: &AppState, key: SchemaKey) -> Result<Response, AppError> {
    let schema = state.registry.latest(&key).await?;
    Ok(ok(schema).into_response())
}

// ============ GET /api/schemas/version ============

async fn handle_version(
    State(state): State<AppState>,
    Path((application, version)): Path<(String, String)>,
) -> Result<Response, AppError> {
    version_of(&state, SchemaKey::new(application, None), &version).await
}

async fn handle_version_service(
    State(state): State<AppState>,
    Path((application, version, service)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    version_of(&state, SchemaKey::new(application, Some(&service)), &version).await
}

async fn version_of(state: &AppState, key: SchemaKey, raw: &str) -> Result<Response, AppError> {
    let version: i64 = raw
        .parse()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| bad_request(format!("version must be a positive integer, got '{}'", raw)))?;
    let schema = state.registry.version(&key, version).await?;
    Ok(ok(schema).into_response())
}

// ============ GET /api/schemas/versions ============

async fn handle_versions(
    State(state): State<AppState>,
    Path(application): Path<String>,
) -> Result<Response, AppError> {
    let listing = state
        .registry
        .versions(&SchemaKey::new(application, None))
        .await?;
    Ok(ok(listing).into_response())
}

async fn handle_versions_service(
    State(state): State<AppState>,
    Path((application, service)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let listing = state
        .registry
        .versions(&SchemaKey::new(application, Some(&service)))
        .await?;
    Ok(ok(listing).into_response())
}

// ============ Catalog ============

async fn handle_applications(State(state): State<AppState>) -> Result<Response, AppError> {
    let apps = state.registry.applications().await?;
    Ok(ok(apps).into_response())
}

async fn handle_services(
    State(state): State<AppState>,
    Path(application): Path<String>,
) -> Result<Response, AppError> {
    let services = state.registry.services(&application).await?;
    Ok(ok(services).into_response())
}

async fn handle_stats(State(state): State<AppState>) -> Result<Response, AppError> {
    let stats = state.registry.stats().await?;
    Ok(ok(stats).into_response())
}

// ============ POST /api/tests/run ============

#[derive(Deserialize)]
struct RunCheckRequest {
    #[serde(default)]
    application: Option<String>,
    #[serde(default)]
    service: Option<String>,
}

/// Handler for `POST /api/tests/run`.
///
/// Re-reads the latest stored artifact of a key and runs the validator
/// over it again.
async fn handle_run_check(
    State(state): State<AppState>,
    Json(req): Json<RunCheckRequest>,
) -> Result<Response, AppError> {
    let application = req
        .application
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| bad_request("application is required in body"))?;
    let key = SchemaKey::new(application, req.service.as_deref());
    let report = state.registry.check_latest(&key).await?;
    Ok(ok(report).into_response())
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    version: String,
    timestamp: String,
}

async fn handle_health() -> Json<Envelope<HealthResponse>> {
    ok_with_message(
        "API is healthy",
        HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}

async fn handle_fallback(uri: axum::http::Uri) -> AppError {
    AppError {
        details: Some(uri.path().to_string()),
        ..not_found("Route not found")
    }
}
