use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use collection_vault_core::{NewDatabaseEntry, RegistryState, RestoreSummary};
use collection_vault_engine::{
    channel, create_database_from_backup, run_backup, run_restore, ArchiveCatalog, ArchiveInfo,
    BackupConfig, CatalogError, ProgressStream, ProvisionError, RestoreConfig,
};
use collection_vault_storage::{
    redact_uri, ConnectionTest, DatabaseRegistry, RegistryError, UriConnector,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Minimum spacing between two restore runs.
const RESTORE_GATE_SECS: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub catalog: ArchiveCatalog,
    pub registry: Arc<DatabaseRegistry>,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
    pub restore_gate: Arc<Mutex<Option<DateTime<Utc>>>>,
    pub csrf_token: Option<String>,
    pub api_token: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/backups", get(list_backups))
        .route("/api/v1/backups/{filename}", delete(delete_backup))
        .route("/api/v1/backups/{filename}/download", get(download_backup))
        .route("/api/v1/backup", post(start_backup))
        .route("/api/v1/restore", post(start_restore))
        .route("/api/v1/databases", get(list_databases).post(add_database))
        .route("/api/v1/databases/test", post(test_database))
        .route("/api/v1/databases/from-backup", post(create_from_backup))
        .route("/api/v1/databases/{id}", delete(remove_database))
        .route("/api/v1/databases/{id}/switch", post(switch_database))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn catalog_error(e: CatalogError) -> ApiError {
    match e {
        CatalogError::InvalidName(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        CatalogError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        CatalogError::Io(_) => {
            error!(error = %e, "backup catalog error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn registry_error(e: RegistryError) -> ApiError {
    if e.is_validation() {
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    } else {
        error!(error = %e, "database registry error");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(api_error(StatusCode::UNAUTHORIZED, "unauthorized")),
    }
}

fn require_csrf(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.csrf_token else {
        return Ok(());
    };
    let provided = headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        return Err(api_error(StatusCode::FORBIDDEN, "invalid CSRF token"));
    }
    Ok(())
}

/// One `data:` line per progress event; the stream ends once the run drops
/// its sink after the terminal event.
fn progress_sse(progress: ProgressStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = futures_util::stream::unfold(progress, |mut progress| async move {
        let event = progress.next().await?;
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"unserializable progress event: {e}"}}"#)
        });
        Some((Ok::<_, Infallible>(Event::default().data(data)), progress))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupListResponse {
    success: bool,
    backups: Vec<ArchiveInfo>,
}

async fn list_backups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BackupListResponse>, ApiError> {
    require_api_auth(&state, &headers)?;
    let backups = state.catalog.list().map_err(catalog_error)?;
    Ok(Json(BackupListResponse {
        success: true,
        backups,
    }))
}

async fn delete_backup(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_api_auth(&state, &headers)?;
    state.catalog.delete(&filename).map_err(catalog_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Backup deleted successfully",
    })))
}

async fn download_backup(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_api_auth(&state, &headers)?;
    let path = state.catalog.resolve(&filename).map_err(catalog_error)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut response = bytes.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct BackupQuery {
    database: Option<String>,
}

async fn start_backup(
    State(state): State<AppState>,
    Query(query): Query<BackupQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_auth(&state, &headers)?;
    let (id, entry) = state
        .registry
        .resolve(query.database.as_deref())
        .map_err(registry_error)?;
    info!(database = %id, uri = %redact_uri(&entry.uri), "starting backup");

    let (sink, progress) = channel();
    let connector = Arc::new(UriConnector::new(entry.uri));
    tokio::spawn(run_backup(connector, state.backup.clone(), sink));
    Ok(progress_sse(progress))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreRequest {
    backup_filename: Option<String>,
    target_database_id: Option<String>,
}

async fn start_restore(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RestoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_auth(&state, &headers)?;
    require_csrf(&state, &headers)?;

    let filename = request
        .backup_filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Backup filename is required"))?;
    let archive = state.catalog.resolve(&filename).map_err(catalog_error)?;
    let (id, entry) = state
        .registry
        .resolve(request.target_database_id.as_deref())
        .map_err(registry_error)?;

    let mut gate = state.restore_gate.lock().await;
    if let Some(last) = *gate {
        if (Utc::now() - last).num_seconds() < RESTORE_GATE_SECS {
            return Err(api_error(
                StatusCode::TOO_MANY_REQUESTS,
                "a restore was started moments ago",
            ));
        }
    }
    *gate = Some(Utc::now());
    drop(gate);

    info!(%filename, database = %id, uri = %redact_uri(&entry.uri), "starting restore");
    let (sink, progress) = channel();
    let connector = Arc::new(UriConnector::new(entry.uri));
    tokio::spawn(run_restore(archive, connector, state.restore.clone(), sink));
    Ok(progress_sse(progress))
}

#[derive(Debug, Serialize)]
struct DatabasesResponse {
    success: bool,
    config: RegistryState,
}

/// Registry state as shown to API callers, with credentials masked.
fn public_state(mut state: RegistryState) -> Json<DatabasesResponse> {
    for entry in state.databases.values_mut() {
        entry.uri = redact_uri(&entry.uri);
    }
    Json(DatabasesResponse {
        success: true,
        config: state,
    })
}

async fn list_databases(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DatabasesResponse>, ApiError> {
    require_api_auth(&state, &headers)?;
    state.registry.get().map(public_state).map_err(registry_error)
}

async fn add_database(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(entry): Json<NewDatabaseEntry>,
) -> Result<Json<DatabasesResponse>, ApiError> {
    require_api_auth(&state, &headers)?;
    state.registry.add(entry).map(public_state).map_err(registry_error)
}

async fn remove_database(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DatabasesResponse>, ApiError> {
    require_api_auth(&state, &headers)?;
    state.registry.remove(&id).map(public_state).map_err(registry_error)
}

async fn switch_database(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DatabasesResponse>, ApiError> {
    require_api_auth(&state, &headers)?;
    state
        .registry
        .switch_current(&id)
        .map(public_state)
        .map_err(registry_error)
}

#[derive(Debug, Deserialize)]
struct TestRequest {
    #[serde(default)]
    uri: String,
}

async fn test_database(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TestRequest>,
) -> Result<Json<ConnectionTest>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(DatabaseRegistry::test_connection(&request.uri).await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FromBackupRequest {
    backup_file: Option<String>,
    database_id: Option<String>,
    database_name: Option<String>,
    database_uri: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedDatabase {
    id: String,
    name: String,
    uri: String,
    description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FromBackupResponse {
    success: bool,
    message: String,
    database: CreatedDatabase,
    duration_ms: u64,
    summary: RestoreSummary,
}

fn provision_error(e: ProvisionError) -> ApiError {
    match e {
        ProvisionError::Registry(RegistryError::DuplicateId(id)) => api_error(
            StatusCode::CONFLICT,
            format!("Database ID '{id}' already exists"),
        ),
        ProvisionError::Registry(e) => registry_error(e),
        ProvisionError::Unreachable(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        ProvisionError::Restore { .. } => {
            warn!(error = %e, "create database from backup failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn create_from_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FromBackupRequest>,
) -> Result<Json<FromBackupResponse>, ApiError> {
    require_api_auth(&state, &headers)?;
    let filename = request
        .backup_file
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Backup file is required"))?;
    let archive = state.catalog.resolve(&filename).map_err(catalog_error)?;
    let entry = NewDatabaseEntry {
        id: request.database_id,
        name: request.database_name,
        uri: request.database_uri,
        description: request.description,
    };

    info!(%filename, id = ?entry.id, "creating database from backup");
    let created =
        create_database_from_backup(&state.registry, archive, entry, state.restore.clone())
            .await
            .map_err(provision_error)?;
    Ok(Json(FromBackupResponse {
        success: true,
        message: format!("Database '{}' created successfully", created.entry.name),
        database: CreatedDatabase {
            uri: redact_uri(&created.entry.uri),
            id: created.id,
            name: created.entry.name,
            description: created.entry.description,
        },
        duration_ms: created.duration_ms,
        summary: created.summary,
    }))
}
