//! Request handlers for the `/api` routes

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use super::errors::{ApiError, ApiResult};
use super::paths::{default_signal_path, DefaultSignalPath};
use super::AppState;
use crate::errors::ArchiveError;
use crate::queries::{
    ConversationStats, ConversationSummary, Message, MessagesPage, PageRequest, SearchRequest,
};
use crate::session::{SessionMode, SessionStatus, SignalPaths};

/// Prefix of the temporary directory holding uploaded files
pub const UPLOAD_TEMP_PREFIX: &str = "signal_upload_";

const DEFAULT_CONVERSATION_LIMIT: i64 = 100;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub conversation_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct InitVolumeQuery {
    pub signal_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

fn ensure_initialized(state: &AppState) -> ApiResult<()> {
    if state.sessions.current().is_none() {
        return Err(ArchiveError::NotInitialized.into());
    }
    Ok(())
}

async fn loaded_response(state: &AppState) -> ApiResult<UploadResponse> {
    let count = state.sessions.query(|a| a.conversation_count()).await?;
    Ok(UploadResponse {
        success: true,
        message: format!("Successfully loaded Signal database with {} conversations", count),
        conversation_count: Some(count),
    })
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    Json(state.sessions.status().await)
}

pub async fn default_path() -> Json<DefaultSignalPath> {
    Json(default_signal_path())
}

pub async fn logout(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.sessions.logout().await;
    log::info!("Application state reset");
    Json(json!({ "message": "Logged out successfully", "initialized": false }))
}

/// Stream one multipart field to `path`
async fn save_field(mut field: Field<'_>, path: &FsPath) -> Result<u64, String> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| e.to_string())?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(|e| e.to_string())? {
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| e.to_string())?;
    Ok(written)
}

/// Write the `config` and `database` parts into `dir`
async fn receive_upload(mut multipart: Multipart, dir: &FsPath) -> Result<SignalPaths, String> {
    let config = dir.join("config.json");
    let database = dir.join("db.sqlite");
    let (mut has_config, mut has_database) = (false, false);

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let target = match field.name() {
            Some("config") => {
                has_config = true;
                &config
            }
            Some("database") => {
                has_database = true;
                &database
            }
            other => {
                log::debug!("Ignoring unexpected upload field {:?}", other);
                continue;
            }
        };
        let bytes = save_field(field, target).await?;
        log::debug!("Received {} bytes into {:?}", bytes, target);
    }

    if !has_config {
        return Err("missing 'config' file part".into());
    }
    if !has_database {
        return Err("missing 'database' file part".into());
    }
    Ok(SignalPaths { config, database })
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let failed = |reason: String| {
        log::error!("Upload failed: {}", reason);
        ApiError::bad_request(format!("Failed to process uploaded files: {}", reason))
    };

    let multipart = multipart.map_err(|e| failed(e.body_text()))?;
    let upload_dir = tempfile::Builder::new()
        .prefix(UPLOAD_TEMP_PREFIX)
        .tempdir()
        .map_err(|e| failed(e.to_string()))?;

    let result = match receive_upload(multipart, upload_dir.path()).await {
        Ok(paths) => state
            .sessions
            .initialize(SessionMode::Upload, paths)
            .await
            .map_err(|e| e.to_string()),
        Err(reason) => Err(reason),
    };

    // Uploaded copies are not needed once decryption has finished
    if let Err(e) = upload_dir.close() {
        log::warn!("Failed to remove upload directory: {}", e);
    }
    result.map_err(failed)?;

    let response = loaded_response(&state).await?;
    log::info!("Initialized from uploaded files ({:?} conversations)", response.conversation_count);
    Ok(Json(response))
}

pub async fn init_volume(
    State(state): State<Arc<AppState>>,
    query: Result<Query<InitVolumeQuery>, QueryRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let signal_dir = query
        .signal_path
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.default_signal_path.clone());

    match state
        .sessions
        .initialize(SessionMode::Volume, SignalPaths::from_dir(&signal_dir))
        .await
    {
        Ok(_) => {}
        Err(e @ ArchiveError::FileNotFound { .. }) => return Err(ApiError::not_found(e.to_string())),
        Err(e) => {
            log::error!("Volume init failed: {}", e);
            return Err(ApiError::internal(format!(
                "Failed to initialize from volume: {}",
                e
            )));
        }
    }

    let response = loaded_response(&state).await?;
    log::info!("Initialized from volume {:?}", signal_dir);
    Ok(Json(response))
}

pub async fn conversations(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ConversationsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    ensure_initialized(&state)?;
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_CONVERSATION_LIMIT);

    let conversations = state.sessions.query(move |a| a.conversations(limit)).await?;
    Ok(Json(conversations))
}

pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> ApiResult<Json<MessagesPage>> {
    ensure_initialized(&state)?;
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let page = PageRequest::new(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(PageRequest::DEFAULT_PAGE_SIZE),
    )?;

    let page = state
        .sessions
        .query(move |a| a.messages(&conversation_id, page))
        .await?;
    Ok(Json(page))
}

pub async fn conversation_stats(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<ConversationStats>> {
    ensure_initialized(&state)?;
    let id = conversation_id.clone();
    let stats = state
        .sessions
        .query(move |a| a.conversation_stats(&id))
        .await?;

    stats.map(Json).ok_or_else(|| {
        ApiError::not_found(format!(
            "No messages found for conversation {}",
            conversation_id
        ))
    })
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<Message>>> {
    ensure_initialized(&state)?;
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    request.validate()?;

    let results = state.sessions.query(move |a| a.search(&request)).await?;
    Ok(Json(results))
}
