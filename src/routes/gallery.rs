//! HTTP surface for the gallery: listings, monitor control, file management.

use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::server::error::AppError;
use crate::server::state::AppState;
use crate::services::events::FILE_CHANGE_EVENT;
use crate::services::media;

/// Folder key prefix for everything under the output root.
const BASE_FOLDER: &str = "output";

pub fn router() -> Router<AppState> {
    Router::new()
        // Listings
        .route("/images", get(list_images))
        // Monitor control
        .route("/monitor/start", post(start_monitor))
        .route("/monitor/stop", post(stop_monitor))
        .route("/refresh", post(refresh))
        // Caches
        .route("/cache/clear", post(clear_caches))
        // File management
        .route("/files", delete(delete_path))
        .route("/move", post(move_path))
        .route("/folders", post(create_folder))
        // SSE events
        .route("/events", get(gallery_events_stream))
}

// ─── Path resolution ─────────────────────────────────────────────────────────

/// Resolve a client-supplied relative path against `root`, lexically.
///
/// Absolute paths and any `..` sequence that would climb above the root are
/// rejected before touching the filesystem, so a request can never name a
/// target outside the output tree.
fn resolve_sandboxed(root: &Path, relative: &str) -> Result<PathBuf, AppError> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(AppError::Forbidden(format!(
            "Absolute paths are not allowed: {}",
            relative
        )));
    }

    let mut resolved = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(AppError::Forbidden(format!(
                        "Path escapes the output directory: {}",
                        relative
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::Forbidden(format!(
                    "Absolute paths are not allowed: {}",
                    relative
                )));
            }
        }
    }

    Ok(root.join(resolved))
}

/// Folder key for a relative path: `output` at the root, `output/<rel>` below.
fn base_key_for(relative: &str) -> String {
    let trimmed = relative.trim_matches('/');
    if trimmed.is_empty() {
        BASE_FOLDER.to_string()
    } else {
        format!("{}/{}", BASE_FOLDER, trimmed)
    }
}

// ─── Listings ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    relative_path: Option<String>,
}

/// GET /Gallery/images — full folder listing, served from the short-TTL
/// response cache when fresh.
async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let relative = query.relative_path.unwrap_or_default();

    if let Some(cached) = state.cached_response(&relative) {
        return Ok(Json(cached));
    }

    let target = resolve_sandboxed(state.output_root(), &relative)?;
    if !target.is_dir() {
        return Err(AppError::NotFound(format!(
            "Directory not found: {}",
            relative
        )));
    }

    let base_key = base_key_for(&relative);
    let folders = state.scanner().scan(&target, &base_key, true).await;
    let response = json!({"folders": folders});
    state.store_response(relative, response.clone());

    Ok(Json(response))
}

// ─── Monitor control ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MonitorRequest {
    #[serde(default)]
    relative_path: Option<String>,
}

/// POST /Gallery/monitor/start — watch a subtree, replacing any active watch.
async fn start_monitor(
    State(state): State<AppState>,
    Json(req): Json<MonitorRequest>,
) -> Result<Json<Value>, AppError> {
    let relative = req.relative_path.unwrap_or_default();
    let target = resolve_sandboxed(state.output_root(), &relative)?;
    if !target.is_dir() {
        return Err(AppError::BadRequest(format!(
            "Cannot monitor non-existent directory: {}",
            relative
        )));
    }

    // Replace semantics: a running watch on another root is torn down first.
    state.monitor().stop().await;
    state
        .monitor()
        .start(target.clone(), base_key_for(&relative))
        .await;

    Ok(Json(json!({
        "status": "started",
        "path": target.to_string_lossy()
    })))
}

/// POST /Gallery/monitor/stop — stop the active watch if any.
async fn stop_monitor(State(state): State<AppState>) -> Json<Value> {
    let was_running = state.monitor().is_running().await;
    state.monitor().stop().await;
    Json(json!({"status": "stopped", "was_running": was_running}))
}

/// POST /Gallery/refresh — drop cached listings and nudge clients to reload.
async fn refresh(State(state): State<AppState>) -> Json<Value> {
    state.clear_response_cache();
    state.events().publish(FILE_CHANGE_EVENT, json!({"folders": {}}));
    Json(json!({"status": "refreshed"}))
}

// ─── Caches ──────────────────────────────────────────────────────────────────

/// POST /Gallery/cache/clear — clear the response cache and metadata cache.
async fn clear_caches(State(state): State<AppState>) -> Json<Value> {
    state.clear_response_cache();
    state.scanner().clear_cache();
    log::info!("[Gallery] Caches cleared by request");
    Json(json!({"status": "success"}))
}

// ─── File management ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DeleteRequest {
    file_path: String,
    #[serde(default)]
    is_folder: bool,
}

/// DELETE /Gallery/files — remove a file (and its thumbnail) or a folder tree.
async fn delete_path(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<Value>, AppError> {
    let target = resolve_sandboxed(state.output_root(), &req.file_path)?;
    if target.as_path() == state.output_root() {
        return Err(AppError::BadRequest(
            "Refusing to delete the output root".to_string(),
        ));
    }
    if !target.exists() {
        return Err(AppError::NotFound(format!(
            "Path not found: {}",
            req.file_path
        )));
    }

    if req.is_folder {
        std::fs::remove_dir_all(&target)?;
    } else {
        // The thumbnail name hashes the canonical source path, so it must
        // be resolved while the source still exists.
        if media::is_media_file(&target) {
            state.scanner().thumbnails().remove(&target);
        }
        std::fs::remove_file(&target)?;
    }

    state.clear_response_cache();
    log::info!("[Gallery] Deleted {}", target.display());
    Ok(Json(json!({"status": "success"})))
}

#[derive(Deserialize)]
struct MoveRequest {
    source_path: String,
    destination_path: String,
    #[serde(default)]
    is_folder: bool,
}

/// POST /Gallery/move — move a file or folder within the output root.
async fn move_path(
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<Value>, AppError> {
    let source = resolve_sandboxed(state.output_root(), &req.source_path)?;
    let destination = resolve_sandboxed(state.output_root(), &req.destination_path)?;

    if source.as_path() == state.output_root() {
        return Err(AppError::BadRequest(
            "Refusing to move the output root".to_string(),
        ));
    }
    if !source.exists() {
        return Err(AppError::NotFound(format!(
            "Source not found: {}",
            req.source_path
        )));
    }
    if destination.exists() {
        return Err(AppError::BadRequest(format!(
            "Destination already exists: {}",
            req.destination_path
        )));
    }

    // Same constraint as deletion: the thumbnail name hashes the canonical
    // source path, which is only resolvable before the rename.
    if !req.is_folder && media::is_media_file(&source) {
        state.scanner().thumbnails().remove(&source);
    }

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&source, &destination)?;

    state.clear_response_cache();
    log::info!(
        "[Gallery] Moved {} -> {}",
        source.display(),
        destination.display()
    );
    Ok(Json(json!({"status": "success"})))
}

#[derive(Deserialize)]
struct CreateFolderRequest {
    folder_path: String,
}

/// POST /Gallery/folders — create a directory (idempotent).
async fn create_folder(
    State(state): State<AppState>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<Value>, AppError> {
    let target = resolve_sandboxed(state.output_root(), &req.folder_path)?;
    std::fs::create_dir_all(&target)?;

    state.clear_response_cache();
    Ok(Json(json!({"status": "success"})))
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// GET /Gallery/events — Server-Sent Events stream of change notifications.
async fn gallery_events_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let stream = state.events().sse_stream();
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
