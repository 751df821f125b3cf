use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::archive::{self, RestoreReport};
use crate::auth::{self, CurrentUser};
use crate::errors::AppError;
use crate::models::{
    Category, Combination, Item, ItemListResponse, Outfit, PreferenceKind, PreferenceListResponse,
    PreferenceView, RecordOutcome, RecordResponse, SuggestRequest, SuggestResponse, UpdateItemRequest,
};
use crate::sampler::{self, SuggestOptions};
use crate::state::AppState;
use crate::uploads;
use crate::user_models::{CredentialsRequest, LoginResponse, RegisterResponse};

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users", post(register))
        .route("/sessions", post(login).delete(logout))
        .route("/items", post(upload_item).get(list_items))
        .route("/items/:id", patch(update_item).delete(delete_item))
        .route("/items/:id/image", get(item_image))
        .route("/suggestions", post(suggest))
        .route("/dislikes", post(record_dislike).get(list_dislikes))
        .route("/dislikes/:id", delete(remove_dislike))
        .route("/favorites", post(record_favorite).get(list_favorites))
        .route("/favorites/:id", delete(remove_favorite))
        .route("/backups", post(create_backup))
        .route("/backups/restore", post(restore_backup))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let user = auth::register(&state, &payload.username, &payload.password).await?;
    tracing::info!(username = %user.username, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user.id,
            username: user.username,
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = auth::authenticate(&state, &payload.username, &payload.password)
        .await?
        .ok_or(AppError::Unauthorized)?;

    sync_uploads(&state, &user.id, &user.username).await?;
    let token = state.sessions.issue(&user.id).await;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
    }))
}

async fn logout(State(state): State<Arc<AppState>>, current: CurrentUser) -> StatusCode {
    state.sessions.revoke(&current.token).await;
    StatusCode::NO_CONTENT
}

async fn upload_item(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Item>), AppError> {
    let mut category = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("category") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Malformed category: {}", e)))?;
                category = Some(text);
            }
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Malformed file: {}", e)))?;
                file = Some((name, bytes));
            }
            _ => {}
        }
    }

    let category: Category = category
        .ok_or_else(|| AppError::BadRequest("Missing category".to_string()))?
        .parse()
        .map_err(AppError::BadRequest)?;
    if !Category::SELECTABLE.contains(&category) {
        return Err(AppError::BadRequest(
            "Category must be top, bottom, shoes or accessory".to_string(),
        ));
    }
    let (name, bytes) = file.ok_or_else(|| AppError::BadRequest("Missing file".to_string()))?;
    let file_name = uploads::sanitize_filename(&name).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let path = uploads::save_upload(&state.config.upload_dir, &current.user.username, &file_name, &bytes)?;
    let path = path.to_string_lossy().into_owned();

    let item = state
        .storage
        .upsert_item(&current.user.id, path, category)
        .await?;

    tracing::info!(item = %item.id, %category, "uploaded {}", file_name);
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Debug, Deserialize)]
struct ItemQuery {
    category: Option<Category>,
}

async fn list_items(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ItemQuery>,
) -> Result<Json<ItemListResponse>, AppError> {
    sync_uploads(&state, &current.user.id, &current.user.username).await?;
    let items = state
        .storage
        .get_user_items(&current.user.id, query.category)
        .await?;

    Ok(Json(ItemListResponse { items }))
}

async fn update_item(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Json<Item>, AppError> {
    let item = state
        .storage
        .set_item_category(&id, &current.user.id, payload.category)
        .await?
        .ok_or_else(|| AppError::NotFound("Item".to_string()))?;

    Ok(Json(item))
}

async fn delete_item(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let item = state
        .storage
        .delete_item(&id, &current.user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Item".to_string()))?;
    uploads::remove_upload(std::path::Path::new(&item.path))?;

    tracing::info!(item = %item.id, "item deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn item_image(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let item = state
        .storage
        .get_item(&id, &current.user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Item".to_string()))?;

    let bytes = tokio::fs::read(&item.path)
        .await
        .map_err(|e| image_read_error(&item.path, e))?;
    let mime = mime_guess::from_path(&item.path).first_or_octet_stream();

    Ok(([(CONTENT_TYPE, mime.to_string())], bytes))
}

fn image_read_error(path: &str, e: io::Error) -> AppError {
    match e.kind() {
        io::ErrorKind::NotFound => AppError::NotFound(format!("Image file {}", path)),
        _ => AppError::Internal(anyhow::anyhow!("Failed to read image {}: {}", path, e)),
    }
}

async fn suggest(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(payload): Json<SuggestRequest>,
) -> Result<Json<SuggestResponse>, AppError> {
    let wardrobe = state.storage.wardrobe(&current.user.id).await?;
    let options = SuggestOptions {
        include_shoes: payload.include_shoes,
        include_accessory: payload.include_accessory,
    };
    let suggestion = {
        let mut rng = rand::thread_rng();
        sampler::suggest(&wardrobe, options, &mut rng)
    };

    let response = match suggestion {
        Some(combination) => {
            let items: Vec<Item> = wardrobe
                .tops
                .iter()
                .chain(&wardrobe.bottoms)
                .chain(&wardrobe.shoes)
                .chain(&wardrobe.accessories)
                .cloned()
                .collect();
            SuggestResponse {
                outfit: Some(resolve_outfit(&combination, &index_items(items))),
                suggestion: Some(combination),
                message: "Here is an outfit".to_string(),
            }
        }
        None => SuggestResponse {
            suggestion: None,
            outfit: None,
            message: "No suggestion available. Upload more items or adjust your dislikes".to_string(),
        },
    };

    Ok(Json(response))
}

async fn record_dislike(
    state: State<Arc<AppState>>,
    current: CurrentUser,
    payload: Json<Combination>,
) -> Result<(StatusCode, Json<RecordResponse>), AppError> {
    record_preference(PreferenceKind::Dislike, state, current, payload).await
}

async fn record_favorite(
    state: State<Arc<AppState>>,
    current: CurrentUser,
    payload: Json<Combination>,
) -> Result<(StatusCode, Json<RecordResponse>), AppError> {
    record_preference(PreferenceKind::Favorite, state, current, payload).await
}

async fn record_preference(
    kind: PreferenceKind,
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(combination): Json<Combination>,
) -> Result<(StatusCode, Json<RecordResponse>), AppError> {
    check_ownership(&state, &current, &combination).await?;

    let outcome = state
        .storage
        .record_preference(kind, &current.user.id, combination)
        .await?;

    let (status, message) = match outcome {
        RecordOutcome::Recorded => (
            StatusCode::CREATED,
            format!("Combination recorded as {}", kind.label()),
        ),
        RecordOutcome::AlreadyExisted => (
            StatusCode::OK,
            format!("Combination is already recorded as {}", kind.label()),
        ),
    };
    Ok((status, Json(RecordResponse { outcome, message })))
}

async fn list_dislikes(
    state: State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<PreferenceListResponse>, AppError> {
    list_preferences(PreferenceKind::Dislike, state, current).await
}

async fn list_favorites(
    state: State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<PreferenceListResponse>, AppError> {
    list_preferences(PreferenceKind::Favorite, state, current).await
}

async fn list_preferences(
    kind: PreferenceKind,
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<PreferenceListResponse>, AppError> {
    let records = state.storage.get_preferences(kind, &current.user.id).await?;
    let items = index_items(state.storage.get_user_items(&current.user.id, None).await?);

    let records = records
        .into_iter()
        .map(|record| PreferenceView {
            outfit: resolve_outfit(&record.combination, &items),
            id: record.id,
            combination: record.combination,
            created_at: record.created_at,
        })
        .collect();

    Ok(Json(PreferenceListResponse { records }))
}

async fn remove_dislike(
    state: State<Arc<AppState>>,
    current: CurrentUser,
    id: Path<String>,
) -> Result<StatusCode, AppError> {
    remove_preference(PreferenceKind::Dislike, state, current, id).await
}

async fn remove_favorite(
    state: State<Arc<AppState>>,
    current: CurrentUser,
    id: Path<String>,
) -> Result<StatusCode, AppError> {
    remove_preference(PreferenceKind::Favorite, state, current, id).await
}

async fn remove_preference(
    kind: PreferenceKind,
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state
        .storage
        .remove_preference(kind, &id, &current.user.id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("{} {}", kind.label(), id)))
    }
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    _current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let paths = state.config.backup_paths();
    let archive = state
        .storage
        .snapshot(|_| archive::create_backup(&paths))
        .await?;

    let bytes = tokio::fs::read(&archive).await.map_err(|e| {
        AppError::Internal(anyhow::anyhow!("Failed to read backup {}: {}", archive.display(), e))
    })?;

    Ok((
        [
            (CONTENT_TYPE, "application/zip".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", archive::BACKUP_FILE_NAME),
            ),
        ],
        bytes,
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub store_replaced: bool,
    pub user_dirs: Vec<String>,
    pub files_restored: usize,
}

impl From<RestoreReport> for RestoreResponse {
    fn from(report: RestoreReport) -> Self {
        Self {
            store_replaced: report.store_replaced,
            user_dirs: report.user_dirs,
            files_restored: report.files_restored,
        }
    }
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    _current: CurrentUser,
    body: Bytes,
) -> Result<Json<RestoreResponse>, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Empty backup upload".to_string()));
    }

    let paths = state.config.backup_paths();
    tokio::fs::create_dir_all(&paths.backup_dir)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create {}: {}", paths.backup_dir.display(), e)))?;

    // Deleted when dropped.
    let upload = save_restore_upload(&paths.backup_dir, &body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to save uploaded backup: {}", e)))?;

    let report = state
        .storage
        .restore(|_| archive::restore_backup(upload.path(), &paths))
        .await?;

    Ok(Json(report.into()))
}

fn save_restore_upload(dir: &std::path::Path, body: &[u8]) -> io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(body)?;
    file.flush()?;
    Ok(file)
}

/// Index files present in the user's upload folder but missing from the store.
async fn sync_uploads(state: &AppState, user_id: &str, username: &str) -> Result<(), AppError> {
    let paths = uploads::scan_user_dir(&state.config.upload_dir, username)?
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let added = state.storage.index_missing_paths(user_id, paths).await?;
    if !added.is_empty() {
        tracing::info!(count = added.len(), %username, "indexed files found on disk");
    }
    Ok(())
}

/// Every slot must name one of the caller's items in the matching category.
async fn check_ownership(
    state: &AppState,
    current: &CurrentUser,
    combination: &Combination,
) -> Result<(), AppError> {
    for (category, id) in combination.slots() {
        let item = state
            .storage
            .get_item(id, &current.user.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item {}", id)))?;
        if item.category != category {
            return Err(AppError::BadRequest(format!(
                "Item {} is {}, not {}",
                id, item.category, category
            )));
        }
    }
    Ok(())
}

fn index_items(items: Vec<Item>) -> HashMap<String, Item> {
    items.into_iter().map(|i| (i.id.clone(), i)).collect()
}

fn resolve_outfit(combination: &Combination, items: &HashMap<String, Item>) -> Outfit {
    let lookup = |id: Option<&String>| id.and_then(|id| items.get(id)).cloned();
    Outfit {
        top: lookup(Some(&combination.top)),
        bottom: lookup(Some(&combination.bottom)),
        shoes: lookup(combination.shoes.as_ref()),
        accessory: lookup(combination.accessory.as_ref()),
    }
}
