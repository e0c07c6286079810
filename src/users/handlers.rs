use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, patch},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{dto::UserResponse, extractors::CurrentUser},
    error::{AppError, AppResult},
    rate_limit::{ChangeAvatar, Throttle, ViewProfile},
    state::AppState,
};

const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/myself", get(myself))
        .route(
            "/users/avatar",
            patch(update_avatar).layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES)),
        )
}

#[instrument(skip_all)]
pub async fn myself(
    _: Throttle<ViewProfile>,
    CurrentUser(user): CurrentUser,
) -> Json<UserResponse> {
    Json(user.into())
}

/// PATCH /users/avatar (multipart, field `file`)
#[instrument(skip_all)]
pub async fn update_avatar(
    _: Throttle<ChangeAvatar>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    mut mp: Multipart,
) -> AppResult<Json<UserResponse>> {
    let mut upload = None;
    while let Some(field) = mp.next_field().await.map_err(bad_upload)? {
        if field.name() == Some("file") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let data = field.bytes().await.map_err(bad_upload)?;
            upload = Some((data, content_type));
            break;
        }
    }
    let (data, content_type) =
        upload.ok_or_else(|| AppError::Validation("file is required".into()))?;
    if data.is_empty() {
        return Err(AppError::Validation("file must not be empty".into()));
    }

    let key = format!("avatars/{}", user.id);
    state
        .storage
        .put_object(&key, data, &content_type)
        .await
        .map_err(|e| {
            warn!(error = %format!("{e:#}"), user_id = %user.id, "avatar upload failed");
            AppError::Internal
        })?;
    let url = state.storage.object_url(&key);

    let updated = state
        .users
        .update_avatar(&user.email, &url)
        .await
        .map_err(AppError::store)?
        .ok_or(AppError::InvalidToken)?;
    info!(user_id = %updated.id, "avatar updated");
    Ok(Json(updated.into()))
}

fn bad_upload(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(format!("invalid multipart body: {e}"))
}
