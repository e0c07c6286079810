use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{LoginForm, MessageResponse, RequestEmail, SignupRequest, TokenPair, UserResponse},
        extractors::BearerToken,
        services::{AuthService, EmailStatus},
    },
    error::{AppError, AppResult},
    extract::{AppForm, AppJson, AppPath},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/refresh_token", get(refresh_token))
        .route("/auth/confirmed_email/:token", get(confirmed_email))
        .route("/auth/request_email", post(request_email))
}

#[instrument(skip_all)]
pub async fn signup(
    State(auth): State<AuthService>,
    AppJson(payload): AppJson<SignupRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = auth.signup(payload).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip_all)]
pub async fn login(
    State(auth): State<AuthService>,
    AppForm(form): AppForm<LoginForm>,
) -> AppResult<Json<TokenPair>> {
    let pair = auth.login(&form.username, &form.password).await?;
    Ok(Json(pair))
}

#[instrument(skip_all)]
pub async fn refresh_token(
    State(auth): State<AuthService>,
    BearerToken(token): BearerToken,
) -> AppResult<Json<TokenPair>> {
    let pair = auth
        .refresh(&token)
        .await
        .map_err(AppError::into_credentials_failure)?;
    Ok(Json(pair))
}

#[instrument(skip_all)]
pub async fn confirmed_email(
    State(auth): State<AuthService>,
    AppPath(token): AppPath<String>,
) -> AppResult<Json<MessageResponse>> {
    let status = auth.confirm_email(&token).await.map_err(|e| match e {
        AppError::InvalidToken | AppError::WrongTokenKind | AppError::UserNotFound => {
            AppError::VerificationFailed
        }
        other => other,
    })?;
    let message = match status {
        EmailStatus::AlreadyConfirmed => "Your email is already confirmed",
        _ => "Email confirmed",
    };
    Ok(Json(MessageResponse { message }))
}

#[instrument(skip_all)]
pub async fn request_email(
    State(auth): State<AuthService>,
    AppJson(body): AppJson<RequestEmail>,
) -> AppResult<Json<MessageResponse>> {
    let status = auth.request_confirmation(&body.email).await?;
    let message = match status {
        EmailStatus::AlreadyConfirmed => "Your email is already confirmed",
        _ => "Check your email for confirmation.",
    };
    Ok(Json(MessageResponse { message }))
}
