use axum::{
    extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Account already exists")]
    AccountExists,

    #[error("Invalid email")]
    InvalidEmail,

    #[error("Email not confirmed")]
    EmailNotConfirmed,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Could not validate credentials")]
    InvalidToken,

    #[error("Invalid scope for token")]
    WrongTokenKind,

    #[error("Invalid refresh token")]
    TokenMismatch,

    #[error("User not found")]
    UserNotFound,

    #[error("Verification error")]
    VerificationFailed,

    #[error("Contact not found")]
    NotFound,

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Validation(String),

    #[error("Service temporarily unavailable")]
    StoreUnavailable,

    #[error("Internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AccountExists => StatusCode::CONFLICT,
            AppError::InvalidEmail
            | AppError::EmailNotConfirmed
            | AppError::InvalidPassword
            | AppError::InvalidToken
            | AppError::WrongTokenKind
            | AppError::TokenMismatch => StatusCode::UNAUTHORIZED,
            AppError::UserNotFound | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::VerificationFailed => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wraps a repository failure. The cause is logged here and never reaches the client.
    pub fn store(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "store unavailable");
        AppError::StoreUnavailable
    }

    /// A bearer token whose subject has disappeared is a credentials failure, not a lookup miss.
    pub fn into_credentials_failure(self) -> Self {
        match self {
            AppError::UserNotFound => AppError::InvalidToken,
            other => other,
        }
    }

    fn log(&self) {
        match self {
            AppError::StoreUnavailable | AppError::Internal => {
                tracing::error!(error = %self, "request failed");
            }
            AppError::TokenMismatch => {
                tracing::warn!("refresh token reuse detected");
            }
            AppError::RateLimited { retry_after_secs } => {
                tracing::warn!(retry_after_secs, "rate limited");
            }
            AppError::InvalidEmail
            | AppError::EmailNotConfirmed
            | AppError::InvalidPassword
            | AppError::InvalidToken
            | AppError::WrongTokenKind => {
                tracing::warn!(error = %self, "authentication failed");
            }
            _ => {
                tracing::debug!(error = %self, "request rejected");
            }
        }
    }
}

macro_rules! rejection_as_validation {
    ($($rejection:ty),*) => {
        $(
            impl From<$rejection> for AppError {
                fn from(rejection: $rejection) -> Self {
                    AppError::Validation(rejection.body_text())
                }
            }
        )*
    };
}

rejection_as_validation!(JsonRejection, FormRejection, QueryRejection, PathRejection);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let mut res = (status, Json(json!({ "detail": self.to_string() }))).into_response();
        if let AppError::RateLimited { retry_after_secs } = self {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        if status == StatusCode::UNAUTHORIZED {
            res.headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        res
    }
}
