use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    auth::{
        claims::TokenKind,
        dto::{SignupRequest, TokenPair},
        jwt::JwtKeys,
        password::{hash_password_blocking, verify_password_blocking},
        repo::UserRepo,
        repo_types::{NewUser, Rotation, User},
    },
    error::{AppError, AppResult},
    mail::{MailQueue, VerificationEmail},
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 50;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn gravatar_url(email: &str) -> String {
    let digest = Sha256::digest(email.as_bytes());
    format!("https://www.gravatar.com/avatar/{:x}", digest)
}

/// Outcome of the email confirmation flows that is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailStatus {
    Confirmed,
    AlreadyConfirmed,
    VerificationSent,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepo>,
    keys: JwtKeys,
    mail: MailQueue,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.users.clone(), state.keys.clone(), state.mail.clone())
    }
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepo>, keys: JwtKeys, mail: MailQueue) -> Self {
        Self { users, keys, mail }
    }

    pub async fn signup(&self, req: SignupRequest) -> AppResult<User> {
        let email = normalize_email(&req.email);
        let username = req.username.trim().to_string();

        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email address".into()));
        }
        if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
            return Err(AppError::Validation(format!(
                "Username must be 1 to {MAX_USERNAME_LEN} characters"
            )));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::store)?
            .is_some()
        {
            warn!(email = %email, "signup for existing account");
            return Err(AppError::AccountExists);
        }

        let password_hash = hash_password_blocking(req.password).await.map_err(|e| {
            tracing::error!(error = %e, "hash_password failed");
            AppError::Internal
        })?;

        let user = self
            .users
            .create(NewUser {
                username,
                avatar: Some(gravatar_url(&email)),
                email,
                password_hash,
            })
            .await
            .map_err(AppError::store)?
            .ok_or(AppError::AccountExists)?;

        self.send_verification(&user)?;
        info!(user_id = %user.id, email = %user.email, "user signed up");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<TokenPair> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::store)?
            .ok_or(AppError::InvalidEmail)?;

        if !user.confirmed {
            return Err(AppError::EmailNotConfirmed);
        }

        let ok = verify_password_blocking(password.to_string(), user.password_hash.clone())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, user_id = %user.id, "verify_password failed");
                AppError::Internal
            })?;
        if !ok {
            return Err(AppError::InvalidPassword);
        }

        let pair = self.issue_pair(&user.email)?;
        // Overwriting ends every other session for this user.
        self.users
            .set_refresh_token(&user.email, Some(&pair.refresh_token))
            .await
            .map_err(AppError::store)?;

        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(pair)
    }

    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let email = self.keys.decode(refresh_token, TokenKind::Refresh)?;
        let pair = self.issue_pair(&email)?;

        match self
            .users
            .rotate_refresh_token(&email, refresh_token, &pair.refresh_token)
            .await
            .map_err(AppError::store)?
        {
            Rotation::Rotated => {
                info!(email = %email, "refresh token rotated");
                Ok(pair)
            }
            Rotation::Mismatch => {
                warn!(email = %email, "stale refresh token presented; session revoked");
                Err(AppError::TokenMismatch)
            }
            Rotation::UnknownUser => Err(AppError::UserNotFound),
        }
    }

    pub async fn confirm_email(&self, token: &str) -> AppResult<EmailStatus> {
        let email = self.keys.decode(token, TokenKind::EmailVerification)?;
        let user = self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::store)?
            .ok_or(AppError::UserNotFound)?;

        if user.confirmed {
            return Ok(EmailStatus::AlreadyConfirmed);
        }
        let changed = self
            .users
            .confirm_email(&email)
            .await
            .map_err(AppError::store)?;
        if changed {
            info!(user_id = %user.id, "email confirmed");
            Ok(EmailStatus::Confirmed)
        } else {
            Ok(EmailStatus::AlreadyConfirmed)
        }
    }

    pub async fn request_confirmation(&self, email: &str) -> AppResult<EmailStatus> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_by_email(&email)
            .await
            .map_err(AppError::store)?
            .ok_or(AppError::UserNotFound)?;

        if user.confirmed {
            return Ok(EmailStatus::AlreadyConfirmed);
        }
        self.send_verification(&user)?;
        Ok(EmailStatus::VerificationSent)
    }

    /// Resolves the bearer of an access token to a stored user.
    pub async fn current_user(&self, access_token: &str) -> AppResult<User> {
        let email = self.keys.decode(access_token, TokenKind::Access)?;
        self.users
            .find_by_email(&email)
            .await
            .map_err(AppError::store)?
            .ok_or(AppError::UserNotFound)
    }

    fn issue_pair(&self, subject: &str) -> AppResult<TokenPair> {
        let sign_failed = |e: anyhow::Error| {
            tracing::error!(error = %e, "jwt sign failed");
            AppError::Internal
        };
        let access = self.keys.sign_access(subject).map_err(sign_failed)?;
        let refresh = self.keys.sign_refresh(subject).map_err(sign_failed)?;
        Ok(TokenPair::bearer(access, refresh))
    }

    fn send_verification(&self, user: &User) -> AppResult<()> {
        let token = self.keys.sign_email_verification(&user.email).map_err(|e| {
            tracing::error!(error = %e, "jwt sign verification failed");
            AppError::Internal
        })?;
        self.mail.enqueue(VerificationEmail {
            email: user.email.clone(),
            username: user.username.clone(),
            token,
        });
        Ok(())
    }
}
