use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::{config::JwtConfig, error::AppError, state::AppState};

/// Signing material plus per-kind lifetimes. Built once from config.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    verify_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::minutes(cfg.ttl_minutes),
            refresh_ttl: Duration::minutes(cfg.refresh_ttl_minutes),
            verify_ttl: Duration::minutes(cfg.verify_ttl_minutes),
        }
    }

    pub fn default_ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::EmailVerification => self.verify_ttl,
        }
    }

    pub fn issue(&self, subject: &str, kind: TokenKind, ttl: Duration) -> anyhow::Result<String> {
        self.issue_at(subject, kind, ttl, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        subject: &str,
        kind: TokenKind,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let exp = now + ttl;
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.unix_timestamp().max(0) as u64,
            exp: exp.unix_timestamp().max(0) as u64,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(subject, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, subject: &str) -> anyhow::Result<String> {
        self.issue(subject, TokenKind::Access, self.default_ttl(TokenKind::Access))
    }

    pub fn sign_refresh(&self, subject: &str) -> anyhow::Result<String> {
        self.issue(subject, TokenKind::Refresh, self.default_ttl(TokenKind::Refresh))
    }

    pub fn sign_email_verification(&self, subject: &str) -> anyhow::Result<String> {
        self.issue(subject, TokenKind::EmailVerification, self.default_ttl(TokenKind::EmailVerification))
    }

    /// Verifies signature, expiry, issuer and audience, then checks the purpose tag.
    /// Returns the subject.
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<String, AppError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => debug!("jwt expired"),
                other => warn!(reason = ?other, "jwt rejected"),
            }
            AppError::InvalidToken
        })?;

        if data.claims.kind != expected {
            warn!(expected = ?expected, got = ?data.claims.kind, "jwt used for wrong purpose");
            return Err(AppError::WrongTokenKind);
        }
        debug!(subject = %data.claims.sub, kind = ?expected, "jwt verified");
        Ok(data.claims.sub)
    }
}
