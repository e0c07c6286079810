use serde::Deserialize;

use crate::rate_limit::{RateLimitBackend, RouteQuota};

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub verify_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Quotas per route class, each `(max_count, window)`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    pub read: RouteQuota,
    pub create: RouteQuota,
    pub update: RouteQuota,
    pub delete: RouteQuota,
    pub profile: RouteQuota,
    pub avatar: RouteQuota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Postgres,
            read: RouteQuota::new(10, 60),
            create: RouteQuota::new(5, 60),
            update: RouteQuota::new(3, 60),
            delete: RouteQuota::new(1, 60),
            profile: RouteQuota::new(2, 20),
            avatar: RouteQuota::new(1, 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub base_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub smtp: Option<SmtpConfig>,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let base_url = std::env::var("APP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "contactbook".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "contactbook-users".into()),
            ttl_minutes: env_parse("JWT_ACCESS_TTL_MINUTES", 15),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7),
            verify_ttl_minutes: env_parse("JWT_VERIFY_TTL_MINUTES", 60 * 24),
        };

        let storage = StorageConfig {
            endpoint: std::env::var("S3_ENDPOINT").unwrap_or_else(|_| "http://localhost:9000".into()),
            bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "contactbook".into()),
            access_key: std::env::var("S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: std::env::var("S3_SECRET_KEY").unwrap_or_default(),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };

        // No SMTP host means verification links are only logged.
        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: env_parse("SMTP_PORT", 465),
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                from: std::env::var("MAIL_FROM")
                    .unwrap_or_else(|_| "Contact Book <noreply@contactbook.local>".into()),
            }),
            _ => None,
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            backend: std::env::var("RATE_LIMIT_BACKEND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.backend),
            read: quota_from_env("RATE_LIMIT_READ", defaults.read),
            create: quota_from_env("RATE_LIMIT_CREATE", defaults.create),
            update: quota_from_env("RATE_LIMIT_UPDATE", defaults.update),
            delete: quota_from_env("RATE_LIMIT_DELETE", defaults.delete),
            profile: quota_from_env("RATE_LIMIT_PROFILE", defaults.profile),
            avatar: quota_from_env("RATE_LIMIT_AVATAR", defaults.avatar),
        };

        Ok(Self {
            database_url,
            base_url,
            jwt,
            storage,
            smtp,
            rate_limit,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn quota_from_env(key: &str, default: RouteQuota) -> RouteQuota {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
