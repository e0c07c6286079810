use std::time::Duration;

use time::OffsetDateTime;

mod app;
mod auth;
mod config;
mod contacts;
mod error;
mod extract;
mod mail;
mod rate_limit;
mod state;
mod storage;
mod users;

#[cfg(test)]
mod testing;

use crate::{
    config::AppConfig,
    rate_limit::{PgRateLimitStore, RateLimitBackend},
    state::AppState,
};

const PURGE_EVERY: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "contactbook=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let app_state = AppState::init(config).await?;

    sqlx::migrate!("./migrations").run(&app_state.db).await?;

    if app_state.config.rate_limit.backend == RateLimitBackend::Postgres {
        spawn_rate_limit_purge(&app_state);
    }

    let app = app::build_app(app_state);
    app::serve(app).await
}

/// Drops counter rows whose window closed long ago.
fn spawn_rate_limit_purge(state: &AppState) {
    let store = PgRateLimitStore::new(state.db.clone());
    let rl = &state.config.rate_limit;
    let longest_ms = [rl.read, rl.create, rl.update, rl.delete, rl.profile, rl.avatar]
        .iter()
        .map(|q| q.window_ms())
        .max()
        .unwrap_or(0);

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PURGE_EVERY);
        loop {
            tick.tick().await;
            let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
            match store.purge_expired(now_ms - longest_ms).await {
                Ok(n) if n > 0 => tracing::debug!(deleted = n, "purged rate limit windows"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %format!("{e:#}"), "rate limit purge failed"),
            }
        }
    });
}
