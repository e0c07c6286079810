//! Per-route admission control over fixed-window counters.
//!
//! A window starts with the first attempt for a `(route, identity)` key and
//! restarts once `window` has elapsed. A backing-store failure denies the
//! request instead of letting it through.

mod extract;
mod store;

use std::{str::FromStr, sync::Arc};

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::error::{AppError, AppResult};

pub use extract::{
    ChangeAvatar, CreateContact, DeleteContact, ReadContacts, Throttle, UpdateContact, ViewProfile,
};
pub use store::{MemoryRateLimitStore, PgRateLimitStore, RateLimitStore, WindowHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RouteQuota {
    pub max_count: u32,
    pub window_secs: u64,
}

impl RouteQuota {
    pub const fn new(max_count: u32, window_secs: u64) -> Self {
        Self {
            max_count,
            window_secs,
        }
    }

    pub fn window_ms(&self) -> i64 {
        (self.window_secs as i64).saturating_mul(1_000)
    }
}

/// Parses `"<count>/<seconds>"`, e.g. `"10/60"`.
impl FromStr for RouteQuota {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, secs) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("expected <count>/<seconds>, got {s:?}"))?;
        let quota = Self::new(count.trim().parse()?, secs.trim().parse()?);
        anyhow::ensure!(quota.window_secs > 0, "window must be positive");
        Ok(quota)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    Memory,
    Postgres,
}

impl FromStr for RateLimitBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => anyhow::bail!("unknown rate limit backend {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    pub async fn admit(&self, identity: &str, route_key: &str, quota: RouteQuota) -> AppResult<Decision> {
        self.admit_at(identity, route_key, quota, OffsetDateTime::now_utc())
            .await
    }

    pub async fn admit_at(
        &self,
        identity: &str,
        route_key: &str,
        quota: RouteQuota,
        now: OffsetDateTime,
    ) -> AppResult<Decision> {
        let now_ms = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        let window_ms = quota.window_ms();
        let key = format!("{route_key}|{identity}");

        let hit = self.store.hit(&key, now_ms, window_ms).await.map_err(|e| {
            error!(error = %format!("{e:#}"), route = route_key, "rate limit store unavailable");
            AppError::StoreUnavailable
        })?;

        if hit.count <= quota.max_count {
            return Ok(Decision::Allowed {
                remaining: quota.max_count - hit.count,
            });
        }

        let left_ms = (hit.window_start_ms + window_ms - now_ms).max(0);
        let retry_after_secs = ((left_ms + 999) / 1_000).max(1) as u64;
        debug!(route = route_key, identity, count = hit.count, "admission denied");
        Ok(Decision::Limited { retry_after_secs })
    }
}
