use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;

/// Counter state for one key after an attempt was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub count: u32,
    pub window_start_ms: i64,
}

/// Backing store for fixed-window counters. `hit` must increment and read atomically.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Records one attempt for `key`. A window older than `window_ms` is restarted at `now_ms`.
    async fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> anyhow::Result<WindowHit>;
}

const SWEEP_THRESHOLD: usize = 10_000;
const SWEEP_EVERY_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy)]
struct Slot {
    hit: WindowHit,
    window_ms: i64,
}

#[derive(Default)]
struct Slots {
    map: HashMap<String, Slot>,
    last_sweep_ms: i64,
}

impl Slots {
    /// Drops closed windows, at most once per `SWEEP_EVERY_MS` and only above the threshold.
    fn maybe_sweep(&mut self, now_ms: i64) {
        if self.map.len() < SWEEP_THRESHOLD || now_ms - self.last_sweep_ms < SWEEP_EVERY_MS {
            return;
        }
        self.map
            .retain(|_, s| s.hit.window_start_ms + s.window_ms > now_ms);
        self.last_sweep_ms = now_ms;
    }
}

/// Process-local store; counters are not shared between replicas.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    slots: Mutex<Slots>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> anyhow::Result<WindowHit> {
        let mut slots = self.slots.lock().await;
        slots.maybe_sweep(now_ms);

        let slot = slots.map.entry(key.to_string()).or_insert(Slot {
            hit: WindowHit {
                count: 0,
                window_start_ms: now_ms,
            },
            window_ms,
        });
        if slot.hit.window_start_ms + window_ms <= now_ms {
            slot.hit = WindowHit {
                count: 0,
                window_start_ms: now_ms,
            };
        }
        slot.window_ms = window_ms;
        slot.hit.count = slot.hit.count.saturating_add(1);
        Ok(slot.hit)
    }
}

/// Shared store for multi-instance deployments: one upsert per attempt.
#[derive(Clone)]
pub struct PgRateLimitStore {
    db: PgPool,
}

impl PgRateLimitStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Deletes windows that started before `older_than_ms`.
    pub async fn purge_expired(&self, older_than_ms: i64) -> anyhow::Result<u64> {
        let deleted = sqlx::query("DELETE FROM rate_limits WHERE window_start_ms < $1")
            .bind(older_than_ms)
            .execute(&self.db)
            .await
            .context("purge rate limits")?
            .rows_affected();
        Ok(deleted)
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> anyhow::Result<WindowHit> {
        let (count, window_start_ms) = sqlx::query_as::<_, (i32, i64)>(
            r#"
            INSERT INTO rate_limits (key, window_start_ms, hits)
            VALUES ($1, $2, 1)
            ON CONFLICT (key) DO UPDATE SET
                window_start_ms = CASE
                    WHEN rate_limits.window_start_ms + $3 <= $2 THEN $2
                    ELSE rate_limits.window_start_ms
                END,
                hits = CASE
                    WHEN rate_limits.window_start_ms + $3 <= $2 THEN 1
                    ELSE rate_limits.hits + 1
                END
            RETURNING hits, window_start_ms
            "#,
        )
        .bind(key)
        .bind(now_ms)
        .bind(window_ms)
        .fetch_one(&self.db)
        .await
        .context("rate limit upsert")?;

        Ok(WindowHit {
            count: count.max(0) as u32,
            window_start_ms,
        })
    }
}
