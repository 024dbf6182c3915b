//! Token-bucket rate limiting for LLM calls
//!
//! Capacity refills once per minute window: the bucket key is
//! `floor(unix_seconds / 60)`, so the Nth call past the quota inside one
//! window is denied and the first call after rollover succeeds.
//!
//! The counter store sits behind a trait so a shared backend can replace the
//! in-process map. If the store fails, the limiter fails open — a broken
//! counter must not stall requests — and logs the degraded mode.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Result of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Ok,
    Denied,
}

/// Atomic counter store keyed by (key, minute window).
///
/// `increment` returns the count *after* adding `cost`. Implementations expire
/// entries shortly after their window passes.
pub trait CounterStore: Send + Sync {
    fn increment(&self, key: &str, window: u64, cost: u32) -> anyhow::Result<u64>;
}

/// In-process counter store over a mutex-guarded map.
#[derive(Default)]
pub struct MemoryCounterStore {
    buckets: Mutex<HashMap<(String, u64), u64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &str, window: u64, cost: u32) -> anyhow::Result<u64> {
        let mut buckets = self.buckets.lock().unwrap();
        // Drop windows older than the previous one; the grace window keeps
        // in-flight rollover reads coherent.
        buckets.retain(|(_, w), _| *w + 1 >= window);
        let count = buckets.entry((key.to_string(), window)).or_insert(0);
        *count += cost as u64;
        Ok(*count)
    }
}

/// Token-bucket limiter over a shared counter store.
pub struct RateLimiter {
    store: Box<dyn CounterStore>,
    per_minute: u32,
}

impl RateLimiter {
    pub fn new(store: Box<dyn CounterStore>, per_minute: u32) -> Self {
        RateLimiter { store, per_minute }
    }

    /// Limiter with the in-process store.
    pub fn in_memory(per_minute: u32) -> Self {
        Self::new(Box::new(MemoryCounterStore::new()), per_minute)
    }

    /// Try to consume `cost` tokens for `key` at time `now`.
    ///
    /// A quota of 0 disables limiting entirely.
    pub fn acquire_at(&self, key: &str, cost: u32, now: SystemTime) -> Acquire {
        if self.per_minute == 0 {
            return Acquire::Ok;
        }

        let seconds = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let window = seconds / 60;

        match self.store.increment(key, window, cost) {
            Ok(count) if count <= self.per_minute as u64 => Acquire::Ok,
            Ok(_) => Acquire::Denied,
            Err(e) => {
                // Fail open: a broken counter store must not stall requests.
                tracing::warn!(error = %e, "rate limit store unavailable, allowing request");
                Acquire::Ok
            }
        }
    }

    pub fn acquire(&self, key: &str, cost: u32) -> Acquire {
        self.acquire_at(key, cost, SystemTime::now())
    }
}
