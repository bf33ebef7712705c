use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Outcome of one rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited {
        retry_after: Duration,
    },
}

/// Injected counter store behind the advisory per-IP rate limit. In-memory
/// by default; the seam exists so a durable store can replace it without
/// touching the request handler.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomic check-and-increment for one key. Counts the request either
    /// way; advisory only, never a security boundary.
    async fn check_and_increment(&self, key: &str) -> Decision;

    /// Drop entries whose window has elapsed.
    async fn sweep(&self);
}

struct Entry {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counters held in process memory. State resets on restart
/// and is shared by all requests in one process.
pub struct InMemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
    window: Duration,
    max_requests: u32,
}

impl InMemoryCounterStore {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            max_requests,
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn check_and_increment(&self, key: &str) -> Decision {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) > self.window {
            entry.count = 1;
            entry.window_start = now;
        } else {
            entry.count += 1;
        }

        if entry.count > self.max_requests {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.window_start));
            Decision::Limited { retry_after }
        } else {
            Decision::Allowed
        }
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.window_start) <= self.window);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("rate limit sweep evicted {} stale entries", evicted);
        }
    }
}

/// Periodic eviction, independent of request handling.
pub fn spawn_sweeper(
    store: Arc<dyn CounterStore>,
    every: Duration
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.tick().await; // immediate first tick
        loop {
            tick.tick().await;
            store.sweep().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_under_the_limit_are_allowed() {
        let store = InMemoryCounterStore::new(Duration::from_secs(60), 3);
        for _ in 0..3 {
            assert_eq!(store.check_and_increment("1.2.3.4").await, Decision::Allowed);
        }
    }

    #[tokio::test]
    async fn exceeding_the_limit_is_rejected_with_retry_hint() {
        let store = InMemoryCounterStore::new(Duration::from_secs(60), 2);
        assert_eq!(store.check_and_increment("ip").await, Decision::Allowed);
        assert_eq!(store.check_and_increment("ip").await, Decision::Allowed);
        match store.check_and_increment("ip").await {
            Decision::Limited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
            }
            Decision::Allowed => panic!("third request should be limited"),
        }
    }

    #[tokio::test]
    async fn keys_are_counted_independently() {
        let store = InMemoryCounterStore::new(Duration::from_secs(60), 1);
        assert_eq!(store.check_and_increment("a").await, Decision::Allowed);
        assert_eq!(store.check_and_increment("b").await, Decision::Allowed);
        assert!(matches!(store.check_and_increment("a").await, Decision::Limited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_the_count() {
        let store = InMemoryCounterStore::new(Duration::from_secs(60), 1);
        assert_eq!(store.check_and_increment("ip").await, Decision::Allowed);
        assert!(matches!(store.check_and_increment("ip").await, Decision::Limited { .. }));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.check_and_increment("ip").await, Decision::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_elapsed_windows() {
        let store = InMemoryCounterStore::new(Duration::from_secs(60), 10);
        store.check_and_increment("old").await;

        tokio::time::advance(Duration::from_secs(30)).await;
        store.check_and_increment("fresh").await;

        tokio::time::advance(Duration::from_secs(31)).await;
        store.sweep().await;

        let entries = store.entries.lock().await;
        assert!(!entries.contains_key("old"));
        assert!(entries.contains_key("fresh"));
    }
}
