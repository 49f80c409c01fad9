//! Idempotency-key dedup window. Deliberately kept in the ingress layer
//! rather than `RunStore`:
//! `RunStore::create_run` already rejects a reused key outright rather than
//! handing back the run it's bound to, so ingress needs its own short-lived
//! map from key to the `run_id` it produced the first time.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Five minutes, matching the webhook replay tolerance
/// ([`crate::webhook::DEFAULT_REPLAY_WINDOW_SECS`]).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// In-memory `idempotency_key -> run_id` cache with a sliding expiry. One
/// instance is shared across all ingress calls for a process.
pub struct IdempotencyWindow {
    window: Duration,
    seen: Mutex<HashMap<String, (Uuid, Instant)>>,
}

impl IdempotencyWindow {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the `run_id` already bound to `key` if it was seen within the
    /// window, otherwise records `run_id` against it and returns `None`.
    pub async fn check_or_insert(&self, key: &str, run_id: Uuid) -> Option<Uuid> {
        let mut seen = self.seen.lock().await;
        seen.retain(|_, (_, at)| at.elapsed() < self.window);
        if let Some((existing, _)) = seen.get(key) {
            return Some(*existing);
        }
        seen.insert(key.to_string(), (run_id, Instant::now()));
        None
    }
}

impl Default for IdempotencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_submission_with_same_key_returns_first_run_id() {
        let window = IdempotencyWindow::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(window.check_or_insert("key-a", first).await.is_none());
        assert_eq!(window.check_or_insert("key-a", second).await, Some(first));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let window = IdempotencyWindow::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(window.check_or_insert("key-a", a).await.is_none());
        assert!(window.check_or_insert("key-b", b).await.is_none());
    }
}
