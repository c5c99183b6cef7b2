use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// (source chat id, message id)
pub type DedupKey = (i64, i32);

/// Recently processed messages, forgotten after `ttl`.
#[derive(Clone)]
pub struct DedupCache {
    seen: Arc<Mutex<HashMap<DedupKey, Instant>>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Returns true when `key` was already seen within the TTL. Otherwise
    /// records it and returns false.
    pub fn check_and_mark(&self, key: DedupKey) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        let ttl = self.ttl;
        seen.retain(|_, at| now.duration_since(*at) < ttl);

        if seen.contains_key(&key) {
            return true;
        }
        seen.insert(key, now);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
