use crate::types::DetectResponse;
use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Content hash of an uploaded image. Byte-exact: any re-encoding of the
/// same picture produces a different key.
pub fn cache_key(image_bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(image_bytes))
}

/// Memo of full detection responses, keyed by `cache_key`.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<DetectResponse>;
    async fn put(&self, key: &str, value: DetectResponse, ttl: Duration);
}

struct Entry {
    value: DetectResponse,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process cache bounded by entry count; the least recently used entry
/// is evicted first and expired entries are dropped on access.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> MemoryCache {
        MemoryCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<DetectResponse> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let live = entries.peek(key)?.is_live(now);
        if !live {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    async fn put(&self, key: &str, value: DetectResponse, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            entries.pop(&key);
        }
        entries.put(
            key.to_string(),
            Entry {
                value,
                expires_at: now.checked_add(ttl),
            },
        );
    }
}
