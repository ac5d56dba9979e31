use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::config::DedupSection;

/// Stable key for one inbound request: the media URL plus the update's
/// position in the feed.
pub fn request_fingerprint(url: &str, update_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"_");
    hasher.update(update_id.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Bounded set of recently seen fingerprints. Entries leave either when they
/// outlive the TTL or when capacity forces the oldest one out.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    ttl: Duration,
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl DedupCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn from_config(config: &DedupSection) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_seconds))
    }

    /// Returns `false` when the key is already tracked.
    pub fn insert_if_absent(&mut self, key: &str) -> bool {
        let now = Instant::now();
        self.evict_expired(now);
        if self.seen.contains_key(key) {
            return false;
        }
        while self.seen.len() >= self.capacity {
            match self.order.pop_front() {
                Some((oldest, _)) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
        self.seen.insert(key.to_string(), now);
        self.order.push_back((key.to_string(), now));
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen
            .get(key)
            .map(|inserted| inserted.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((_, inserted)) = self.order.front() {
            if now.duration_since(*inserted) < self.ttl {
                break;
            }
            if let Some((key, _)) = self.order.pop_front() {
                self.seen.remove(&key);
            }
        }
    }
}
