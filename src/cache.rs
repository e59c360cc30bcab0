//! At-most-one-per-fingerprint response cache.
//!
//! Entries are fresh for a fixed window from creation; a stale entry found
//! on read is evicted and never returned. Cleanup is lazy and amortized:
//! `put` sweeps all stale entries once the table exceeds its capacity.
//! Single-writer-per-key is a property of the orchestrator, not enforced
//! here; entries are replaced wholesale, never mutated in place.

use crate::extract::Mcq;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Deterministic digest over (content, requested count), the cache key.
pub fn fingerprint(content: &str, requested_count: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(requested_count.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    mcqs: Vec<Mcq>,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Fresh hit or absent. A stale entry is evicted on the spot.
    pub fn get(&self, fingerprint: &str) -> Option<Vec<Mcq>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(fingerprint) {
            Some(entry) if now - entry.created_at < self.ttl => Some(entry.mcqs.clone()),
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, fingerprint: String, mcqs: Vec<Mcq>) {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            fingerprint,
            CacheEntry {
                mcqs,
                created_at: now,
            },
        );
        if entries.len() > self.max_entries {
            let before = entries.len();
            entries.retain(|_, entry| now - entry.created_at < self.ttl);
            debug!(
                target: "mcq_pipeline::cache",
                swept = before - entries.len(),
                remaining = entries.len(),
                "swept stale cache entries"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
