//! Reasoning response cache.
//!
//! Keyed by md5(system prompt + user prompt + model + temperature), stored in
//! a sled tree with a 24-hour TTL so pipeline retries within a day replay the
//! cached response instead of re-querying the model.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PipelineError;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    text: String,
    cached_at_unix: i64,
}

/// Sled-backed response cache.
pub struct ResponseCache {
    tree: sled::Tree,
    ttl: Duration,
}

impl ResponseCache {
    pub fn open(db: &sled::Db, ttl: Duration) -> Result<Self, PipelineError> {
        let tree = db
            .open_tree("reasoning_cache")
            .map_err(|e| PipelineError::Configuration(format!("reasoning cache: {e}")))?;
        Ok(Self { tree, ttl })
    }

    /// Cache key for one request.
    pub fn key(system_prompt: &str, user_prompt: &str, model: &str, temperature: f64) -> String {
        let canonical = format!("{system_prompt}\x1f{user_prompt}\x1f{model}\x1f{temperature}");
        format!("{:x}", md5::compute(canonical.as_bytes()))
    }

    /// Fresh cached text, if any. Expired entries are removed on read.
    pub fn get(&self, key: &str) -> Option<String> {
        let bytes = self.tree.get(key).ok()??;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
        let age = chrono::Utc::now().timestamp() - entry.cached_at_unix;
        if age < 0 || age as u64 >= self.ttl.as_secs() {
            let _ = self.tree.remove(key);
            return None;
        }
        Some(entry.text)
    }

    /// Store a response. Failures are logged, never fatal — the cache is an
    /// optimization.
    pub fn put(&self, key: &str, text: &str) {
        let entry = CacheEntry {
            text: text.to_string(),
            cached_at_unix: chrono::Utc::now().timestamp(),
        };
        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(e) = self.tree.insert(key, bytes) {
                    tracing::warn!(error = %e, "reasoning cache write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "reasoning cache serialize failed"),
        }
    }
}
