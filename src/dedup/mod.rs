//! Signal deduplication.
//!
//! Collapses repeated signals with the same fingerprint inside a time window
//! so correlation sees events, not a stream. Fingerprints hash the service,
//! the canonical metric name, and stable labels (volatile labels dropped by
//! a configurable pattern).
//!
//! The table is hash-partitioned across lock shards; memory is bounded by
//! LRU eviction with lazy queue cleanup (O(1) amortized).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::config::defaults::DEDUP_SHARDS;
use crate::error::PipelineError;
use crate::types::Signal;

/// Tracked state for one fingerprint.
#[derive(Debug, Clone, Copy)]
struct FingerprintEntry {
    first_seen: Instant,
    count: u32,
}

#[derive(Default)]
struct Shard {
    entries: HashMap<String, FingerprintEntry>,
    /// Insertion order for LRU eviction. May contain stale keys; each pop is
    /// validated against the live entry's `first_seen` before eviction.
    order: VecDeque<(String, Instant)>,
}

/// Windowed, sharded deduplication table.
pub struct DedupTable {
    shards: Vec<Mutex<Shard>>,
    window: Duration,
    max_entries_per_shard: usize,
    volatile_labels: Regex,
    signals_seen: AtomicU64,
    signals_admitted: AtomicU64,
}

impl DedupTable {
    pub fn new(
        window: Duration,
        max_entries: usize,
        volatile_label_pattern: &str,
    ) -> Result<Self, PipelineError> {
        let volatile_labels = Regex::new(volatile_label_pattern).map_err(|e| {
            PipelineError::Configuration(format!("volatile label pattern: {e}"))
        })?;
        Ok(Self {
            shards: (0..DEDUP_SHARDS).map(|_| Mutex::new(Shard::default())).collect(),
            window,
            max_entries_per_shard: (max_entries / DEDUP_SHARDS).max(1),
            volatile_labels,
            signals_seen: AtomicU64::new(0),
            signals_admitted: AtomicU64::new(0),
        })
    }

    /// Stable fingerprint for a signal: service, canonical metric name,
    /// sorted stable labels.
    pub fn fingerprint(&self, signal: &Signal) -> String {
        let mut canonical = format!(
            "{}|{}",
            signal.service,
            signal.metric_name.trim().to_ascii_lowercase()
        );
        for (key, value) in &signal.labels {
            if self.volatile_labels.is_match(key) {
                continue;
            }
            canonical.push('|');
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(value);
        }
        format!("{:x}", md5::compute(canonical.as_bytes()))
    }

    /// Admit a signal or swallow it as a duplicate.
    ///
    /// First sighting within the window passes through; repeats increment the
    /// fingerprint count and return None. After the window expires the
    /// fingerprint resets and the signal is admitted again.
    pub fn admit(&self, signal: Signal) -> Option<Signal> {
        self.signals_seen.fetch_add(1, Ordering::Relaxed);

        let fp = self.fingerprint(&signal);
        let shard_idx = shard_index(&fp, self.shards.len());
        let now = Instant::now();

        #[allow(clippy::unwrap_used)] // poisoned dedup lock is unrecoverable
        let mut shard = self.shards[shard_idx].lock().unwrap();

        if let Some(entry) = shard.entries.get_mut(&fp) {
            if now.duration_since(entry.first_seen) < self.window {
                entry.count += 1;
                tracing::debug!(fingerprint = %fp, count = entry.count, "duplicate signal suppressed");
                return None;
            }
        }

        // New window for this fingerprint.
        shard
            .entries
            .insert(fp.clone(), FingerprintEntry { first_seen: now, count: 1 });
        shard.order.push_back((fp, now));
        Self::evict(&mut shard, self.max_entries_per_shard, self.window, now);

        self.signals_admitted.fetch_add(1, Ordering::Relaxed);
        Some(signal)
    }

    /// Suppressed-duplicate count for a signal's fingerprint within the
    /// current window (0 when only seen once). Feeds incident
    /// `duplicate_count`.
    pub fn duplicates_for(&self, signal: &Signal) -> u32 {
        let fp = self.fingerprint(signal);
        #[allow(clippy::unwrap_used)]
        let shard = self.shards[shard_index(&fp, self.shards.len())].lock().unwrap();
        shard.entries.get(&fp).map_or(0, |e| e.count.saturating_sub(1))
    }

    /// Drop expired entries from the front of the order queue, then enforce
    /// the per-shard cap. Stale queue keys (re-admitted later) are skipped.
    fn evict(shard: &mut Shard, cap: usize, window: Duration, now: Instant) {
        loop {
            let expired = match shard.order.front() {
                Some((_, inserted)) => now.duration_since(*inserted) >= window,
                None => break,
            };
            let over_cap = shard.entries.len() > cap;
            if !expired && !over_cap {
                break;
            }
            #[allow(clippy::unwrap_used)] // front checked above
            let (key, inserted) = shard.order.pop_front().unwrap();
            match shard.entries.get(&key) {
                // Only remove when the queue slot still describes the live entry.
                Some(entry) if entry.first_seen == inserted => {
                    shard.entries.remove(&key);
                }
                _ => {} // stale slot, entry was refreshed
            }
        }
    }

    /// (seen, admitted) counters; compression ratio = seen / admitted.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.signals_seen.load(Ordering::Relaxed),
            self.signals_admitted.load(Ordering::Relaxed),
        )
    }

    pub fn compression_ratio(&self) -> f64 {
        let (seen, admitted) = self.stats();
        if admitted == 0 {
            1.0
        } else {
            seen as f64 / admitted as f64
        }
    }
}

fn shard_index(fingerprint: &str, shards: usize) -> usize {
    // Fingerprints are md5 hex; the first byte is uniform enough.
    usize::from(fingerprint.as_bytes()[0]) % shards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::VOLATILE_LABEL_PATTERN;
    use crate::types::SignalSource;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn make_signal(service: &str, metric: &str, labels: &[(&str, &str)]) -> Signal {
        Signal {
            service: service.to_string(),
            metric_name: metric.to_string(),
            value: 10.0,
            baseline: 2.0,
            deviation_sigma: 4.0,
            timestamp: Utc::now(),
            source: SignalSource::Metric,
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn table(window_ms: u64) -> DedupTable {
        DedupTable::new(
            Duration::from_millis(window_ms),
            1000,
            VOLATILE_LABEL_PATTERN,
        )
        .unwrap()
    }

    #[test]
    fn duplicate_within_window_is_suppressed() {
        let table = table(60_000);
        let s = make_signal("svc", "error_rate", &[]);
        assert!(table.admit(s.clone()).is_some());
        assert!(table.admit(s.clone()).is_none());
        assert_eq!(table.duplicates_for(&s), 1);
        assert_eq!(table.stats(), (2, 1));
    }

    #[test]
    fn resubmission_after_window_is_admitted() {
        let table = table(20);
        let s = make_signal("svc", "error_rate", &[]);
        assert!(table.admit(s.clone()).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(table.admit(s).is_some());
    }

    #[test]
    fn volatile_labels_do_not_split_fingerprints() {
        let table = table(60_000);
        let a = make_signal("svc", "error_rate", &[("instance", "pod-1"), ("env", "prod")]);
        let b = make_signal("svc", "error_rate", &[("instance", "pod-7"), ("env", "prod")]);
        assert_eq!(table.fingerprint(&a), table.fingerprint(&b));

        let c = make_signal("svc", "error_rate", &[("env", "staging")]);
        assert_ne!(table.fingerprint(&a), table.fingerprint(&c));
    }

    #[test]
    fn metric_name_is_canonicalized() {
        let table = table(60_000);
        let a = make_signal("svc", "Error_Rate ", &[]);
        let b = make_signal("svc", "error_rate", &[]);
        assert_eq!(table.fingerprint(&a), table.fingerprint(&b));
    }

    #[test]
    fn eviction_bounds_memory() {
        let table = DedupTable::new(Duration::from_secs(600), DEDUP_SHARDS, VOLATILE_LABEL_PATTERN)
            .unwrap(); // cap of 1 entry per shard
        for i in 0..200 {
            let s = make_signal("svc", &format!("metric_{i}"), &[]);
            table.admit(s);
        }
        let total: usize = table
            .shards
            .iter()
            .map(|s| s.lock().unwrap().entries.len())
            .sum();
        assert!(total <= DEDUP_SHARDS, "cap exceeded: {total}");
    }
}
