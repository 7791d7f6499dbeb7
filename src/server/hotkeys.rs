//! Per-worker hot-key sampling.
//!
//! Every `sample_rate`-th request on a worker bumps that worker's count for
//! the key hash; once a count reaches `threshold` the entry is promoted into
//! the worker's report table. The reporter loop periodically merges and
//! clears all per-worker tables. Merging races with in-flight samples by at
//! most the in-flight window, which is acceptable for load estimation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use dashmap::DashMap;

use crate::transport::WorkerId;
use crate::utils::KeyHash;

pub(crate) struct HotKeySampler {
    sample_rate: u64,
    threshold: u64,

    /// Per-worker request counters driving the 1-in-N sampling.
    request_count: Vec<AtomicU64>,

    /// Per-worker sampled access counts within the current epoch.
    key_count: Vec<DashMap<KeyHash, u64>>,

    /// Per-worker table of keys whose count crossed the threshold.
    hk_report: Vec<DashMap<KeyHash, u64>>,

    /// Reverse table resolving reported key hashes back to key bytes, for
    /// controller migrations that carry no key.
    key_names: DashMap<KeyHash, Bytes>,
}

impl HotKeySampler {
    pub(crate) fn new(
        n_workers: usize,
        sample_rate: u64,
        threshold: u64,
    ) -> Self {
        HotKeySampler {
            sample_rate,
            threshold,
            request_count: (0..n_workers).map(|_| AtomicU64::new(0)).collect(),
            key_count: (0..n_workers).map(|_| DashMap::new()).collect(),
            hk_report: (0..n_workers).map(|_| DashMap::new()).collect(),
            key_names: DashMap::new(),
        }
    }

    /// Accounts one request on worker `tid`.
    pub(crate) fn observe(&self, tid: WorkerId, keyhash: KeyHash, key: &Bytes) {
        let count = self.request_count[tid].fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.sample_rate != 0 {
            return;
        }

        let mut entry = self.key_count[tid].entry(keyhash).or_insert(0);
        *entry += 1;
        let sampled = *entry;
        drop(entry); // single-key lock section

        if sampled >= self.threshold {
            self.hk_report[tid].insert(keyhash, sampled);
            self.key_names.insert(keyhash, key.clone());
        }
    }

    /// Merges all per-worker report tables into one count map and clears the
    /// per-worker epoch state.
    pub(crate) fn drain_merged(&self) -> HashMap<KeyHash, u64> {
        let mut combined: HashMap<KeyHash, u64> = HashMap::new();
        for tid in 0..self.hk_report.len() {
            for entry in self.hk_report[tid].iter() {
                *combined.entry(*entry.key()).or_insert(0) += *entry.value();
            }
            self.key_count[tid].clear();
            self.hk_report[tid].clear();
        }
        combined
    }

    /// Resolves a reported key hash back to its key bytes.
    pub(crate) fn resolve_key(&self, keyhash: KeyHash) -> Option<Bytes> {
        self.key_names.get(&keyhash).map(|e| e.value().clone())
    }

    /// Drops all sampling state (controller reset).
    pub(crate) fn reset(&self) {
        for tid in 0..self.request_count.len() {
            self.request_count[tid].store(0, Ordering::Relaxed);
            self.key_count[tid].clear();
            self.hk_report[tid].clear();
        }
        self.key_names.clear();
    }
}

#[cfg(test)]
mod hotkeys_tests {
    use super::*;

    fn hot_key() -> Bytes {
        Bytes::from_static(b"hot")
    }

    #[test]
    fn one_in_n_sampling() {
        let sampler = HotKeySampler::new(1, 100, 32);
        for _ in 0..199 {
            sampler.observe(0, 7, &hot_key());
        }
        // 199 requests yield exactly one sample
        assert_eq!(*sampler.key_count[0].get(&7).unwrap(), 1);
        assert!(sampler.hk_report[0].is_empty());
    }

    #[test]
    fn threshold_promotes_to_report() {
        let sampler = HotKeySampler::new(1, 100, 32);
        for _ in 0..3200 {
            sampler.observe(0, 7, &hot_key());
        }
        assert_eq!(*sampler.hk_report[0].get(&7).unwrap(), 32);
        assert_eq!(sampler.resolve_key(7), Some(hot_key()));
    }

    #[test]
    fn drain_merges_and_clears() {
        let sampler = HotKeySampler::new(2, 1, 1);
        sampler.observe(0, 7, &hot_key());
        sampler.observe(0, 7, &hot_key());
        sampler.observe(1, 7, &hot_key());
        sampler.observe(1, 9, &Bytes::from_static(b"other"));

        let merged = sampler.drain_merged();
        assert_eq!(merged.get(&7), Some(&3));
        assert_eq!(merged.get(&9), Some(&1));

        // epoch state cleared; reverse table survives the drain
        assert!(sampler.drain_merged().is_empty());
        assert_eq!(sampler.resolve_key(7), Some(hot_key()));
    }

    #[test]
    fn reset_clears_everything() {
        let sampler = HotKeySampler::new(1, 1, 1);
        sampler.observe(0, 7, &hot_key());
        sampler.reset();
        assert!(sampler.drain_merged().is_empty());
        assert_eq!(sampler.resolve_key(7), None);
    }
}
