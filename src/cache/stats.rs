//! Cache Statistics Module
//!
//! Tracks hit/miss/write counters across both tiers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Fresh entries served from the shared store
    pub shared_hits: u64,
    /// Entries served from the local fallback store
    pub local_hits: u64,
    /// Reads that found nothing usable in either tier
    pub misses: u64,
    /// Shared entries rejected because one of their tags was revalidated
    pub stale_reads: u64,
    /// Writes that landed in the shared store
    pub shared_writes: u64,
    /// Writes that landed in the local store
    pub local_writes: u64,
    /// Shared writes that failed and were redirected to the local store
    pub write_fallbacks: u64,
    /// revalidateTag calls
    pub tag_revalidations: u64,
    /// Local entries evicted by the LRU policy
    pub evictions: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.shared_hits + self.local_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters shared by every coordinator handle.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    shared_hits: AtomicU64,
    local_hits: AtomicU64,
    misses: AtomicU64,
    stale_reads: AtomicU64,
    shared_writes: AtomicU64,
    local_writes: AtomicU64,
    write_fallbacks: AtomicU64,
    tag_revalidations: AtomicU64,
    evictions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_shared_hit(&self) {
        bump(&self.shared_hits);
    }

    pub fn record_local_hit(&self) {
        bump(&self.local_hits);
    }

    pub fn record_miss(&self) {
        bump(&self.misses);
    }

    pub fn record_stale_read(&self) {
        bump(&self.stale_reads);
    }

    pub fn record_shared_write(&self) {
        bump(&self.shared_writes);
    }

    pub fn record_local_write(&self) {
        bump(&self.local_writes);
    }

    pub fn record_write_fallback(&self) {
        bump(&self.write_fallbacks);
    }

    pub fn record_tag_revalidation(&self) {
        bump(&self.tag_revalidations);
    }

    pub fn record_eviction(&self) {
        bump(&self.evictions);
    }

    // == Snapshot ==
    pub fn snapshot(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            shared_hits: load(&self.shared_hits),
            local_hits: load(&self.local_hits),
            misses: load(&self.misses),
            stale_reads: load(&self.stale_reads),
            shared_writes: load(&self.shared_writes),
            local_writes: load(&self.local_writes),
            write_fallbacks: load(&self.write_fallbacks),
            tag_revalidations: load(&self.tag_revalidations),
            evictions: load(&self.evictions),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StatsRecorder::new().snapshot();
        assert_eq!(stats, CacheStats::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_both_tiers() {
        let recorder = StatsRecorder::new();
        recorder.record_shared_hit();
        recorder.record_local_hit();
        recorder.record_miss();
        recorder.record_miss();

        let stats = recorder.snapshot();
        assert_eq!(stats.shared_hits, 1);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_write_counters() {
        let recorder = StatsRecorder::new();
        recorder.record_shared_write();
        recorder.record_write_fallback();
        recorder.record_local_write();
        recorder.record_eviction();
        recorder.record_eviction();

        let stats = recorder.snapshot();
        assert_eq!(stats.shared_writes, 1);
        assert_eq!(stats.write_fallbacks, 1);
        assert_eq!(stats.local_writes, 1);
        assert_eq!(stats.evictions, 2);
    }
}
