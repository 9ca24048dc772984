// Engine metrics
//
// Counters for one matcher instance: events seen, candidates created and
// retired, matches emitted, and evictions by reason. Relaxed atomics keep
// the hot path cheap; the struct is shared as Arc between the engine and
// the facade.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Why a candidate left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Reached a final state and was published
    Completed,
    /// Violated the window constraint
    WindowViolation,
    /// A negation predicate matched
    NegationKill,
    /// Discarded wholesale (first-match reset or shutdown drain)
    Cleared,
}

#[derive(Debug, Default)]
pub struct EngineMetrics {
    events_processed: AtomicU64,
    matches_emitted: AtomicU64,
    structures_created: AtomicU64,
    active_structures: AtomicUsize,
    peak_active_structures: AtomicUsize,
    evictions: RwLock<AHashMap<EvictionReason, u64>>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_event(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn structure_created(&self) {
        self.structures_created.fetch_add(1, Ordering::Relaxed);
        let current = self.active_structures.fetch_add(1, Ordering::Relaxed) + 1;
        self.update_peak(current);
    }

    pub fn structures_removed(&self, count: usize) {
        self.active_structures.fetch_sub(count, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, reason: EvictionReason) {
        *self.evictions.write().entry(reason).or_insert(0) += 1;
    }

    fn update_peak(&self, current: usize) {
        loop {
            let peak = self.peak_active_structures.load(Ordering::Relaxed);
            if current <= peak {
                break;
            }
            if self
                .peak_active_structures
                .compare_exchange_weak(peak, current, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn matches_emitted(&self) -> u64 {
        self.matches_emitted.load(Ordering::Relaxed)
    }

    pub fn structures_created(&self) -> u64 {
        self.structures_created.load(Ordering::Relaxed)
    }

    pub fn active_structures(&self) -> usize {
        self.active_structures.load(Ordering::Relaxed)
    }

    pub fn peak_active_structures(&self) -> usize {
        self.peak_active_structures.load(Ordering::Relaxed)
    }

    pub fn evictions(&self, reason: EvictionReason) -> u64 {
        self.evictions.read().get(&reason).copied().unwrap_or(0)
    }

    /// Point-in-time summary of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_evictions = self.evictions.read().values().sum();
        MetricsSnapshot {
            events_processed: self.events_processed(),
            matches_emitted: self.matches_emitted(),
            structures_created: self.structures_created(),
            active_structures: self.active_structures(),
            peak_active_structures: self.peak_active_structures(),
            total_evictions,
        }
    }
}

/// Summary of engine metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub matches_emitted: u64,
    pub structures_created: u64,
    pub active_structures: usize,
    pub peak_active_structures: usize,
    pub total_evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = EngineMetrics::new();

        metrics.record_event();
        metrics.record_event();
        assert_eq!(metrics.events_processed(), 2);

        metrics.structure_created();
        metrics.structure_created();
        assert_eq!(metrics.active_structures(), 2);
        assert_eq!(metrics.peak_active_structures(), 2);

        metrics.structures_removed(1);
        assert_eq!(metrics.active_structures(), 1);
        // peak stays
        assert_eq!(metrics.peak_active_structures(), 2);

        metrics.record_match();
        assert_eq!(metrics.matches_emitted(), 1);
    }

    #[test]
    fn test_evictions_by_reason() {
        let metrics = EngineMetrics::new();
        metrics.record_eviction(EvictionReason::WindowViolation);
        metrics.record_eviction(EvictionReason::WindowViolation);
        metrics.record_eviction(EvictionReason::NegationKill);

        assert_eq!(metrics.evictions(EvictionReason::WindowViolation), 2);
        assert_eq!(metrics.evictions(EvictionReason::NegationKill), 1);
        assert_eq!(metrics.evictions(EvictionReason::Completed), 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = EngineMetrics::new();
        metrics.record_event();
        metrics.structure_created();
        metrics.record_match();
        metrics.record_eviction(EvictionReason::Completed);
        metrics.structures_removed(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_processed, 1);
        assert_eq!(snap.matches_emitted, 1);
        assert_eq!(snap.structures_created, 1);
        assert_eq!(snap.active_structures, 0);
        assert_eq!(snap.peak_active_structures, 1);
        assert_eq!(snap.total_evictions, 1);
    }
}
