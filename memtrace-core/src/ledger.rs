//! The process-global allocation ledger: a concurrent `address ->
//! AllocationRecord` map plus the running/peak live-byte counters and the
//! peak-moment snapshot grouped by owning callstack.

use crate::callstack::CallstackId;
use crate::rangemap::RangeMap;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Allocation kind, matching spec §3's `AllocationKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Heap,
    AnonMap,
}

const MIB: usize = 1024 * 1024;
const HIGH_BIT: u32 = 1 << 31;

/// A live allocation's bookkeeping record. The size is compressed to MiB
/// resolution once it would no longer fit a `u32` byte count, bounding the
/// ledger's own per-record overhead for very large allocations -- the
/// concrete mechanism behind spec §2's "compact allocation ledger".
#[derive(Debug, Clone, Copy)]
pub struct AllocationRecord {
    pub callstack_id: CallstackId,
    compressed_size: u32,
}

impl AllocationRecord {
    fn new(callstack_id: CallstackId, size: usize) -> Self {
        let compressed_size = if size >= HIGH_BIT as usize {
            (((size + MIB / 2) / MIB) as u32) | HIGH_BIT
        } else {
            size as u32
        };
        Self {
            callstack_id,
            compressed_size,
        }
    }

    pub fn size(&self) -> usize {
        if self.compressed_size >= HIGH_BIT {
            (self.compressed_size - HIGH_BIT) as usize * MIB
        } else {
            self.compressed_size as usize
        }
    }
}

/// The ledger content at the instant `total_live_bytes` last reached a new
/// maximum, grouped by owning callstack.
#[derive(Debug, Clone, Default)]
pub struct PeakSnapshot {
    pub total_bytes: usize,
    pub by_callstack: HashMap<CallstackId, usize>,
}

pub struct Ledger {
    allocations: DashMap<usize, AllocationRecord>,
    anon_mmaps: RangeMap,
    total_live_bytes: AtomicUsize,
    peak_live_bytes: AtomicUsize,
    peak_snapshot: RwLock<PeakSnapshot>,
    default_output_path: RwLock<String>,
}

impl Ledger {
    pub fn new(default_output_path: impl Into<String>) -> Self {
        Self {
            allocations: DashMap::new(),
            anon_mmaps: RangeMap::new(),
            total_live_bytes: AtomicUsize::new(0),
            peak_live_bytes: AtomicUsize::new(0),
            peak_snapshot: RwLock::new(PeakSnapshot::default()),
            default_output_path: RwLock::new(default_output_path.into()),
        }
    }

    pub fn total_live_bytes(&self) -> usize {
        self.total_live_bytes.load(Ordering::Relaxed)
    }

    pub fn peak_live_bytes(&self) -> usize {
        self.peak_live_bytes.load(Ordering::Relaxed)
    }

    pub fn default_output_path(&self) -> String {
        self.default_output_path.read().unwrap().clone()
    }

    /// Record a heap allocation attributed to `callstack_id`. A buggy
    /// caller reusing a live address (a prior `free()` we never saw)
    /// overwrites the old record rather than double counting it forever.
    pub fn add(&self, address: usize, size: usize, callstack_id: CallstackId) {
        let record = AllocationRecord::new(callstack_id, size);
        if let Some(old) = self.allocations.insert(address, record) {
            self.total_live_bytes.fetch_sub(old.size(), Ordering::AcqRel);
        }
        self.total_live_bytes
            .fetch_add(record.size(), Ordering::AcqRel);
        self.maybe_capture_peak();
    }

    /// Remove a heap allocation. A `free()` of an address we never recorded
    /// (it may predate tracking, or belong to a reentrant/untracked call) is
    /// silently ignored.
    pub fn remove(&self, address: usize) {
        if let Some((_, record)) = self.allocations.remove(&address) {
            self.total_live_bytes
                .fetch_sub(record.size(), Ordering::AcqRel);
        }
    }

    pub fn add_anon_mmap(&self, address: usize, size: usize, callstack_id: CallstackId) {
        self.anon_mmaps.add(address, size, callstack_id);
        self.total_live_bytes.fetch_add(size, Ordering::AcqRel);
        self.maybe_capture_peak();
    }

    pub fn remove_anon_mmap(&self, address: usize, size: usize) {
        for (_, removed) in self.anon_mmaps.remove(address, size) {
            self.total_live_bytes.fetch_sub(removed, Ordering::AcqRel);
        }
    }

    /// After any mutation that can increase `total_live_bytes`, compare
    /// against the running peak with strict inequality -- a total that
    /// merely matches the previous peak does not trigger a new snapshot --
    /// and, on a new peak, replace the snapshot wholesale. The replacement
    /// happens under a write lock that `add`/`remove` never take, so it
    /// never blocks concurrent mutators of unrelated addresses.
    fn maybe_capture_peak(&self) {
        let current = self.total_live_bytes.load(Ordering::Acquire);
        let previous_peak = self.peak_live_bytes.fetch_max(current, Ordering::AcqRel);
        if current > previous_peak {
            let mut by_callstack: HashMap<CallstackId, usize> = HashMap::new();
            for entry in self.allocations.iter() {
                *by_callstack.entry(entry.callstack_id).or_insert(0) += entry.size();
            }
            for (callstack_id, bytes) in self.anon_mmaps.snapshot() {
                *by_callstack.entry(callstack_id).or_insert(0) += bytes;
            }
            *self.peak_snapshot.write().unwrap() = PeakSnapshot {
                total_bytes: current,
                by_callstack,
            };
        }
    }

    pub fn peak_snapshot(&self) -> PeakSnapshot {
        self.peak_snapshot.read().unwrap().clone()
    }

    /// Current (not peak) live bytes grouped by owning callstack.
    pub fn current_snapshot(&self) -> HashMap<CallstackId, usize> {
        let mut by_callstack: HashMap<CallstackId, usize> = HashMap::new();
        for entry in self.allocations.iter() {
            *by_callstack.entry(entry.callstack_id).or_insert(0) += entry.size();
        }
        for (callstack_id, bytes) in self.anon_mmaps.snapshot() {
            *by_callstack.entry(callstack_id).or_insert(0) += bytes;
        }
        by_callstack
    }

    /// Drop all records and the peak snapshot, zero both counters, and
    /// remember `default_output_path` for a later bare `dump_peak` call.
    pub fn reset(&self, default_output_path: impl Into<String>) {
        self.allocations.clear();
        self.anon_mmaps.clear();
        self.total_live_bytes.store(0, Ordering::Release);
        self.peak_live_bytes.store(0, Ordering::Release);
        *self.peak_snapshot.write().unwrap() = PeakSnapshot::default();
        *self.default_output_path.write().unwrap() = default_output_path.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_live_bytes_tracks_sum_of_live_allocations() {
        let ledger = Ledger::new("/tmp");
        ledger.add(1, 50, 0);
        ledger.add(2, 50, 0);
        assert_eq!(ledger.total_live_bytes(), 100);
        ledger.remove(1);
        assert_eq!(ledger.total_live_bytes(), 50);
        ledger.add(3, 30, 0);
        assert_eq!(ledger.total_live_bytes(), 80);
    }

    #[test]
    fn remove_of_unknown_address_is_a_no_op() {
        let ledger = Ledger::new("/tmp");
        ledger.add(1, 50, 0);
        ledger.remove(999);
        assert_eq!(ledger.total_live_bytes(), 50);
    }

    #[test]
    fn peak_never_decreases_and_requires_strictly_greater_total() {
        let ledger = Ledger::new("/tmp");
        ledger.add(1, 100, 0);
        assert_eq!(ledger.peak_live_bytes(), 100);
        ledger.remove(1);
        assert_eq!(ledger.peak_live_bytes(), 100);
        ledger.add(2, 100, 0); // matches, not exceeds, the previous peak
        assert_eq!(ledger.peak_live_bytes(), 100);
        ledger.add(3, 1, 0); // now strictly exceeds
        assert_eq!(ledger.peak_live_bytes(), 101);
    }

    #[test]
    fn peak_snapshot_reflects_the_moment_peak_was_hit() {
        let ledger = Ledger::new("/tmp");
        // S2 from spec §8: malloc(50), malloc(50), free(first), malloc(30)
        ledger.add(1, 50, 10);
        ledger.add(2, 50, 20);
        ledger.remove(1);
        ledger.add(3, 30, 30);
        assert_eq!(ledger.peak_live_bytes(), 100);
        let snap = ledger.peak_snapshot();
        assert_eq!(snap.total_bytes, 100);
        assert_eq!(snap.by_callstack.get(&10), Some(&50));
        assert_eq!(snap.by_callstack.get(&20), Some(&50));
        assert_eq!(snap.by_callstack.get(&30), None);
    }

    #[test]
    fn duplicate_address_add_overwrites_and_adjusts_total() {
        let ledger = Ledger::new("/tmp");
        ledger.add(1, 50, 0);
        ledger.add(1, 200, 0);
        assert_eq!(ledger.total_live_bytes(), 200);
    }

    #[test]
    fn reset_restores_empty_state_regardless_of_prior_activity() {
        let ledger = Ledger::new("/tmp");
        ledger.add(1, 50, 0);
        ledger.add_anon_mmap(1_000_000, 4096, 1);
        ledger.reset("/var/tmp");
        assert_eq!(ledger.total_live_bytes(), 0);
        assert_eq!(ledger.peak_live_bytes(), 0);
        assert!(ledger.peak_snapshot().by_callstack.is_empty());
        assert_eq!(ledger.default_output_path(), "/var/tmp");

        ledger.reset("/tmp");
        assert_eq!(ledger.total_live_bytes(), 0);
    }

    #[test]
    fn anon_mmap_without_anonymous_flag_is_simply_never_added() {
        // Modeled as: caller only invokes add_anon_mmap for MAP_ANONYMOUS
        // mappings in the first place (spec §4.2); the ledger itself has no
        // separate "file-backed" path to exercise.
        let ledger = Ledger::new("/tmp");
        assert_eq!(ledger.total_live_bytes(), 0);
    }

    #[test]
    fn large_allocation_size_is_recovered_within_half_a_mib() {
        let huge = (1usize << 40) + 12345;
        let record = AllocationRecord::new(0, huge);
        let diff = record.size().abs_diff(huge);
        assert!(diff <= MIB / 2);
    }

    #[test]
    fn small_allocation_size_round_trips_exactly() {
        let record = AllocationRecord::new(0, 12345);
        assert_eq!(record.size(), 12345);
    }

    #[test]
    fn allocation_that_exactly_matches_peak_does_not_resnapshot() {
        let ledger = Ledger::new("/tmp");
        ledger.add(1, 100, 42);
        ledger.remove(1);
        ledger.add(2, 100, 99);
        let snap = ledger.peak_snapshot();
        // The second add reaches, but does not exceed, the prior peak, so
        // the snapshot must still reflect callstack 42, not 99.
        assert_eq!(snap.by_callstack.get(&42), Some(&100));
        assert_eq!(snap.by_callstack.get(&99), None);
    }
}
