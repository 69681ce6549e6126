//! A minimal interval map over `usize` addresses, used to track anonymous
//! `mmap()` regions. Unlike `malloc()`/`free()`, an `munmap()` can free only
//! part of a previously mapped region (or span several), so removal has to
//! split ranges rather than do a single key lookup.

use crate::callstack::CallstackId;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Clone, Copy)]
struct Range {
    length: usize,
    callstack_id: CallstackId,
}

#[derive(Default)]
pub struct RangeMap {
    // Keyed by start address. Invariant: entries never overlap.
    ranges: Mutex<BTreeMap<usize, Range>>,
}

impl RangeMap {
    pub fn new() -> Self {
        Self {
            ranges: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add(&self, address: usize, length: usize, callstack_id: CallstackId) {
        if length == 0 {
            return;
        }
        self.ranges.lock().unwrap().insert(
            address,
            Range {
                length,
                callstack_id,
            },
        );
    }

    /// Remove `[address, address + length)`, splitting any overlapping
    /// range that extends beyond the removed span. Returns, per owning
    /// callstack, the number of bytes actually removed (an `munmap()` over
    /// previously-untracked memory removes nothing).
    pub fn remove(&self, address: usize, length: usize) -> Vec<(CallstackId, usize)> {
        if length == 0 {
            return Vec::new();
        }
        let removed_end = address.saturating_add(length);
        let mut ranges = self.ranges.lock().unwrap();

        let overlapping: Vec<(usize, Range)> = ranges
            .range(..removed_end)
            .filter(|(start, r)| **start + r.length > address)
            .map(|(start, r)| (*start, *r))
            .collect();

        let mut removed_by_stack: BTreeMap<CallstackId, usize> = BTreeMap::new();
        for (start, range) in overlapping {
            ranges.remove(&start);
            let end = start + range.length;
            let overlap_start = address.max(start);
            let overlap_end = removed_end.min(end);
            if overlap_end <= overlap_start {
                // Shouldn't happen given the filter above, but stay safe.
                ranges.insert(start, range);
                continue;
            }
            let removed = overlap_end - overlap_start;
            *removed_by_stack.entry(range.callstack_id).or_insert(0) += removed;

            if start < overlap_start {
                ranges.insert(
                    start,
                    Range {
                        length: overlap_start - start,
                        callstack_id: range.callstack_id,
                    },
                );
            }
            if overlap_end < end {
                ranges.insert(
                    overlap_end,
                    Range {
                        length: end - overlap_end,
                        callstack_id: range.callstack_id,
                    },
                );
            }
        }
        removed_by_stack.into_iter().collect()
    }

    pub fn clear(&self) {
        self.ranges.lock().unwrap().clear();
    }

    /// Total bytes currently mapped, by owning callstack.
    pub fn snapshot(&self) -> Vec<(CallstackId, usize)> {
        let mut totals: BTreeMap<CallstackId, usize> = BTreeMap::new();
        for range in self.ranges.lock().unwrap().values() {
            *totals.entry(range.callstack_id).or_insert(0) += range.length;
        }
        totals.into_iter().collect()
    }

    #[cfg(test)]
    pub fn total_bytes(&self) -> usize {
        self.ranges.lock().unwrap().values().map(|r| r.length).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_removal() {
        let m = RangeMap::new();
        m.add(100, 50, 1);
        let removed = m.remove(100, 50);
        assert_eq!(removed, vec![(1, 50)]);
        assert_eq!(m.total_bytes(), 0);
    }

    #[test]
    fn partial_removal_from_front() {
        let m = RangeMap::new();
        m.add(100, 100, 1);
        let removed = m.remove(100, 40);
        assert_eq!(removed, vec![(1, 40)]);
        assert_eq!(m.total_bytes(), 60);
        assert_eq!(m.snapshot(), vec![(1, 60)]);
    }

    #[test]
    fn partial_removal_from_middle_splits_range() {
        let m = RangeMap::new();
        m.add(0, 100, 1);
        let removed = m.remove(40, 20);
        assert_eq!(removed, vec![(1, 20)]);
        assert_eq!(m.total_bytes(), 80);
    }

    #[test]
    fn removal_spanning_multiple_ranges() {
        let m = RangeMap::new();
        m.add(0, 50, 1);
        m.add(50, 50, 2);
        let removed = m.remove(25, 50);
        assert_eq!(removed, vec![(1, 25), (2, 25)]);
        assert_eq!(m.total_bytes(), 50);
    }

    #[test]
    fn removal_of_untracked_range_removes_nothing() {
        let m = RangeMap::new();
        let removed = m.remove(0, 100);
        assert!(removed.is_empty());
    }
}
