//! Property-based tests for the ledger, covering spec invariant 1 ("after
//! any prefix of wrapper calls, `total_live_bytes` equals the sum of sizes
//! of still-live recorded allocations") and invariant 3 (peak is monotonic
//! and never falls below the current total) across arbitrary add/remove
//! sequences, rather than the fixed scenarios in the unit tests.

use memtrace_core::ledger::Ledger;
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Add { address: usize, size: usize },
    Remove { address: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..64, 1usize..4096).prop_map(|(address, size)| Op::Add { address, size }),
        (1usize..64).prop_map(|address| Op::Remove { address }),
    ]
}

proptest! {
    #[test]
    fn total_live_bytes_matches_sum_of_live_sizes_after_any_prefix(
        ops in prop::collection::vec(op_strategy(), 0..200)
    ) {
        let ledger = Ledger::new("/tmp");
        let mut model: HashMap<usize, usize> = HashMap::new();
        let mut peak_seen = 0usize;

        for op in ops {
            match op {
                Op::Add { address, size } => {
                    ledger.add(address, size, 0);
                    model.insert(address, size);
                }
                Op::Remove { address } => {
                    ledger.remove(address);
                    model.remove(&address);
                }
            }

            let expected: usize = model.values().sum();
            prop_assert_eq!(ledger.total_live_bytes(), expected);

            peak_seen = peak_seen.max(expected);
            prop_assert!(ledger.peak_live_bytes() >= ledger.total_live_bytes());
            prop_assert!(ledger.peak_live_bytes() >= peak_seen);
        }
    }

    #[test]
    fn peak_is_monotonic_across_the_whole_sequence(
        ops in prop::collection::vec(op_strategy(), 0..200)
    ) {
        let ledger = Ledger::new("/tmp");
        let mut last_peak = 0usize;
        for op in ops {
            match op {
                Op::Add { address, size } => ledger.add(address, size, 0),
                Op::Remove { address } => ledger.remove(address),
            }
            let peak = ledger.peak_live_bytes();
            prop_assert!(peak >= last_peak);
            last_peak = peak;
        }
    }
}
