//! Process-global interner for `(file, function)` pairs.
//!
//! `function_id = 0` is reserved for "uninterned" (spec §3), so the first
//! interned pair gets id 1. Once interned, a pair keeps its id for the life
//! of the process -- nothing is ever evicted.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

pub type FunctionId = u32;

/// An interned `(file, function)` pair, cheap to copy and compare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionLocation {
    pub file: String,
    pub function: String,
}

#[derive(Default)]
pub struct FunctionInterner {
    ids: DashMap<FunctionLocation, FunctionId>,
    locations: DashMap<FunctionId, FunctionLocation>,
    next_id: AtomicU32,
}

impl FunctionInterner {
    pub fn new() -> Self {
        Self {
            ids: DashMap::new(),
            locations: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Returns the stable id for `(file, function)`, interning it on first
    /// sight. Equal pairs always return the same id.
    pub fn intern(&self, file: &str, function: &str) -> FunctionId {
        let location = FunctionLocation {
            file: file.to_string(),
            function: function.to_string(),
        };
        *self.ids.entry(location.clone()).or_insert_with(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.locations.insert(id, location);
            id
        })
    }

    pub fn get(&self, id: FunctionId) -> Option<FunctionLocation> {
        self.locations.get(&id).map(|r| r.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
