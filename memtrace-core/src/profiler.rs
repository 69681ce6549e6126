//! The process-wide `Profiler` handle: the single place every other module
//! funnels through. Spec §9 calls out that `TrackingFlag`, the interners,
//! the ledger, and the peak snapshot are process-wide by necessity since
//! they observe the whole process -- this module is where that global
//! mutable state lives, behind typed operations rather than free-standing
//! statics.

use crate::callstack::{CallStackTracker, CallstackInterner};
use crate::config::Config;
use crate::flamegraph::{self, CallstackNames};
use crate::interner::FunctionInterner;
use crate::ledger::{Kind, Ledger};
use crate::reentrancy::{self, ReentrancyScope};
use anyhow::{Context, Result};
use once_cell::sync::{Lazy, OnceCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Lazily constructed, process-global. Every wrapper and control-surface
/// call reaches state through this handle.
pub static PROFILER: Lazy<Profiler> = Lazy::new(Profiler::new);

pub struct Profiler {
    initialized: AtomicBool,
    tracking: AtomicBool,
    shutting_down: AtomicBool,
    config: OnceCell<Config>,
    pub functions: FunctionInterner,
    pub callstacks: CallstackInterner,
    pub ledger: Ledger,
    /// Spare headroom reserved at `initialize_from_python` time
    /// (`Config::oom_reserve_bytes`), released by `ledger_out_of_memory`
    /// before it tries to format a diagnostic or render a flamegraph --
    /// both of which allocate, and neither of which should be the thing
    /// that fails while we're already reporting an allocation failure.
    oom_reserve: Mutex<Option<Vec<u8>>>,
}

impl Profiler {
    fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            tracking: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            config: OnceCell::new(),
            functions: FunctionInterner::new(),
            callstacks: CallstackInterner::new(),
            ledger: Ledger::new("/tmp"),
            oom_reserve: Mutex::new(None),
        }
    }

    // --- Control surface (spec §4.7 / §10) ---

    /// Must be called once after interpreter startup. Loads configuration
    /// and marks the engine ready to track.
    pub fn initialize_from_python(&self) -> Result<()> {
        let config = Config::load();
        self.ledger.reset(config.default_output_dir.clone());
        *self.oom_reserve.lock().unwrap() = Some(vec![0u8; config.oom_reserve_bytes]);
        let _ = self.config.set(config);
        self.initialized.store(true, Ordering::Release);
        log::info!("memtrace engine initialized");
        Ok(())
    }

    pub fn config(&self) -> Config {
        self.config.get().cloned().unwrap_or_default()
    }

    pub fn start_tracking(&self) {
        self.tracking.store(true, Ordering::Release);
        log::info!("memtrace tracking started");
    }

    pub fn stop_tracking(&self) {
        self.tracking.store(false, Ordering::Release);
        log::info!("memtrace tracking stopped");
    }

    pub fn reset(&self, default_path: &str) -> Result<()> {
        let _g = ReentrancyScope::enter();
        self.ledger.reset(default_path.to_string());
        Ok(())
    }

    pub fn dump_peak(&self, path: &str) -> Result<()> {
        let _g = ReentrancyScope::enter();
        eprintln!("=memtrace= Preparing to write peak memory flamegraph to {path}");
        let snapshot = self.ledger.peak_snapshot();
        let stacks = self.reverse_callstacks();
        let names = CallstackNames {
            stacks: &stacks,
            functions: &self.functions,
        };
        let svg = flamegraph::dump(
            path,
            "peak-memory",
            "Peak Tracked Memory Usage",
            snapshot.total_bytes,
            &snapshot.by_callstack,
            &names,
        )
        .context("dumping peak memory flamegraph")?;
        eprintln!("=memtrace= Wrote memory usage flamegraph to {}", svg.display());
        Ok(())
    }

    /// Dump with no explicit path, using whatever `reset`/`initialize`
    /// last recorded as the default output directory.
    pub fn dump_peak_default(&self) -> Result<()> {
        let path = self.ledger.default_output_path();
        self.dump_peak(&path)
    }

    pub fn register_tracer(&self) {
        CallStackTracker::clear();
    }

    pub fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Hot-path gate (spec §4.7): plain load for "initialized" (set once at
    /// construction), acquire-load for the tracking flag, thread-local read
    /// for reentrancy.
    pub fn should_track(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
            && self.tracking.load(Ordering::Acquire)
            && !reentrancy::is_reentrant()
    }

    // --- Allocation recording, called from the preload wrappers ---

    /// Intern `(file, function)`, returning the stable function id (spec
    /// §4.3's extra-data interning round trip).
    pub fn intern_function(&self, file: &str, function: &str) -> u32 {
        let _g = ReentrancyScope::enter();
        self.functions.intern(file, function)
    }

    /// Record a new allocation attributed to the calling thread's current
    /// callstack, optionally overriding the top frame's line with the
    /// allocation call site (mirrors `add_allocation` in the source this
    /// engine is modeled on: the override is applied to a *copy* of the
    /// stack, never the thread's live one).
    pub fn record_allocation(&self, address: usize, size: usize, line: u16, kind: Kind) {
        if address == 0 {
            // The real allocator returned null: the caller's own allocation
            // failed, which is valid (if unfortunate) program behavior, not
            // a profiler bug. Spec §7 classifies this as "do not insert",
            // not fatal -- only the ledger's own bookkeeping allocations
            // failing is fatal (see `ledger_out_of_memory`).
            return;
        }
        let _g = ReentrancyScope::enter();
        let mut stack = CallStackTracker::current();
        if line != 0 && !stack.is_empty() {
            stack.new_line(line);
        }
        let callstack_id = self.callstacks.intern(&stack);
        match kind {
            Kind::Heap => self.ledger.add(address, size, callstack_id),
            Kind::AnonMap => self.ledger.add_anon_mmap(address, size, callstack_id),
        }
    }

    pub fn record_free(&self, address: usize) {
        if address == 0 {
            return;
        }
        let _g = ReentrancyScope::enter();
        self.ledger.remove(address);
    }

    pub fn record_anon_munmap(&self, address: usize, size: usize) {
        let _g = ReentrancyScope::enter();
        self.ledger.remove_anon_mmap(address, size);
    }

    fn reverse_callstacks(
        &self,
    ) -> std::collections::HashMap<crate::callstack::CallstackId, Vec<crate::callstack::Frame>> {
        let snapshot = self.ledger.peak_snapshot();
        snapshot
            .by_callstack
            .keys()
            .filter_map(|&id| {
                self.callstacks
                    .get(id)
                    .map(|stack| (id, stack.frames().to_vec()))
            })
            .collect()
    }

    /// The ledger's own bookkeeping data structures failed to allocate --
    /// not the interpreter's allocation, the profiler's (spec §4.5/§7's
    /// "Ledger-OOM", the one error condition that is fatal). Release the
    /// reserved headroom first so the diagnostic and the flamegraph dump
    /// that follow -- both of which allocate -- have something to work
    /// with, then give up: silent loss of profiling data is worse than
    /// stopping.
    pub fn ledger_out_of_memory(&self) -> ! {
        self.oom_reserve.lock().unwrap().take();
        eprintln!("=memtrace= Out of memory; dumping current state before exiting.");
        if let Err(e) = self.dump_peak_default() {
            eprintln!("=memtrace= failed to dump on OOM: {e}");
        }
        std::process::abort();
    }
}
