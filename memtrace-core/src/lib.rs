//! The allocation-interception and call-context engine: the in-process
//! machinery that attributes every heap and anonymous-map allocation to the
//! precise interpreter source location that caused it.
//!
//! This crate is platform- and host-agnostic. It has no `extern "C"`
//! surface of its own -- that lives in `memtrace-preload`, which links
//! against this crate and against the interpreter host's profile callback.

pub mod callstack;
pub mod config;
pub mod flamegraph;
pub mod interner;
pub mod ledger;
pub mod profiler;
pub mod reentrancy;
mod rangemap;

pub use profiler::{Profiler, PROFILER};
