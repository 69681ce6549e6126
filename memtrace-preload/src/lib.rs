//! Shared-library symbol preemption layer: the cdylib an interpreter host
//! loads via `LD_PRELOAD` to intercept its own allocator and thread/process
//! lifecycle calls, and the `extern "C"` control surface a host adapter
//! drives it through (spec §4).
//!
//! Everything here is Linux-first: symbol preemption is done via
//! `dlsym(RTLD_NEXT, ...)`, which has no equivalent on macOS (that platform
//! needs `DYLD_INTERPOSE` tables instead, which this crate does not
//! implement -- see `DESIGN.md`).

pub mod frame_shadow;
mod symbols;
mod tracer;
mod thread_lifecycle;
mod wrappers;

use memtrace_core::profiler::PROFILER;
use std::os::raw::c_char;

pub use frame_shadow::{current_line, register_line_reader, set_current_frame, LineReader};
pub use tracer::{memtrace_intern_function, memtrace_trace_event};

/// Called once by the host adapter immediately after this library loads.
/// Resolves the real allocator symbols up front (rather than lazily on
/// first `malloc`), then clears `LD_PRELOAD` unconditionally so that any
/// child process spawned from here on -- by this process or, via
/// `fork`'s own wrapper, a forked child -- doesn't inherit interception.
#[no_mangle]
pub extern "C" fn memtrace_preload_init() {
    let _ = env_logger::try_init();
    thread_lifecycle::resolve_on_load();
    thread_lifecycle::clear_preload_env();
}

/// # Safety
/// `path` must be a valid, NUL-terminated UTF-8 C string, or null (in
/// which case the engine's configured default output directory is used).
#[no_mangle]
pub unsafe extern "C" fn memtrace_initialize(path: *const c_char) -> bool {
    let result = PROFILER.initialize_from_python();
    if let Err(e) = &result {
        eprintln!("=memtrace= failed to initialize: {e}");
    }
    if !path.is_null() {
        if let Ok(path) = c_str_to_owned(path) {
            let _ = PROFILER.reset(&path);
        }
    }
    result.is_ok()
}

#[no_mangle]
pub extern "C" fn memtrace_start_tracking() {
    PROFILER.start_tracking();
}

#[no_mangle]
pub extern "C" fn memtrace_stop_tracking() {
    PROFILER.stop_tracking();
}

/// # Safety
/// `path` must be a valid, NUL-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn memtrace_reset(path: *const c_char) -> bool {
    match c_str_to_owned(path) {
        Ok(path) => PROFILER.reset(&path).is_ok(),
        Err(_) => false,
    }
}

/// # Safety
/// `path` must be a valid, NUL-terminated UTF-8 C string, or null (in
/// which case the last path passed to `memtrace_initialize`/`memtrace_reset`
/// is reused).
#[no_mangle]
pub unsafe extern "C" fn memtrace_dump_peak(path: *const c_char) -> bool {
    let result = if path.is_null() {
        PROFILER.dump_peak_default()
    } else {
        match c_str_to_owned(path) {
            Ok(path) => PROFILER.dump_peak(&path),
            Err(_) => return false,
        }
    };
    if let Err(e) = &result {
        eprintln!("=memtrace= failed to dump peak flamegraph: {e}");
    }
    result.is_ok()
}

#[no_mangle]
pub extern "C" fn memtrace_register_tracer() {
    PROFILER.register_tracer();
}

#[no_mangle]
pub extern "C" fn memtrace_shutting_down() -> bool {
    PROFILER.shutting_down()
}

#[no_mangle]
pub extern "C" fn memtrace_begin_shutdown() {
    PROFILER.begin_shutdown();
}

unsafe fn c_str_to_owned(s: *const c_char) -> Result<String, std::str::Utf8Error> {
    std::ffi::CStr::from_ptr(s).to_str().map(str::to_owned)
}
