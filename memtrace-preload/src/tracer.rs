//! The host adapter's profile-callback entry points: where `CALL`/`RETURN`/
//! `LINE` events from the interpreter (spec §4.3) turn into pushes, pops,
//! and line updates on the calling thread's call stack.

use crate::frame_shadow;
use memtrace_abi::{CallEvent, EventKind, FunctionLocation};
use memtrace_core::callstack::CallStackTracker;
use memtrace_core::profiler::PROFILER;
use std::os::raw::c_void;

/// Intern a `(file, function)` pair reported by the host adapter, returning
/// the stable id it should cache against the interpreter's code object
/// (spec §4.3's extra-data round trip). Returns `0` if tracking isn't
/// active -- callers should treat `0` as "uninterned" and skip caching it.
///
/// # Safety
/// `location`'s `filename`/`function_name` spans must be valid per
/// [`FunctionLocation::filename`]/[`FunctionLocation::function_name`].
#[no_mangle]
pub unsafe extern "C" fn memtrace_intern_function(location: FunctionLocation) -> u64 {
    if !PROFILER.should_track() {
        return 0;
    }
    let file = location.filename();
    let function = location.function_name();
    PROFILER.intern_function(file, function) as u64
}

/// Dispatch one profile-callback event for the calling thread.
///
/// # Safety
/// `frame` must be a valid opaque frame pointer for the lifetime of this
/// call, suitable for passing to whatever [`frame_shadow::LineReader`] the
/// host registered.
#[no_mangle]
pub unsafe extern "C" fn memtrace_trace_event(
    kind: EventKind,
    frame: *const c_void,
    event: CallEvent,
) {
    frame_shadow::set_current_frame(frame);
    if !PROFILER.should_track() {
        return;
    }
    match kind {
        EventKind::Call => {
            CallStackTracker::start_call(event.parent_line, event.function_id as u32, event.line);
        }
        EventKind::Return => {
            CallStackTracker::finish_call();
        }
        EventKind::Line => {
            CallStackTracker::new_line(event.line);
        }
    }
}
