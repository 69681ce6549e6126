//! Per-thread pointer to the currently executing interpreter frame, plus
//! the code-object extra-data interning round trip (spec §4.3).
//!
//! The frame's actual layout belongs to the out-of-scope interpreter host
//! adapter (for CPython, a `PyFrameObject`). This module never reads it
//! directly -- it just holds the opaque pointer and calls back through a
//! host-registered function pointer to ask for the current line number,
//! which keeps the allocator hot path free of any interpreter-specific
//! code.

use once_cell::sync::OnceCell;
use std::cell::Cell;
use std::os::raw::c_void;

pub type LineReader = extern "C" fn(*const c_void) -> u16;

static LINE_READER: OnceCell<LineReader> = OnceCell::new();

thread_local! {
    static CURRENT_FRAME: Cell<*const c_void> = const { Cell::new(std::ptr::null()) };
}

/// Called once by the host adapter during setup, so the allocator wrappers
/// can read a line number from an opaque frame pointer without calling back
/// into the interpreter's full API surface.
pub fn register_line_reader(reader: LineReader) {
    let _ = LINE_READER.set(reader);
}

/// Called by the host adapter's profile callback on `CALL`/`RETURN` events.
pub fn set_current_frame(frame: *const c_void) {
    CURRENT_FRAME.with(|f| f.set(frame));
}

pub fn current_frame() -> *const c_void {
    CURRENT_FRAME.with(|f| f.get())
}

/// The line number of the thread's currently executing frame, or `0` if
/// there is no current frame or no reader has been registered yet.
pub fn current_line() -> u16 {
    let frame = current_frame();
    if frame.is_null() {
        return 0;
    }
    match LINE_READER.get() {
        Some(reader) => reader(frame),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn fixed_line_13(_frame: *const c_void) -> u16 {
        13
    }

    #[test]
    fn no_frame_means_line_zero() {
        set_current_frame(std::ptr::null());
        assert_eq!(current_line(), 0);
    }

    #[test]
    fn registered_reader_is_used_once_a_frame_is_set() {
        register_line_reader(fixed_line_13);
        let sentinel = 1usize as *const c_void;
        set_current_frame(sentinel);
        assert_eq!(current_line(), 13);
        set_current_frame(std::ptr::null());
    }
}
