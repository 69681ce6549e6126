//! Wire types shared across the process-internal boundary between the
//! interpreter host adapter (out of scope for this crate) and the
//! allocation-tracking engine.
//!
//! The host adapter lives outside this workspace: for a CPython embedding it
//! is the code that calls `PyEval_SetProfile` and reads `PyFrameObject`
//! fields. Everything it needs to hand across that boundary is defined here
//! as a `#[repr(C)]` struct so the layout is exactly what a C-ABI caller
//! would produce, mirroring the `struct FunctionLocation` layout used by the
//! interception layer this engine is modeled on.

use std::os::raw::c_char;

/// A function location as reported by the host adapter: a `(file, function)`
/// pair described by raw UTF-8 byte spans rather than owned `String`s, so the
/// host can hand over borrowed interpreter-owned memory without a copy.
///
/// Byte-for-byte layout match with the C struct this type stands in for:
/// four fields, pointer-or-length alternating, no implicit padding beyond
/// natural alignment.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FunctionLocation {
    pub filename: *const c_char,
    pub filename_length: isize,
    pub function_name: *const c_char,
    pub function_name_length: isize,
}

impl FunctionLocation {
    /// # Safety
    /// `filename`/`function_name` must point at valid UTF-8 byte sequences of
    /// at least `filename_length`/`function_name_length` bytes, and must
    /// outlive this borrow.
    pub unsafe fn filename(&self) -> &str {
        let slice =
            std::slice::from_raw_parts(self.filename as *const u8, self.filename_length as usize);
        std::str::from_utf8_unchecked(slice)
    }

    /// # Safety
    /// See [`FunctionLocation::filename`].
    pub unsafe fn function_name(&self) -> &str {
        let slice = std::slice::from_raw_parts(
            self.function_name as *const u8,
            self.function_name_length as usize,
        );
        std::str::from_utf8_unchecked(slice)
    }
}

/// The three tracer events an interpreter profile callback delivers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Call = 0,
    Return = 1,
    Line = 2,
}

/// Everything a `CALL` event needs to push a new frame: the interned
/// function id (already resolved by the host adapter via the extra-data
/// cache described in spec §4.3), the line at entry, and the caller's line
/// at the moment of call (0 if unknown/unavailable).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CallEvent {
    pub function_id: u64,
    pub line: u16,
    pub parent_line: u16,
}

/// The kind of allocation an intercepted call produced. Matches
/// `AllocationKind` in spec §3: only heap allocations and anonymous memory
/// maps are tracked; file-backed mappings are out of scope.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    Heap = 0,
    AnonMap = 1,
}

const _: () = {
    assert!(std::mem::size_of::<CallEvent>() == 16);
    assert!(std::mem::size_of::<FunctionLocation>() == 4 * std::mem::size_of::<usize>());
};
