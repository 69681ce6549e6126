//! The `extern "C"` allocator wrappers that replace `malloc`/`calloc`/
//! `realloc`/`free`/`aligned_alloc`/`posix_memalign`/`mmap`/`munmap` for any
//! process this library is preloaded into (spec §4.1/§4.2).
//!
//! Two orderings are in play, and they are not interchangeable:
//!
//! - malloc/calloc/aligned_alloc/posix_memalign/mmap: call the real
//!   allocator *first*, then record -- we need the returned address before
//!   we have anything to record, and a null return means there is nothing
//!   to track.
//! - realloc/free: record *first*, then call the real allocator -- the
//!   address being freed (or resized away from) must leave the ledger
//!   before the real call can hand that same address to a concurrent
//!   allocation on another thread.

use crate::frame_shadow;
use crate::symbols::try_real;
use libc::{c_int, c_void, off_t, size_t};
use memtrace_core::ledger::Kind;
use memtrace_core::profiler::PROFILER;

fn should_track() -> bool {
    PROFILER.should_track()
}

/// Gate for `aligned_alloc`/`posix_memalign`: on top of the usual
/// `should_track()` check, honors `Config::track_aligned_allocations` so an
/// operator whose allocator inlines these (bypassing our symbol entirely on
/// some platforms) can turn the bookkeeping off rather than risk double
/// counting.
fn should_track_aligned() -> bool {
    should_track() && PROFILER.config().track_aligned_allocations
}

fn line() -> u16 {
    frame_shadow::current_line()
}

/// # Safety
/// Same contract as libc's `malloc`.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    let Some(real) = try_real() else {
        return bootstrap::alloc(size as usize);
    };
    let ptr = (real.malloc)(size);
    if should_track() && !ptr.is_null() {
        PROFILER.record_allocation(ptr as usize, size as usize, line(), Kind::Heap);
    }
    ptr
}

/// # Safety
/// Same contract as libc's `calloc`.
#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    let Some(real) = try_real() else {
        return bootstrap::alloc(nmemb as usize * size as usize);
    };
    let ptr = (real.calloc)(nmemb, size);
    if should_track() && !ptr.is_null() {
        PROFILER.record_allocation(ptr as usize, (nmemb * size) as usize, line(), Kind::Heap);
    }
    ptr
}

/// # Safety
/// Same contract as libc's `realloc`.
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    let Some(real) = try_real() else {
        // A bootstrap-era pointer being resized before symbols are ready;
        // there is nothing sound to do but serve a fresh bootstrap block.
        return bootstrap::alloc(size as usize);
    };
    let tracking = should_track();
    if tracking && !ptr.is_null() {
        PROFILER.record_free(ptr as usize);
    }
    let new_ptr = (real.realloc)(ptr, size);
    if tracking && !new_ptr.is_null() {
        PROFILER.record_allocation(new_ptr as usize, size as usize, line(), Kind::Heap);
    }
    new_ptr
}

/// # Safety
/// Same contract as libc's `free`.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let Some(real) = try_real() else {
        // Can't safely hand a bootstrap-era block to the real allocator:
        // it never allocated it. Leak it; bootstrap allocations are rare
        // and bounded to the dlsym resolution window (spec §4.2).
        return;
    };
    if should_track() {
        PROFILER.record_free(ptr as usize);
    }
    (real.free)(ptr);
}

/// # Safety
/// Same contract as libc's `aligned_alloc`.
#[no_mangle]
pub unsafe extern "C" fn aligned_alloc(alignment: size_t, size: size_t) -> *mut c_void {
    let Some(real) = try_real() else {
        return bootstrap::alloc(size as usize);
    };
    let ptr = (real.aligned_alloc)(alignment, size);
    if should_track_aligned() && !ptr.is_null() {
        PROFILER.record_allocation(ptr as usize, size as usize, line(), Kind::Heap);
    }
    ptr
}

/// # Safety
/// Same contract as libc's `posix_memalign`.
#[no_mangle]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: size_t,
    size: size_t,
) -> c_int {
    let Some(real) = try_real() else {
        let ptr = bootstrap::alloc(size as usize);
        if ptr.is_null() {
            return libc::ENOMEM;
        }
        *memptr = ptr;
        return 0;
    };
    let rc = (real.posix_memalign)(memptr, alignment, size);
    if rc == 0 && should_track_aligned() {
        PROFILER.record_allocation(*memptr as usize, size as usize, line(), Kind::Heap);
    }
    rc
}

/// # Safety
/// Same contract as libc's `mmap`. Only anonymous mappings are tracked
/// (spec §4.4) -- file-backed maps are the kernel page cache's business,
/// not the interpreter heap's.
#[no_mangle]
pub unsafe extern "C" fn mmap(
    addr: *mut c_void,
    length: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    let Some(real) = try_real() else {
        return bootstrap::raw_mmap(addr, length, prot, flags, fd, offset);
    };
    let ptr = (real.mmap)(addr, length, prot, flags, fd, offset);
    let is_anonymous = flags & libc::MAP_ANONYMOUS != 0;
    if should_track() && is_anonymous && ptr != libc::MAP_FAILED {
        PROFILER.record_allocation(ptr as usize, length as usize, line(), Kind::AnonMap);
    }
    ptr
}

/// # Safety
/// Same contract as libc's `munmap`.
#[no_mangle]
pub unsafe extern "C" fn munmap(addr: *mut c_void, length: size_t) -> c_int {
    let Some(real) = try_real() else {
        return bootstrap::raw_munmap(addr, length);
    };
    if should_track() {
        PROFILER.record_anon_munmap(addr as usize, length as usize);
    }
    (real.munmap)(addr, length)
}

/// Best-effort allocation path for calls that land inside the `dlsym`
/// resolution window, before `symbols::try_real()` can hand back real
/// function pointers. Goes straight to the kernel via `syscall(2)` so it
/// can never recurse back into this library's own `mmap` wrapper the way
/// calling the libc-crate `mmap`/`munmap` bindings directly would.
mod bootstrap {
    use libc::{c_int, c_void, off_t, size_t};

    pub unsafe fn alloc(size: usize) -> *mut c_void {
        if size == 0 {
            return std::ptr::null_mut();
        }
        raw_mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    }

    pub unsafe fn raw_mmap(
        addr: *mut c_void,
        length: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        #[cfg(target_os = "linux")]
        {
            let rc = libc::syscall(
                libc::SYS_mmap,
                addr,
                length,
                prot,
                flags,
                fd,
                offset,
            );
            if rc == -1 {
                libc::MAP_FAILED
            } else {
                rc as *mut c_void
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (addr, length, prot, flags, fd, offset);
            libc::MAP_FAILED
        }
    }

    pub unsafe fn raw_munmap(addr: *mut c_void, length: size_t) -> c_int {
        #[cfg(target_os = "linux")]
        {
            libc::syscall(libc::SYS_munmap, addr, length) as c_int
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (addr, length);
            -1
        }
    }
}

