//! Resolves the real allocator/thread/process symbols this library
//! preempts, via `dlsym(RTLD_NEXT, ...)`, and caches them for the life of
//! the process.
//!
//! Resolution happens lazily on first use rather than in a shared-library
//! constructor (this crate has no `#[ctor]` dependency), cached in a
//! `once_cell::sync::OnceCell` the same way `memtrace-core` caches
//! expensive one-time setup.

use libc::{c_char, c_int, c_void, off_t, pid_t, pthread_attr_t, pthread_t, size_t};
use once_cell::sync::OnceCell;
use std::cell::Cell;
use std::ffi::CString;

pub type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
pub type CallocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, size_t) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type AlignedAllocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
pub type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, size_t, size_t) -> c_int;
pub type MmapFn =
    unsafe extern "C" fn(*mut c_void, size_t, c_int, c_int, c_int, off_t) -> *mut c_void;
pub type MunmapFn = unsafe extern "C" fn(*mut c_void, size_t) -> c_int;
pub type PthreadStartFn = extern "C" fn(*mut c_void) -> *mut c_void;
pub type PthreadCreateFn = unsafe extern "C" fn(
    *mut pthread_t,
    *const pthread_attr_t,
    PthreadStartFn,
    *mut c_void,
) -> c_int;
pub type ForkFn = unsafe extern "C" fn() -> pid_t;

pub struct RealSymbols {
    pub malloc: MallocFn,
    pub calloc: CallocFn,
    pub realloc: ReallocFn,
    pub free: FreeFn,
    pub aligned_alloc: AlignedAllocFn,
    pub posix_memalign: PosixMemalignFn,
    pub mmap: MmapFn,
    pub munmap: MunmapFn,
    pub pthread_create: PthreadCreateFn,
    pub fork: ForkFn,
}

static REAL: OnceCell<RealSymbols> = OnceCell::new();

thread_local! {
    // `dlsym` itself can call back into malloc/calloc on the resolving
    // thread (glibc's lazy-binding path does this). Without this guard,
    // that reentrant call would hit `try_real()` again and deadlock inside
    // `OnceCell::get_or_init`. Tracked per-thread, not globally, since a
    // second thread racing the same `OnceCell` should still block and wait.
    static RESOLVING: Cell<bool> = const { Cell::new(false) };
}

/// True once the real symbols have been resolved. Wrappers consult this
/// only for logging/diagnostics; `try_real()` is the one that matters for
/// control flow.
pub fn is_initialized() -> bool {
    REAL.get().is_some()
}

/// Resolve and cache every real symbol this library wraps, unless this
/// thread is already in the middle of doing so -- in which case this
/// returns `None` and the caller must take the degraded bootstrap path
/// (spec §4.2/§7, "uninitialized-call").
pub fn try_real() -> Option<&'static RealSymbols> {
    if let Some(r) = REAL.get() {
        return Some(r);
    }
    if RESOLVING.with(|r| r.get()) {
        return None;
    }
    RESOLVING.with(|r| r.set(true));
    let resolved = REAL.get_or_init(|| unsafe {
        RealSymbols {
            malloc: resolve("malloc"),
            calloc: resolve("calloc"),
            realloc: resolve("realloc"),
            free: resolve("free"),
            aligned_alloc: resolve("aligned_alloc"),
            posix_memalign: resolve("posix_memalign"),
            mmap: resolve("mmap"),
            munmap: resolve("munmap"),
            pthread_create: resolve("pthread_create"),
            fork: resolve("fork"),
        }
    });
    RESOLVING.with(|r| r.set(false));
    Some(resolved)
}

unsafe fn resolve<T: Copy>(name: &str) -> T {
    let cname = CString::new(name).expect("symbol name must not contain NUL");
    let ptr = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr() as *const c_char);
    if ptr.is_null() {
        eprintln!("=memtrace= fatal: couldn't resolve real symbol for {name}()");
        libc::abort();
    }
    // SAFETY: caller guarantees `T` is a function-pointer-shaped type of
    // the correct signature for `name`; `fn` pointers and `*mut c_void`
    // share representation on every platform this crate targets.
    std::mem::transmute_copy::<*mut c_void, T>(&ptr)
}
