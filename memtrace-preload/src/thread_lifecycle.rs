//! `pthread_create` and `fork` wrappers: the two points where a single
//! thread's-eye view of the call stack needs to be handed across a thread
//! or process boundary (spec §4.6/§4.8).

use crate::symbols::{self, try_real, PthreadStartFn};
use libc::{c_int, c_void, pid_t, pthread_attr_t, pthread_t};
use memtrace_core::callstack::{CallStack, CallStackTracker};
use memtrace_core::profiler::PROFILER;
use memtrace_core::reentrancy;
use std::sync::atomic::{AtomicBool, Ordering};

/// Heap-allocated bundle transplanted from the spawning thread to the new
/// one. Boxed and leaked into a raw pointer across the `pthread_create`
/// boundary, then reclaimed by the trampoline that runs on the new thread
/// before the caller's own start routine.
struct NewThreadArgs {
    parent_stack: CallStack,
    start_routine: PthreadStartFn,
    arg: *mut c_void,
}

// SAFETY: the pointer crosses to exactly one other thread, which takes
// ownership of it before touching anything else; there is no concurrent
// access.
unsafe impl Send for NewThreadArgs {}

extern "C" fn trampoline(args: *mut c_void) -> *mut c_void {
    // SAFETY: `args` was produced by `Box::into_raw` in `pthread_create`
    // below and handed to exactly this function by the real
    // `pthread_create`.
    let args = unsafe { Box::from_raw(args as *mut NewThreadArgs) };
    CallStackTracker::install(args.parent_stack);
    register_poison_on_exit();
    (args.start_routine)(args.arg)
}

thread_local! {
    // Any TLS destructor runs as the thread is tearing down; dropping this
    // guard poisons the reentrancy depth counter so no allocator wrapper on
    // a half-destroyed thread can mistake itself for non-reentrant.
    static EXIT_POISON: ExitPoison = const { ExitPoison };
}

struct ExitPoison;

impl Drop for ExitPoison {
    fn drop(&mut self) {
        reentrancy::poison();
    }
}

fn register_poison_on_exit() {
    EXIT_POISON.with(|_| {});
}

/// # Safety
/// Same contract as libc's `pthread_create`.
#[no_mangle]
pub unsafe extern "C" fn pthread_create(
    thread: *mut pthread_t,
    attr: *const pthread_attr_t,
    start_routine: PthreadStartFn,
    arg: *mut c_void,
) -> c_int {
    let Some(real) = try_real() else {
        // Thread creation during the dlsym bootstrap window; nothing
        // sensible to transplant the parent stack onto, and no real
        // pthread_create to defer to yet. Refuse the spawn.
        return libc::EAGAIN;
    };
    let bundle = Box::new(NewThreadArgs {
        parent_stack: CallStackTracker::clone_current(),
        start_routine,
        arg,
    });
    let raw = Box::into_raw(bundle);
    let rc = (real.pthread_create)(thread, attr, trampoline, raw as *mut c_void);
    if rc != 0 {
        // Thread never started; reclaim the bundle rather than leak it.
        drop(Box::from_raw(raw));
    }
    rc
}

static FORK_WARNED: AtomicBool = AtomicBool::new(false);

/// # Safety
/// Same contract as libc's `fork`.
#[no_mangle]
pub unsafe extern "C" fn fork() -> pid_t {
    let Some(real) = try_real() else {
        // Thread creation during the dlsym bootstrap window; no real fork
        // to defer to. -1 is fork's own error convention, unlike EAGAIN's
        // numeric value which would look like a bogus child pid here.
        return -1;
    };
    let was_tracking = PROFILER.should_track();
    let pid = (real.fork)();
    if pid == 0 {
        // In the child: stop tracking and scrub the environment so any
        // further exec in this process tree doesn't preload twice, then
        // warn once per process, but only if tracking was actually active
        // in the parent at the moment of the fork (spec §4.6/§9).
        //
        // SAFETY: immediately post-fork, the child is single-threaded; no
        // other thread can be racing these env var mutations.
        unsafe {
            std::env::remove_var("LD_PRELOAD");
            std::env::set_var("__MEMTRACE_STATUS", "subprocess");
        }
        PROFILER.stop_tracking();
        if was_tracking && !FORK_WARNED.swap(true, Ordering::SeqCst) {
            eprintln!(
                "=memtrace= This process forked a child. Memory usage in the child \
                 process will not be tracked."
            );
        }
    }
    pid
}

/// Called once real-symbol resolution completes, unconditionally, so that
/// any child this process spawns afterwards -- whether via `fork`+`exec`,
/// `posix_spawn`, or anything else that never passes through this crate's
/// own `fork` wrapper -- does not inherit interception (spec §4.2/§4.6:
/// "the preload-environment variable is cleared after resolution so
/// spawned children do not inherit interception").
pub fn clear_preload_env() {
    // SAFETY: called once from the library's init entry point, before any
    // other thread in this process exists.
    unsafe {
        std::env::remove_var("LD_PRELOAD");
    }
}

pub fn resolve_on_load() {
    let _ = symbols::try_real();
}
