//! Thread-scoped cycle breaker: lets the bookkeeping code allocate without
//! being observed by itself.
//!
//! This is not mutual exclusion. Two threads can both be "entered" at once;
//! the guard only prevents a single thread's own bookkeeping from being
//! recorded as a user allocation.

use std::cell::Cell;

/// Large enough that no realistic nesting depth during thread teardown will
/// underflow it back to zero, while small enough it can never overflow a
/// `u32` by repeated `enter()` calls either.
const POISON: u32 = u32::MAX / 2;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII scope: construction increments the depth, drop decrements it. Every
/// instrumentation region in this crate uses this instead of calling
/// `enter`/`leave` directly, so pairing can't be forgotten on an early
/// return or a `?`.
#[must_use]
pub struct ReentrancyScope {
    _private: (),
}

impl ReentrancyScope {
    pub fn enter() -> Self {
        DEPTH.with(|d| d.set(d.get().wrapping_add(1)));
        ReentrancyScope { _private: () }
    }
}

impl Drop for ReentrancyScope {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().wrapping_sub(1)));
    }
}

/// True while the calling thread is inside a `ReentrancyScope`, i.e. while
/// its own bookkeeping code is running.
pub fn is_reentrant() -> bool {
    DEPTH.with(|d| d.get() != 0)
}

/// Permanently marks the calling thread as reentrant. Called from a
/// thread-local destructor so allocations issued by later destructors (after
/// thread-local storage has started tearing down) are never observed.
pub fn poison() {
    DEPTH.with(|d| d.set(POISON));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn not_reentrant_by_default() {
        thread::spawn(|| assert!(!is_reentrant()))
            .join()
            .unwrap();
    }

    #[test]
    fn scope_marks_reentrant_until_dropped() {
        thread::spawn(|| {
            assert!(!is_reentrant());
            {
                let _g = ReentrancyScope::enter();
                assert!(is_reentrant());
                {
                    let _g2 = ReentrancyScope::enter();
                    assert!(is_reentrant());
                }
                assert!(is_reentrant());
            }
            assert!(!is_reentrant());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn poison_survives_many_leaves() {
        thread::spawn(|| {
            poison();
            assert!(is_reentrant());
            for _ in 0..1000 {
                let _g = ReentrancyScope::enter();
            }
            assert!(is_reentrant());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn guards_are_thread_local() {
        let _g = ReentrancyScope::enter();
        assert!(is_reentrant());
        thread::spawn(|| assert!(!is_reentrant()))
            .join()
            .unwrap();
    }
}
