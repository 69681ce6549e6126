//! Per-thread logical call stack, and the process-global interner that lets
//! the ledger store a single integer per live allocation instead of a full
//! stack of frames.

use crate::interner::FunctionId;
use dashmap::DashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};

pub type CallstackId = u32;

/// One entry in a call stack: the function and the line currently executing
/// within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    pub function_id: FunctionId,
    pub line: u16,
}

/// A thread's logical interpreter call stack, root-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Push a new frame. If `parent_line` is non-zero, it overwrites the
    /// *previous* top frame's line first -- the host reports the caller's
    /// line at the moment of call, which can differ from whatever line was
    /// last recorded for it.
    pub fn start_call(&mut self, parent_line: u16, function_id: FunctionId, line: u16) {
        if parent_line != 0 {
            if let Some(top) = self.frames.last_mut() {
                top.line = parent_line;
            }
        }
        self.frames.push(Frame { function_id, line });
    }

    /// Pop the top frame. A no-op on an empty stack: this happens when a
    /// thread unwinds through a frame that existed before tracing began.
    pub fn finish_call(&mut self) {
        self.frames.pop();
    }

    pub fn new_line(&mut self, line: u16) {
        if let Some(top) = self.frames.last_mut() {
            top.line = line;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Interns `CallStack`s so equal sequences share an id; the ledger only ever
/// stores the `u32`.
#[derive(Default)]
pub struct CallstackInterner {
    ids: DashMap<CallStack, CallstackId>,
    stacks: DashMap<CallstackId, CallStack>,
    next_id: AtomicU32,
}

impl CallstackInterner {
    pub fn new() -> Self {
        Self {
            ids: DashMap::new(),
            stacks: DashMap::new(),
            next_id: AtomicU32::new(0),
        }
    }

    pub fn intern(&self, stack: &CallStack) -> CallstackId {
        if let Some(id) = self.ids.get(stack) {
            return *id;
        }
        *self.ids.entry(stack.clone()).or_insert_with(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.stacks.insert(id, stack.clone());
            id
        })
    }

    pub fn get(&self, id: CallstackId) -> Option<CallStack> {
        self.stacks.get(&id).map(|r| r.clone())
    }
}

thread_local! {
    static THREAD_STACK: RefCell<CallStack> = RefCell::new(CallStack::new());
}

/// The per-thread call-stack tracker. Stateless by design: all mutable
/// state lives in the `THREAD_STACK` thread-local, so this type is just a
/// namespace for the operations in spec §4.4, each of which only ever
/// touches the calling thread's own stack.
pub struct CallStackTracker;

impl CallStackTracker {
    pub fn start_call(parent_line: u16, function_id: FunctionId, line: u16) {
        THREAD_STACK.with(|s| s.borrow_mut().start_call(parent_line, function_id, line));
    }

    pub fn finish_call() {
        THREAD_STACK.with(|s| s.borrow_mut().finish_call());
    }

    pub fn new_line(line: u16) {
        THREAD_STACK.with(|s| s.borrow_mut().new_line(line));
    }

    /// A detached copy of the current thread's stack, for handoff to a
    /// child thread.
    pub fn clone_current() -> CallStack {
        THREAD_STACK.with(|s| s.borrow().clone())
    }

    /// Replace the current thread's stack wholesale, e.g. with a stack
    /// inherited from a parent thread at spawn time.
    pub fn install(stack: CallStack) {
        THREAD_STACK.with(|s| *s.borrow_mut() = stack);
    }

    /// Empty the current thread's stack. Used when a tracer attaches to a
    /// genuinely new interpreter thread whose inherited OS-thread callstack
    /// is stale (spec §4.6).
    pub fn clear() {
        THREAD_STACK.with(|s| *s.borrow_mut() = CallStack::new());
    }

    pub fn current() -> CallStack {
        THREAD_STACK.with(|s| s.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn parent_line_updates_previous_top_only_if_nonzero() {
        let mut cs = CallStack::new();
        cs.start_call(123, 1, 2); // first call: parent_line has nothing to update
        assert_eq!(cs.frames(), &[Frame { function_id: 1, line: 2 }]);

        cs.start_call(0, 3, 45); // zero parent_line: no update
        assert_eq!(
            cs.frames(),
            &[
                Frame { function_id: 1, line: 2 },
                Frame { function_id: 3, line: 45 }
            ]
        );

        cs.start_call(99, 5, 6); // nonzero: overwrites the "3" frame's line
        assert_eq!(
            cs.frames(),
            &[
                Frame { function_id: 1, line: 2 },
                Frame { function_id: 3, line: 99 },
                Frame { function_id: 5, line: 6 },
            ]
        );
    }

    #[test]
    fn finish_call_on_empty_stack_is_a_no_op() {
        let mut cs = CallStack::new();
        cs.finish_call();
        assert!(cs.is_empty());
    }

    #[test]
    fn new_line_updates_top_frame_only() {
        let mut cs = CallStack::new();
        cs.start_call(0, 1, 10);
        cs.start_call(0, 2, 20);
        cs.new_line(99);
        assert_eq!(
            cs.frames(),
            &[
                Frame { function_id: 1, line: 10 },
                Frame { function_id: 2, line: 99 },
            ]
        );
    }

    #[test]
    fn interner_shares_ids_for_equal_stacks() {
        let interner = CallstackInterner::new();
        let mut a = CallStack::new();
        a.start_call(0, 1, 2);
        let mut b = CallStack::new();
        b.start_call(0, 1, 2);
        assert_eq!(interner.intern(&a), interner.intern(&b));

        let mut c = CallStack::new();
        c.start_call(0, 1, 3);
        assert_ne!(interner.intern(&a), interner.intern(&c));
    }

    #[test]
    fn register_tracer_clear_then_one_call_is_depth_one() {
        CallStackTracker::clear();
        CallStackTracker::start_call(0, 7, 1);
        assert_eq!(CallStackTracker::current().frames().len(), 1);
        CallStackTracker::clear();
    }

    #[test]
    fn stacks_are_thread_local() {
        CallStackTracker::clear();
        CallStackTracker::start_call(0, 1, 1);
        assert_eq!(CallStackTracker::current().frames().len(), 1);

        thread::spawn(|| {
            assert!(CallStackTracker::current().is_empty());
        })
        .join()
        .unwrap();

        assert_eq!(CallStackTracker::current().frames().len(), 1);
        CallStackTracker::clear();
    }

    #[test]
    fn clone_and_install_transplants_a_stack() {
        CallStackTracker::clear();
        CallStackTracker::start_call(0, 1, 1);
        CallStackTracker::start_call(0, 2, 2);
        let snapshot = CallStackTracker::clone_current();

        thread::spawn(move || {
            CallStackTracker::install(snapshot);
            assert_eq!(CallStackTracker::current().frames().len(), 2);
        })
        .join()
        .unwrap();

        CallStackTracker::clear();
    }
}
