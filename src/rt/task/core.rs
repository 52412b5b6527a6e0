use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

use crate::error::Error;

thread_local! {
    /// Guarantees that each task is assigned a unique ID.
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
}

/// Shared handle to a [`TaskCore`] for single-threaded contexts.
pub(crate) type TaskRef = Rc<TaskCore>;

/// Unique identifier for a task.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    #[inline]
    pub(crate) fn next() -> Self {
        TaskId(NEXT_ID.with(|c| {
            let id = c.get();
            c.set(id + 1);
            id
        }))
    }
}

/// Lightweight, non-blocking unit of execution, similar to an OS thread, but
/// rather than being managed by the OS scheduler, it is managed by the
/// [runtime].
///
/// The core is untyped: the task's pinned future captures the typed output
/// into a result cell owned by the public [`Task`] handle, while the flags
/// and slots here let the scheduler, awaiters, and `cancel` observe the task
/// without knowing its output type.
///
/// Fields use fine-grained interior mutability (`Cell`/`RefCell` per field)
/// instead of one outer `RefCell`, so suspending primitives polled *inside*
/// `future` can touch their own task's throw slot without a double borrow.
///
/// [runtime]: crate::rt
/// [`Task`]: crate::rt::Task
pub(crate) struct TaskCore {
    /// Used to uniquely identify a task.
    pub(crate) id: TaskId,
    /// Pinned, heap-allocated, type-erased [`Future`]. Dropped on completion,
    /// which releases everything the task body captured.
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,
    /// Indicates whether the task has already been scheduled for polling.
    /// This avoids re-queuing already scheduled tasks.
    pub(crate) scheduled: Cell<bool>,
    /// Set once the future has resolved, normally or with an error.
    done: Cell<bool>,
    /// Set when the task body returned `Ok` and the typed result cell holds
    /// the value. Never cleared afterwards.
    result_set: Cell<bool>,
    /// The task body's failure, if it returned `Err`. Written once.
    error: RefCell<Option<Error>>,
    /// Failure to raise at the task's next suspension point. Every
    /// suspending primitive checks this before anything else, which is how
    /// cancellation and other throw-ins surface mid-task.
    throw: RefCell<Option<Error>>,
    /// Tasks queued while this task was executing, in spawn order. Held
    /// weakly so a finished child does not outlive its handles.
    children: RefCell<Vec<Weak<TaskCore>>>,
    /// Tasks suspended in `join` on this task, in registration order.
    awaiters: RefCell<Vec<TaskId>>,
}

impl TaskCore {
    /// Creates a core with no future installed yet.
    ///
    /// The future is installed separately because it needs a reference to the
    /// core it reports completion into.
    pub(crate) fn new() -> Self {
        TaskCore {
            id: TaskId::next(),
            future: RefCell::new(None),
            scheduled: Cell::new(false),
            done: Cell::new(false),
            result_set: Cell::new(false),
            error: RefCell::new(None),
            throw: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            awaiters: RefCell::new(Vec::new()),
        }
    }

    /// Installs the task's future. A task's execution is set exactly once.
    pub(crate) fn install(&self, future: Pin<Box<dyn Future<Output = ()>>>) {
        let mut slot = self.future.borrow_mut();
        debug_assert!(slot.is_none(), "task execution installed twice");
        *slot = Some(future);
    }

    /// Polls the installed future once, returning `true` when it resolved.
    ///
    /// Returns `true` immediately if the future was already gone. The borrow
    /// of the future slot is held across the poll; only the scheduler calls
    /// this, so the poll cannot re-enter its own slot.
    pub(crate) fn poll(&self, ctx: &mut std::task::Context<'_>) -> bool {
        let mut slot = self.future.borrow_mut();
        let Some(future) = slot.as_mut() else {
            return true;
        };

        if future.as_mut().poll(ctx).is_ready() {
            // Drop the future eagerly: it may capture streams, runtime
            // handles, and child task references.
            *slot = None;
            return true;
        }

        false
    }

    /// Marks the task done, returning the awaiters to resume in order.
    pub(crate) fn complete(&self) -> Vec<TaskId> {
        self.done.set(true);
        self.awaiters.borrow_mut().drain(..).collect()
    }

    /// Whether the task's execution has terminated.
    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Whether the task body resolved with a value.
    #[inline]
    pub(crate) fn result_set(&self) -> bool {
        self.result_set.get()
    }

    /// Records that the task body resolved with a value (held in the typed
    /// result cell of the public handle).
    #[inline]
    pub(crate) fn mark_resolved(&self) {
        self.result_set.set(true);
    }

    /// Records the task body's failure. Written at most once.
    pub(crate) fn set_error(&self, error: Error) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// The task body's stored failure, if any.
    pub(crate) fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    /// Arms a failure to raise at the task's next suspension point.
    pub(crate) fn set_throw(&self, error: Error) {
        let mut slot = self.throw.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Takes the pending throw-in, if one is armed.
    pub(crate) fn take_throw(&self) -> Option<Error> {
        self.throw.borrow_mut().take()
    }

    /// Records a task queued while this task was executing.
    pub(crate) fn adopt(&self, child: &TaskRef) {
        self.children.borrow_mut().push(Rc::downgrade(child));
    }

    /// Snapshot of the still-live children, in spawn order.
    pub(crate) fn children(&self) -> Vec<TaskRef> {
        self.children
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Suspends `waiter` until this task completes. Awaiters resume in
    /// registration order.
    pub(crate) fn add_awaiter(&self, waiter: TaskId) {
        self.awaiters.borrow_mut().push(waiter);
    }
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("scheduled", &self.scheduled)
            .field("done", &self.done)
            .field("result_set", &self.result_set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn throw_is_taken_once() {
        let core = TaskCore::new();
        core.set_throw(Error::Cancelled);
        assert_eq!(core.take_throw(), Some(Error::Cancelled));
        assert_eq!(core.take_throw(), None);
    }

    #[test]
    fn first_error_wins() {
        let core = TaskCore::new();
        core.set_error(Error::Cancelled);
        core.set_error(Error::Deadlock);
        assert_eq!(core.error(), Some(Error::Cancelled));
    }

    #[test]
    fn complete_drains_awaiters_in_order() {
        let core = TaskCore::new();
        let (a, b) = (TaskId::next(), TaskId::next());
        core.add_awaiter(a);
        core.add_awaiter(b);

        assert_eq!(core.complete(), vec![a, b]);
        assert!(core.is_done());
        assert!(core.complete().is_empty());
    }
}
