use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::Error;
use crate::rt::scheduler::Scheduler;
use crate::rt::task::Task;

thread_local! {
    /// The runtime currently entered on this thread, if any.
    ///
    /// Set via [`Runtime::enter`] and restored when the guard drops, so
    /// nested scopes swap cleanly on every exit path.
    static CURRENT_RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// The `rill` runtime: a cheap-clone handle over one single-threaded
/// scheduler.
///
/// Exactly one runtime is active per root at any time; [`Runtime::enter`]
/// makes this one the thread's ambient runtime for the free-function facade
/// ([`spawn`], [`run`], and the combinators) until the returned guard drops.
///
/// [`spawn`]: crate::rt::spawn
/// [`run`]: crate::rt::run
#[derive(Clone, Debug)]
pub struct Runtime {
    scheduler: Rc<Scheduler>,
}

impl Runtime {
    /// Creates a new `Runtime` instance.
    pub fn new() -> Self {
        Runtime {
            scheduler: Rc::new(Scheduler::new()),
        }
    }

    /// The runtime currently entered on this thread, if any.
    pub fn current() -> Option<Runtime> {
        CURRENT_RUNTIME.with(|c| c.borrow().clone())
    }

    /// Makes this runtime the thread's ambient runtime until the guard
    /// drops, at which point the previously entered runtime (if any) is
    /// restored.
    pub fn enter(&self) -> EnterGuard {
        let prev = CURRENT_RUNTIME.with(|c| c.replace(Some(self.clone())));

        EnterGuard {
            prev,
            _marker: PhantomData,
        }
    }

    /// Queues `future` as a new task and starts it synchronously.
    ///
    /// Returns after the task's first suspension (or immediate completion).
    /// When called from inside another task on this runtime, the new task is
    /// recorded as that task's child for cancellation purposes.
    pub fn queue<T, F>(&self, future: F) -> Task<T>
    where
        T: 'static,
        F: Future<Output = Result<T, Error>> + 'static,
    {
        Task::new(&self.scheduler, future)
    }

    /// Runs scheduler ticks until `condition` reports true.
    ///
    /// This is the runtime's only blocking call. Fails with
    /// [`Error::Deadlock`] when the condition is unmet but nothing remains
    /// to wait on.
    pub fn drive(&self, condition: impl FnMut() -> bool) -> Result<(), Error> {
        self.scheduler.drive(condition)
    }

    /// Runs a future to completion, serving as the runtime's entry point.
    ///
    /// Enters this runtime, queues the future as the root task, and blocks
    /// the current thread until it resolves.
    pub fn block_on<T, F>(&self, future: F) -> Result<T, Error>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, Error>> + 'static,
    {
        let _guard = self.enter();
        self.queue(future).wait()
    }

    /// The underlying scheduler. Test hook for scheduler-state assertions.
    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &Rc<Scheduler> {
        &self.scheduler
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

/// Scope guard returned by [`Runtime::enter`].
///
/// Restores the previously entered runtime when dropped.
pub struct EnterGuard {
    prev: Option<Runtime>,
    /// Restricts the guard to the thread whose ambient runtime it swapped.
    _marker: PhantomData<Rc<()>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_RUNTIME.with(|c| *c.borrow_mut() = prev);
    }
}

impl std::fmt::Debug for EnterGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnterGuard").finish()
    }
}
