use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::error::Error;
use crate::rt::scheduler::{self, Scheduler};
use crate::rt::task::{TaskCore, TaskId, TaskRef};

/// Typed cell the task's future resolves its output into.
type ResultCell<T> = Rc<RefCell<Option<Result<T, Error>>>>;

/// Handle to one cooperative unit of execution.
///
/// Created by [`Runtime::queue`] or [`spawn`]; the task body starts running
/// synchronously at creation and the handle is returned after the body's
/// first suspension (or immediate completion). Handles are cheap to clone
/// and every clone observes the same task.
///
/// A completed task's output is retrieved any number of times: repeated
/// awaits of the same task return equal values, which is why retrieval
/// requires `T: Clone`.
///
/// [`Runtime::queue`]: crate::rt::Runtime::queue
/// [`spawn`]: crate::rt::spawn
pub struct Task<T> {
    core: TaskRef,
    result: ResultCell<T>,
    scheduler: Weak<Scheduler>,
}

impl<T: 'static> Task<T> {
    /// Builds a task around `future` and starts it on `scheduler`.
    ///
    /// The installed execution runs the body, records `Ok` outputs into the
    /// typed result cell (flagging the core as resolved) and `Err` outputs
    /// into the core's error slot, in all cases leaving completion
    /// bookkeeping and awaiter resumption to the scheduler.
    pub(crate) fn new<F>(scheduler: &Rc<Scheduler>, future: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + 'static,
    {
        let core: TaskRef = Rc::new(TaskCore::new());
        let result: ResultCell<T> = Rc::new(RefCell::new(None));

        let execution = {
            // Held weakly: the core owns this future, and a cycle here would
            // leak every task that is dropped before completing.
            let core = Rc::downgrade(&core);
            let result = Rc::clone(&result);

            async move {
                let output = future.await;

                if let Some(core) = core.upgrade() {
                    match output {
                        Ok(value) => {
                            *result.borrow_mut() = Some(Ok(value));
                            core.mark_resolved();
                        }
                        Err(error) => core.set_error(error),
                    }
                }
            }
        };

        core.install(Box::pin(execution));

        let task = Task {
            core: Rc::clone(&core),
            result,
            scheduler: Rc::downgrade(scheduler),
        };

        scheduler.start(core);
        task
    }

    /// This task's unique ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Whether the task's execution has terminated, normally or with an
    /// error.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Cancels the task: recorded children first, then its watchers and
    /// timers, then a best-effort throw-in of [`Error::Cancelled`] delivered
    /// at its next suspension point.
    ///
    /// No-op if the task already finished. Never raises through the
    /// canceller; by the time this returns, no watcher or timer of this task
    /// remains in the scheduler.
    pub fn cancel(&self) {
        if self.core.is_done() {
            return;
        }

        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.cancel(&self.core);
        }
    }

    /// Awaits this task's completion from inside another task.
    ///
    /// Awaiting a task from its own body is a circular await and fails
    /// immediately. From outside any task, use [`Task::wait`] instead.
    pub fn join(&self) -> Join<T> {
        Join {
            task: self.clone(),
            registered: false,
        }
    }
}

impl<T: Clone + 'static> Task<T> {
    /// The task's resolved output, without driving the scheduler.
    ///
    /// Fails with a caller-bug error if the task has not completed yet.
    pub fn result(&self) -> Result<T, Error> {
        if let Some(error) = self.core.error() {
            return Err(error);
        }

        if self.core.result_set() {
            // Integrity cross-check: a resolved task must have a recorded
            // value in its typed cell.
            return match self.result.borrow().clone() {
                Some(output) => output,
                None => Err(Error::Internal(
                    "task resolved but its result slot is empty".into(),
                )),
            };
        }

        if self.core.is_done() {
            return Err(Error::Internal(
                "task finished without resolving or failing".into(),
            ));
        }

        Err(Error::bug("task not completed"))
    }

    /// Drives the scheduler until this task completes, then returns its
    /// output or raises its stored error.
    ///
    /// This blocks the thread and is therefore a caller bug inside a task;
    /// use [`Task::join`] there.
    pub fn wait(&self) -> Result<T, Error> {
        if scheduler::context().is_some() {
            return Err(Error::bug(
                "cannot block on a task from inside a task; use join instead",
            ));
        }

        let Some(scheduler) = self.scheduler.upgrade() else {
            // The runtime is gone; all that is left is whatever the task
            // recorded before it disappeared.
            return self.result();
        };

        let core = Rc::clone(&self.core);
        scheduler.drive(move || core.is_done())?;
        self.result()
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            core: Rc::clone(&self.core),
            result: Rc::clone(&self.result),
            scheduler: Weak::clone(&self.scheduler),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("done", &self.core.is_done())
            .finish()
    }
}

/// Future returned by [`Task::join`].
#[derive(Debug)]
pub struct Join<T> {
    task: Task<T>,
    /// Whether this awaiter is already registered with the target task.
    registered: bool,
}

impl<T: Clone + 'static> Future for Join<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        let Some((_, current)) = scheduler::context() else {
            return Poll::Ready(Err(Error::bug(
                "join awaited outside of a task; use wait instead",
            )));
        };

        if current.id == self.task.core.id {
            return Poll::Ready(Err(Error::bug("circular await: a task cannot await itself")));
        }

        // A throw-in (cancellation) surfaces at the suspension point before
        // anything else.
        if let Some(error) = current.take_throw() {
            return Poll::Ready(Err(error));
        }

        if self.task.core.is_done() {
            return Poll::Ready(self.task.result());
        }

        if !self.registered {
            self.task.core.add_awaiter(current.id);
            self.registered = true;
        }

        Poll::Pending
    }
}
