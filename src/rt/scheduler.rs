use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::task::{Context, Waker};
use std::thread;
use std::time::Instant;

use crate::error::Error;
use crate::rt::io::driver::Driver;
use crate::rt::io::watcher::Watcher;
use crate::rt::io::IO_CHUNK;
use crate::rt::slot::Slot;
use crate::rt::task::{TaskId, TaskRef, TaskWaker};
use crate::rt::timer::TimerEntry;

thread_local! {
    /// The scheduler and task currently being polled, if any.
    ///
    /// Suspending primitives read this to find the execution they belong to;
    /// `queue` reads it to record parent/child links. Saved and restored
    /// around every poll, so tasks started synchronously from inside another
    /// task observe the correct parent.
    static CURRENT: RefCell<Option<(Rc<Scheduler>, TaskRef)>> = const { RefCell::new(None) };
}

/// The scheduler and task core of the execution currently being polled.
///
/// `None` outside of any task, in which case a suspending primitive must
/// fail with a caller-bug error rather than suspend.
pub(crate) fn context() -> Option<(Rc<Scheduler>, TaskRef)> {
    CURRENT.with(|c| c.borrow().clone())
}

type TaskEntry = (TaskRef, TaskWaker);

/// Single-threaded task scheduler.
///
/// Owns the live-task map, the ready queue, the read- and write-watcher maps
/// keyed by raw file descriptor, and the timer list. All state is mutated
/// only from the thread the scheduler was created on; watcher and timer
/// values are immutable, so every state update is a replacement.
#[derive(Debug)]
pub(crate) struct Scheduler {
    /// Stores all live tasks keyed by their ID, each paired with a
    /// `TaskWaker`. Doubles as the execution-to-task association used by
    /// `queue` (parent lookup) and `cancel`; entries are removed as tasks
    /// complete, so finished tasks do not pin the scheduler.
    tasks: RefCell<HashMap<TaskId, TaskEntry>>,
    /// Queue of task IDs ready to be polled.
    ready: RefCell<VecDeque<TaskId>>,
    /// Pending reads, at most one per stream.
    read: RefCell<HashMap<RawFd, Watcher<Vec<u8>>>>,
    /// Pending writes, at most one per stream.
    write: RefCell<HashMap<RawFd, Watcher<()>>>,
    /// Pending timers, unordered; scanned once per tick.
    timers: RefCell<Vec<TimerEntry>>,
    /// Readiness wait over the watcher fd sets.
    driver: RefCell<Driver>,
}

impl Scheduler {
    /// Creates a new `Scheduler`.
    pub(crate) fn new() -> Self {
        Scheduler {
            tasks: RefCell::new(HashMap::new()),
            ready: RefCell::new(VecDeque::new()),
            read: RefCell::new(HashMap::new()),
            write: RefCell::new(HashMap::new()),
            timers: RefCell::new(Vec::new()),
            driver: RefCell::new(Driver::new()),
        }
    }

    /// Registers `core` as a live task and starts it synchronously.
    ///
    /// If called while another task on this scheduler is executing, the new
    /// task is recorded as that task's child. The call returns after the new
    /// task's first suspension (or its immediate completion).
    pub(crate) fn start(self: &Rc<Self>, core: TaskRef) {
        if let Some((scheduler, parent)) = context() {
            if Rc::ptr_eq(&scheduler, self) {
                parent.adopt(&core);
            }
        }

        let id = core.id;
        let waker = TaskWaker::new(id, Rc::downgrade(self));
        self.tasks.borrow_mut().insert(id, (core, waker));

        self.poll_task(id);
    }

    /// Runs ticks until `condition` reports true.
    ///
    /// This is the only function that blocks the thread. Fails with
    /// [`Error::Deadlock`] when the condition is unmet but no watcher, timer,
    /// or scheduled task remains to make progress.
    pub(crate) fn drive(self: &Rc<Self>, mut condition: impl FnMut() -> bool) -> Result<(), Error> {
        if context().is_some() {
            return Err(Error::bug(
                "cannot drive the scheduler from inside a task; use join instead",
            ));
        }

        while !condition() {
            let idle = self.read.borrow().is_empty()
                && self.write.borrow().is_empty()
                && self.timers.borrow().is_empty()
                && self.ready.borrow().is_empty();

            if idle {
                return Err(Error::Deadlock);
            }

            self.tick();
        }

        Ok(())
    }

    /// One scheduler tick: fire due timers, resume their tasks, run one
    /// readiness wait bounded by the earliest remaining deadline, then resume
    /// the tasks whose streams made progress.
    ///
    /// Timer tasks resume before the readiness wait, so a watcher installed
    /// by a freshly woken task participates in the same tick's wait. The
    /// deadline bounding that wait is taken after those tasks have run: a
    /// resumed task may have armed a sooner timer than any that survived the
    /// scan, and a stale bound would let it fire late.
    fn tick(self: &Rc<Self>) {
        self.fire_timers();
        self.run_ready();
        self.wait_io(self.next_deadline());
        self.run_ready();
    }

    /// Marks the task as ready to be polled, unless it is already queued,
    /// finished, or unknown to this scheduler.
    pub(crate) fn schedule(&self, id: TaskId) {
        let Some(core) = self.lookup(id) else {
            return;
        };

        if core.is_done() || core.scheduled.get() {
            return;
        }

        core.scheduled.set(true);
        self.ready.borrow_mut().push_back(id);
    }

    /// The live task registered under `id`, if any.
    pub(crate) fn lookup(&self, id: TaskId) -> Option<TaskRef> {
        self.tasks.borrow().get(&id).map(|(core, _)| Rc::clone(core))
    }

    /// Registers a timer resuming `task` at `deadline`.
    pub(crate) fn add_timer(&self, deadline: Instant, task: TaskId, slot: Slot<()>) {
        self.timers.borrow_mut().push(TimerEntry {
            deadline,
            task,
            slot,
        });
    }

    /// Installs a write watcher for its stream.
    ///
    /// A stream is owned by at most one watcher at a time: these are
    /// request/response sockets, so a second watcher in either direction is
    /// a caller bug.
    pub(crate) fn watch_write(&self, watcher: Watcher<()>) -> Result<(), Error> {
        let fd = watcher.fd();
        if self.read.borrow().contains_key(&fd) {
            return Err(Error::bug("stream already under a read watcher"));
        }

        match self.write.borrow_mut().entry(fd) {
            Entry::Occupied(_) => Err(Error::bug("stream already under a write watcher")),
            Entry::Vacant(vacant) => {
                vacant.insert(watcher);
                Ok(())
            }
        }
    }

    /// Installs a read watcher for its stream. Same exclusivity rules as
    /// [`Scheduler::watch_write`].
    pub(crate) fn watch_read(&self, watcher: Watcher<Vec<u8>>) -> Result<(), Error> {
        let fd = watcher.fd();
        if self.write.borrow().contains_key(&fd) {
            return Err(Error::bug("stream already under a write watcher"));
        }

        match self.read.borrow_mut().entry(fd) {
            Entry::Occupied(_) => Err(Error::bug("stream already under a read watcher")),
            Entry::Vacant(vacant) => {
                vacant.insert(watcher);
                Ok(())
            }
        }
    }

    /// Cancels a task: children first, then the task's own watchers and
    /// timers, then a best-effort throw-in delivered at its next suspension
    /// point.
    ///
    /// No-op for finished tasks. Returns after teardown: by the time this
    /// returns, no watcher or timer referencing the task remains and every
    /// stream it was watching is closed.
    pub(crate) fn cancel(&self, core: &TaskRef) {
        if core.is_done() {
            return;
        }

        for child in core.children() {
            self.cancel(&child);
        }

        let id = core.id;

        let write_fds: Vec<RawFd> = self
            .write
            .borrow()
            .iter()
            .filter(|(_, w)| w.belongs_to(id))
            .map(|(fd, _)| *fd)
            .collect();
        for fd in write_fds {
            if let Some(watcher) = self.write.borrow_mut().remove(&fd) {
                watcher.stream().close();
            }
        }

        let read_fds: Vec<RawFd> = self
            .read
            .borrow()
            .iter()
            .filter(|(_, w)| w.belongs_to(id))
            .map(|(fd, _)| *fd)
            .collect();
        for fd in read_fds {
            if let Some(watcher) = self.read.borrow_mut().remove(&fd) {
                watcher.stream().close();
            }
        }

        self.timers.borrow_mut().retain(|timer| timer.task != id);

        if !core.is_done() {
            core.set_throw(Error::Cancelled);
            self.schedule(id);
        }
    }

    /// Whether any watcher or timer still references `id`. Test hook for the
    /// cancellation teardown invariant.
    #[cfg(test)]
    pub(crate) fn references(&self, id: TaskId) -> bool {
        self.read.borrow().values().any(|w| w.belongs_to(id))
            || self.write.borrow().values().any(|w| w.belongs_to(id))
            || self.timers.borrow().iter().any(|t| t.task == id)
    }

    /// Polls one task, re-entering it at its suspension point.
    fn poll_task(self: &Rc<Self>, id: TaskId) {
        let entry = {
            let tasks = self.tasks.borrow();
            tasks
                .get(&id)
                .map(|(core, waker)| (Rc::clone(core), Waker::clone(waker)))
        };
        let Some((core, waker)) = entry else {
            return;
        };

        core.scheduled.set(false);

        let prev = CURRENT.with(|c| c.replace(Some((Rc::clone(self), Rc::clone(&core)))));
        let mut ctx = Context::from_waker(&waker);
        let finished = core.poll(&mut ctx);
        CURRENT.with(|c| *c.borrow_mut() = prev);

        if finished {
            self.tasks.borrow_mut().remove(&id);
            // Awaiters resume in registration order.
            for waiter in core.complete() {
                self.schedule(waiter);
            }
        }
    }

    /// Polls scheduled tasks until the ready queue drains.
    fn run_ready(self: &Rc<Self>) {
        loop {
            let next = self.ready.borrow_mut().pop_front();
            let Some(id) = next else {
                break;
            };

            self.poll_task(id);
        }
    }

    /// Fires every due timer, scheduling the suspended tasks.
    fn fire_timers(&self) {
        let now = Instant::now();
        let timers = mem::take(&mut *self.timers.borrow_mut());

        let mut pending = Vec::with_capacity(timers.len());

        for entry in timers {
            if entry.deadline <= now {
                entry.slot.fill(Ok(()));
                self.schedule(entry.task);
            } else {
                pending.push(entry);
            }
        }

        self.timers.borrow_mut().extend(pending);
    }

    /// The earliest pending deadline, including timers armed by tasks that
    /// resumed earlier in the current tick.
    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|timer| timer.deadline).min()
    }

    /// One readiness wait plus at most one `IO_CHUNK`-bounded step per ready
    /// watcher, writes before reads.
    fn wait_io(&self, next_at: Option<Instant>) {
        let now = Instant::now();
        let read_fds: Vec<RawFd> = self.read.borrow().keys().copied().collect();
        let write_fds: Vec<RawFd> = self.write.borrow().keys().copied().collect();

        if read_fds.is_empty() && write_fds.is_empty() {
            // Nothing to select on; wait out the next timer instead.
            if let Some(at) = next_at {
                thread::sleep(at.saturating_duration_since(now));
            }
            return;
        }

        let timeout = next_at.map(|at| at.saturating_duration_since(now));
        let ready = self.driver.borrow_mut().select(&read_fds, &write_fds, timeout);

        // Readiness errors and empty wakeups both end the tick; failures on
        // individual streams surface through the read/write attempts below.
        let Ok(ready) = ready else {
            return;
        };
        if ready.writable.is_empty() && ready.readable.is_empty() {
            return;
        }

        for fd in ready.writable {
            self.write_step(fd);
        }
        for fd in ready.readable {
            self.read_step(fd);
        }
    }

    /// Advances the write watcher on a ready stream by at most one chunk.
    fn write_step(&self, fd: RawFd) {
        let Some(watcher) = self.write.borrow_mut().remove(&fd) else {
            return;
        };

        match watcher.write_chunk() {
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // No progress; retry on a later tick.
                self.write.borrow_mut().insert(fd, watcher);
            }
            Err(e) => {
                watcher.stream().close();
                let task = watcher.task();
                watcher.fail(Error::WriteFailed(e.to_string()));
                self.schedule(task);
            }
            Ok(0) => {
                self.write.borrow_mut().insert(fd, watcher);
            }
            Ok(written) => {
                if watcher.finished_after(written) {
                    // The whole buffer is delivered; the stream stays open
                    // for the caller's next operation.
                    let task = watcher.task();
                    watcher.resolve(());
                    self.schedule(task);
                } else {
                    self.write.borrow_mut().insert(fd, watcher.advanced(written));
                }
            }
        }
    }

    /// Advances the read watcher on a ready stream by at most one chunk.
    fn read_step(&self, fd: RawFd) {
        let Some(watcher) = self.read.borrow_mut().remove(&fd) else {
            return;
        };

        let mut chunk = [0u8; IO_CHUNK];
        match watcher.read_chunk(&mut chunk) {
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.read.borrow_mut().insert(fd, watcher);
            }
            Err(e) => {
                watcher.stream().close();
                let task = watcher.task();
                watcher.fail(Error::ReadFailed(e.to_string()));
                self.schedule(task);
            }
            Ok(0) => {
                // EOF frames the read: resume with the accumulated bytes.
                watcher.stream().close();
                let task = watcher.task();
                watcher.resolve_accumulated();
                self.schedule(task);
            }
            Ok(received) => {
                let watcher = watcher.grown(&chunk[..received]);
                if watcher.over_cap() {
                    watcher.stream().close();
                    let task = watcher.task();
                    watcher.fail(Error::ResponseTooLarge);
                    self.schedule(task);
                } else {
                    self.read.borrow_mut().insert(fd, watcher);
                }
            }
        }
    }
}
