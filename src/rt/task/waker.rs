use std::marker::PhantomData;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::task::{RawWaker, RawWakerVTable, Waker};
use std::{mem, ptr};

use crate::rt::scheduler::Scheduler;
use crate::rt::task::TaskId;

/// Wrapper around `Waker` that enforces `!Send` and `!Sync`.
///
/// Waking schedules the associated task on its scheduler's ready queue; the
/// scheduler itself is held weakly so a stray waker outliving the runtime
/// becomes a no-op instead of pinning it.
#[derive(Debug)]
pub(crate) struct TaskWaker {
    waker: Waker,
    /// `Waker` is `Send` and `Sync` by default. This marker ensures that
    /// `TaskWaker` is `!Send` and `!Sync`, restricting it to single-threaded
    /// contexts.
    _marker: PhantomData<Rc<()>>,
}

struct WakerData {
    id: TaskId,
    scheduler: Weak<Scheduler>,
}

impl TaskWaker {
    /// Creates a new `TaskWaker` for the given task on the given scheduler.
    pub(crate) fn new(id: TaskId, scheduler: Weak<Scheduler>) -> Self {
        let data = Rc::new(WakerData { id, scheduler });

        TaskWaker {
            // SAFETY: This is used in a single-threaded context. The vtable
            // functions are only ever called with the pointer produced from
            // the `Rc<WakerData>` above.
            waker: unsafe { Waker::from_raw(Self::raw_waker(data)) },
            _marker: PhantomData,
        }
    }

    fn raw_waker(data: Rc<WakerData>) -> RawWaker {
        // Does not decrement the reference-count of `data`.
        let ptr = Rc::into_raw(data) as *const ();
        RawWaker::new(ptr, &WAKER_VTABLE)
    }

    /// A `Waker` that does nothing when woken.
    #[inline]
    #[allow(dead_code)]
    pub(crate) const fn noop() -> Waker {
        // SAFETY: `Waker` only consists of no-op functions, making it
        // trivially thread-safe. The data pointer is never accessed.
        unsafe { Waker::from_raw(TaskWaker::noop_raw_waker()) }
    }

    #[inline]
    const fn noop_raw_waker() -> RawWaker {
        let vtable = &RawWakerVTable::new(
            |_: *const ()| -> RawWaker { TaskWaker::noop_raw_waker() },
            |_: *const ()| {},
            |_: *const ()| {},
            |_: *const ()| {},
        );

        RawWaker::new(ptr::null(), vtable)
    }
}

impl Deref for TaskWaker {
    type Target = Waker;

    fn deref(&self) -> &Self::Target {
        &self.waker
    }
}

const WAKER_VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);

fn schedule(data: &WakerData) {
    if let Some(scheduler) = data.scheduler.upgrade() {
        scheduler.schedule(data.id);
    }
}

/// Returns a `RawWaker`, incrementing the reference-count of the underlying
/// `Rc<WakerData>`.
unsafe fn clone(ptr: *const ()) -> RawWaker {
    // SAFETY: Raw pointer was initially created from a `Rc<WakerData>`.
    let data: Rc<WakerData> = unsafe { Rc::from_raw(ptr as *const WakerData) };
    let cloned = Rc::clone(&data);

    // Prevent `data` from being dropped, which would incorrectly decrement
    // the reference-count.
    mem::forget(data);

    TaskWaker::raw_waker(cloned)
}

/// Wakes the underlying task, consuming the corresponding `Rc<WakerData>`.
unsafe fn wake(ptr: *const ()) {
    // SAFETY: Raw pointer was initially created from a `Rc<WakerData>`.
    let data: Rc<WakerData> = unsafe { Rc::from_raw(ptr as *const WakerData) };

    schedule(&data);

    // `data` is dropped here, as waking by value should consume the `Waker`.
}

/// Wakes the underlying task without consuming the corresponding
/// `Rc<WakerData>`.
unsafe fn wake_by_ref(ptr: *const ()) {
    // SAFETY: Raw pointer was initially created from a `Rc<WakerData>`.
    let data: Rc<WakerData> = unsafe { Rc::from_raw(ptr as *const WakerData) };

    schedule(&data);

    // Waking by reference should not consume the `Waker`.
    mem::forget(data);
}

/// Drops the `Rc` corresponding to the underlying `WakerData`.
unsafe fn drop(ptr: *const ()) {
    // SAFETY: Raw pointer was initially created from a `Rc<WakerData>`.
    let _: Rc<WakerData> = unsafe { Rc::from_raw(ptr as *const WakerData) };
}
