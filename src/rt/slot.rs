use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;

/// Shared resume cell between the scheduler and one suspended operation.
///
/// A suspending primitive (`delay`, `write_all`, `read_all`) hands a clone of
/// its slot to the scheduler when it registers a timer or watcher. When the
/// operation finishes, the scheduler fills the slot with either the resume
/// payload or the failure to throw at the suspension point, then schedules
/// the owning task. The primitive's next poll takes the value out.
///
/// A slot is filled at most once; the fill-side never observes the value
/// again, which keeps the watcher replacement discipline free of aliased
/// mutable state.
pub(crate) struct Slot<T> {
    cell: Rc<RefCell<Option<Result<T, Error>>>>,
}

impl<T> Slot<T> {
    /// Creates an empty slot.
    pub(crate) fn new() -> Self {
        Slot {
            cell: Rc::new(RefCell::new(None)),
        }
    }

    /// Fills the slot with the value the suspended operation resumes with.
    ///
    /// Filling an already-filled slot is a scheduler bug; the second value
    /// is dropped in release builds.
    pub(crate) fn fill(&self, value: Result<T, Error>) {
        let mut cell = self.cell.borrow_mut();
        debug_assert!(cell.is_none(), "resume slot filled twice");
        if cell.is_none() {
            *cell = Some(value);
        }
    }

    /// Takes the resume value out, if the scheduler has filled it.
    pub(crate) fn take(&self) -> Option<Result<T, Error>> {
        self.cell.borrow_mut().take()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Slot {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("filled", &self.cell.borrow().is_some())
            .finish()
    }
}
