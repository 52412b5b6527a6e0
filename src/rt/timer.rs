use std::time::Instant;

use crate::rt::slot::Slot;
use crate::rt::task::TaskId;

/// Wrapper for a deadline and the task suspended on it.
///
/// Timers are stored unordered and scanned once per tick; the scan both fires
/// due entries and computes the earliest future deadline, which bounds the
/// tick's readiness wait.
#[derive(Debug)]
pub(crate) struct TimerEntry {
    /// When the timer is set to expire.
    pub(crate) deadline: Instant,
    /// The task to resume when the timer expires.
    pub(crate) task: TaskId,
    /// Resume cell of the suspended `Delay`.
    pub(crate) slot: Slot<()>,
}
