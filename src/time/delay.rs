use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::rt::scheduler;
use crate::rt::slot::Slot;

/// Waits until `seconds` have elapsed.
///
/// Negative values clamp to zero, and a zero delay is the canonical "yield
/// to the next tick". Must be awaited inside a task.
pub fn delay(seconds: f64) -> Delay {
    // Non-finite and negative values clamp to zero; the upper bound keeps
    // the deadline arithmetic from overflowing on absurd inputs.
    let seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds.min(1.0e9)
    } else {
        0.0
    };

    Delay::new(Duration::from_secs_f64(seconds))
}

/// Waits until `duration` has elapsed.
///
/// Functions as an asynchronous alternative to `std::thread::sleep`.
pub fn sleep(duration: Duration) -> Delay {
    Delay::new(duration)
}

/// Future returned by [`delay`] and [`sleep`].
#[derive(Debug)]
pub struct Delay {
    /// How long to wait from the first poll.
    duration: Duration,
    /// Resume cell shared with the scheduler's timer entry.
    slot: Slot<()>,
    /// Indicates whether the timer has been registered with the scheduler.
    registered: bool,
}

impl Delay {
    fn new(duration: Duration) -> Self {
        Delay {
            duration,
            slot: Slot::new(),
            registered: false,
        }
    }
}

impl Future for Delay {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Self::Output> {
        let Some((scheduler, current)) = scheduler::context() else {
            return Poll::Ready(Err(Error::bug("delay called outside of a task")));
        };

        // A throw-in (cancellation) surfaces here before anything else.
        if let Some(error) = current.take_throw() {
            return Poll::Ready(Err(error));
        }

        if let Some(result) = self.slot.take() {
            return Poll::Ready(result);
        }

        if !self.registered {
            self.registered = true;
            scheduler.add_timer(Instant::now() + self.duration, current.id, self.slot.clone());
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::Runtime;

    #[test]
    fn negative_delay_clamps_to_zero() {
        let rt = Runtime::new();
        let start = Instant::now();

        rt.block_on(async { delay(-5.0).await }).unwrap();

        // A clamped delay yields once and resumes on the next tick.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_matches_thread_clock() {
        let rt = Runtime::new();
        let start = Instant::now();

        rt.block_on(async { sleep(Duration::from_millis(30)).await })
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
