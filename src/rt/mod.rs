//! The `rill` runtime.
//!
//! A single-threaded, cooperative scheduler that multiplexes tasks over
//! byte-oriented streams and wall-clock timers. Tasks yield control only at
//! well-defined suspension points (`delay`, `write_all`, `read_all`, and
//! `join`); between suspensions, execution is straight-line. The scheduler's
//! tick fires due timers, runs one readiness wait over every watched stream
//! bounded by the earliest remaining deadline, and resumes the tasks whose
//! streams made progress.
//!
//! Because the OS is not involved in cooperative multitasking, the runtime
//! is responsible for ensuring each task is scheduled and polled to make
//! progress; a task that never yields starves every other task, and a root
//! condition that can never be met with nothing left to wait on is reported
//! as a deadlock rather than spun on.

mod runtime;
pub use runtime::{EnterGuard, Runtime};

mod spawn;
pub use spawn::{run, spawn};

pub mod io;

pub(crate) mod scheduler;
pub(crate) mod slot;
pub(crate) mod timer;

mod task;
pub use task::{Join, Task, TaskId};

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::future::Future;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::error::Error;
    use crate::time::delay;

    #[test]
    fn sequential_delay_resolves() {
        let rt = Runtime::new();

        let out = rt.block_on(async {
            delay(0.0).await?;
            Ok("ok".to_string())
        });

        assert_eq!(out.unwrap(), "ok");
    }

    #[test]
    fn parent_child_await() {
        let rt = Runtime::new();

        let out = rt.block_on(async {
            let child = spawn(async {
                delay(0.0).await?;
                Ok("c".to_string())
            })?;

            Ok(child.join().await? + "-p")
        });

        assert_eq!(out.unwrap(), "c-p");
    }

    #[test]
    fn empty_drive_deadlocks() {
        let rt = Runtime::new();
        assert_eq!(rt.drive(|| false), Err(Error::Deadlock));
    }

    #[test]
    fn repeated_result_retrieval_is_stable() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let task = rt.queue(async {
            delay(0.0).await?;
            Ok(41 + 1)
        });

        assert_eq!(task.wait(), Ok(42));
        assert_eq!(task.result(), Ok(42));
        assert_eq!(task.result(), Ok(42));
    }

    #[test]
    fn result_before_completion_is_a_caller_bug() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let task = rt.queue(async {
            delay(0.05).await?;
            Ok(())
        });

        assert!(matches!(task.result(), Err(Error::CallerBug(_))));
        task.wait().unwrap();
    }

    #[test]
    fn task_error_surfaces_on_await() {
        let rt = Runtime::new();

        let out: Result<(), Error> = rt.block_on(async {
            delay(0.0).await?;
            Err(Error::Protocol("boom".into()))
        });

        assert_eq!(out, Err(Error::Protocol("boom".into())));
    }

    #[test]
    fn circular_await_is_a_caller_bug() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let slot: Rc<Cell<Option<Task<()>>>> = Rc::new(Cell::new(None));
        let shared = Rc::clone(&slot);

        let task = rt.queue(async move {
            delay(0.0).await?;
            let me = shared.take().expect("own handle not published");
            me.join().await
        });
        slot.set(Some(task.clone()));

        assert!(matches!(task.wait(), Err(Error::CallerBug(_))));
    }

    #[test]
    fn delay_outside_a_task_is_a_caller_bug() {
        // Poll the future by hand: there is no task context to suspend in.
        let mut future = Box::pin(delay(0.0));
        let waker = task::TaskWaker::noop();
        let mut ctx = std::task::Context::from_waker(&waker);

        match future.as_mut().poll(&mut ctx) {
            std::task::Poll::Ready(Err(Error::CallerBug(_))) => {}
            other => panic!("expected caller bug, got {other:?}"),
        }
    }

    #[test]
    fn cancel_clears_timers_synchronously() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let task = rt.queue(async {
            delay(60.0).await?;
            Ok(())
        });

        let id = task.id();
        assert!(rt.scheduler().references(id));

        task.cancel();
        assert!(!rt.scheduler().references(id));

        assert_eq!(task.wait(), Err(Error::Cancelled));
    }

    #[test]
    fn cancel_cascades_to_children_first() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let child_slot: Rc<Cell<Option<Task<()>>>> = Rc::new(Cell::new(None));
        let shared = Rc::clone(&child_slot);

        let parent = rt.queue(async move {
            let child = spawn(async {
                delay(60.0).await?;
                Ok(())
            })?;
            shared.set(Some(child.clone()));

            child.join().await
        });

        let child = child_slot.take().expect("child not spawned");
        parent.cancel();

        assert!(!rt.scheduler().references(child.id()));
        assert!(!rt.scheduler().references(parent.id()));
        assert_eq!(child.wait(), Err(Error::Cancelled));
        assert_eq!(parent.wait(), Err(Error::Cancelled));
    }

    #[test]
    fn cancel_after_completion_is_a_noop() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let task = rt.queue(async { Ok(7) });
        assert!(task.is_done());

        task.cancel();
        assert_eq!(task.wait(), Ok(7));
    }

    #[test]
    fn awaiters_resume_in_registration_order() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let order: Rc<std::cell::RefCell<Vec<&'static str>>> = Rc::default();

        let slow = rt.queue(async {
            delay(0.01).await?;
            Ok(())
        });

        for name in ["first", "second", "third"] {
            let slow = slow.clone();
            let order = Rc::clone(&order);
            rt.queue(async move {
                slow.join().await?;
                order.borrow_mut().push(name);
                Ok(())
            });
        }

        rt.drive(|| order.borrow().len() == 3).unwrap();
        assert_eq!(*order.borrow(), ["first", "second", "third"]);
    }

    #[test]
    fn queue_starts_the_body_synchronously() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let started = Rc::new(Cell::new(false));
        let flag = Rc::clone(&started);

        let _task = rt.queue(async move {
            flag.set(true);
            delay(0.05).await
        });

        // No tick has run yet; the body still executed up to its first
        // suspension.
        assert!(started.get());
    }

    #[test]
    fn timers_do_not_fire_early() {
        let rt = Runtime::new();
        let start = Instant::now();

        rt.block_on(async { delay(0.05).await }).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
