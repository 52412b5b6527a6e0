//! Structured helpers composing tasks: [`all`], [`race`], and [`timeout`].
//!
//! The helpers are root-side: they normalize their inputs into tasks on the
//! thread's entered runtime, drive the scheduler until the composition
//! resolves, and are caller bugs inside a task (driving there would block
//! the scheduler on itself).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::Error;
use crate::rt::{Runtime, Task};
use crate::time::delay;

/// One entry of a composition: a task that is already queued, or a future
/// to queue when the helper runs.
pub enum Job<T> {
    /// An already-running task, accepted as-is.
    Task(Task<T>),
    /// A future queued (and started) by the helper that receives it.
    Future(Pin<Box<dyn Future<Output = Result<T, Error>>>>),
}

impl<T: 'static> Job<T> {
    /// Wraps a future for deferred queueing.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + 'static,
    {
        Job::Future(Box::pin(future))
    }

    fn into_task(self, runtime: &Runtime) -> Task<T> {
        match self {
            Job::Task(task) => task,
            Job::Future(future) => runtime.queue(future),
        }
    }
}

impl<T> From<Task<T>> for Job<T> {
    fn from(task: Task<T>) -> Self {
        Job::Task(task)
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Task(task) => f.debug_tuple("Job::Task").field(task).finish(),
            Job::Future(_) => f.debug_tuple("Job::Future").finish(),
        }
    }
}

/// The thread's entered runtime, required by every helper.
fn ambient() -> Result<Runtime, Error> {
    Runtime::current()
        .ok_or_else(|| Error::bug("no runtime in scope; enter a runtime before composing tasks"))
}

/// Drives every entry to completion and returns the keyed results.
///
/// Futures among the entries are queued (and started) immediately, in entry
/// order. The scheduler is driven until every task is done; any task error
/// then surfaces at result retrieval and aborts the helper, completed
/// siblings notwithstanding.
pub fn all<K, T>(entries: impl IntoIterator<Item = (K, Job<T>)>) -> Result<Vec<(K, T)>, Error>
where
    T: Clone + 'static,
{
    let runtime = ambient()?;

    let tasks: Vec<(K, Task<T>)> = entries
        .into_iter()
        .map(|(key, job)| (key, job.into_task(&runtime)))
        .collect();

    runtime.drive(|| tasks.iter().all(|(_, task)| task.is_done()))?;

    let mut results = Vec::with_capacity(tasks.len());
    for (key, task) in tasks {
        results.push((key, task.result()?));
    }

    Ok(results)
}

/// Drives until one entry completes, cancels the rest, and returns the
/// winner's result (or raises the winner's error).
///
/// The winner is the first completed task in entry order. An empty race is
/// a caller bug.
pub fn race<T>(jobs: impl IntoIterator<Item = Job<T>>) -> Result<T, Error>
where
    T: Clone + 'static,
{
    let runtime = ambient()?;

    let tasks: Vec<Task<T>> = jobs
        .into_iter()
        .map(|job| job.into_task(&runtime))
        .collect();

    if tasks.is_empty() {
        return Err(Error::bug("race requires at least one task"));
    }

    runtime.drive(|| tasks.iter().any(Task::is_done))?;

    let winner = tasks
        .iter()
        .position(|task| task.is_done())
        .ok_or_else(|| Error::Internal("drive returned with no finished task".into()))?;

    for (index, task) in tasks.iter().enumerate() {
        if index != winner {
            task.cancel();
        }
    }

    tasks[winner].result()
}

/// Races `future` against a timer that fails with [`Error::Timeout`] after
/// `seconds`.
pub fn timeout<T, F>(future: F, seconds: f64) -> Result<T, Error>
where
    T: Clone + 'static,
    F: Future<Output = Result<T, Error>> + 'static,
{
    race([
        Job::future(future),
        Job::future(async move {
            delay(seconds).await?;
            Err(Error::Timeout(seconds))
        }),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::spawn;

    #[test]
    fn race_picks_the_fast_task_and_cancels_the_slow() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let slow = rt.queue(async {
            delay(0.05).await?;
            Ok("slow".to_string())
        });
        let fast = rt.queue(async { Ok("fast".to_string()) });

        let winner = race([Job::from(slow.clone()), Job::from(fast)]).unwrap();
        assert_eq!(winner, "fast");

        assert_eq!(slow.wait(), Err(Error::Cancelled));
    }

    #[test]
    fn race_surfaces_the_winner_error() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let out: Result<(), Error> = race([Job::future(async {
            delay(0.0).await?;
            Err(Error::Protocol("lost".into()))
        })]);

        assert_eq!(out, Err(Error::Protocol("lost".into())));
    }

    #[test]
    fn empty_race_is_a_caller_bug() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let out: Result<(), Error> = race(Vec::new());
        assert!(matches!(out, Err(Error::CallerBug(_))));
    }

    #[test]
    fn all_keeps_keys_with_their_results() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let results = all([
            (
                "a",
                Job::future(async {
                    delay(0.01).await?;
                    Ok(1)
                }),
            ),
            ("b", Job::future(async { Ok(2) })),
            (
                "c",
                Job::future(async {
                    delay(0.0).await?;
                    Ok(3)
                }),
            ),
        ])
        .unwrap();

        assert_eq!(results, vec![("a", 1), ("b", 2), ("c", 3)]);
    }

    #[test]
    fn all_accepts_running_tasks() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let running = rt.queue(async {
            delay(0.0).await?;
            Ok(10)
        });

        let results = all([
            ("queued", Job::future(async { Ok(20) })),
            ("running", Job::from(running)),
        ])
        .unwrap();

        assert_eq!(results, vec![("queued", 20), ("running", 10)]);
    }

    #[test]
    fn all_surfaces_the_first_error_in_entry_order() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let out = all([
            ("ok", Job::future(async { Ok(1) })),
            (
                "bad",
                Job::future(async {
                    delay(0.0).await?;
                    Err(Error::Protocol("broken".into()))
                }),
            ),
        ]);

        assert_eq!(out, Err(Error::Protocol("broken".into())));
    }

    #[test]
    fn timeout_raises_when_the_work_is_too_slow() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let out: Result<(), Error> = timeout(
            async {
                delay(10.0).await?;
                Ok(())
            },
            0.01,
        );

        assert_eq!(out, Err(Error::Timeout(0.01)));
    }

    #[test]
    fn timeout_passes_fast_work_through() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        let out = timeout(
            async {
                delay(0.0).await?;
                Ok("done".to_string())
            },
            5.0,
        );

        assert_eq!(out.unwrap(), "done");
    }

    #[test]
    fn helpers_inside_a_task_are_caller_bugs() {
        let rt = Runtime::new();
        let _guard = rt.enter();

        rt.block_on(async {
            let inner = spawn(async { Ok(()) })?;
            // Blocking composition from inside a task would drive the
            // scheduler on itself.
            match race([Job::from(inner)]) {
                Err(Error::CallerBug(_)) => Ok(()),
                other => panic!("expected caller bug, got {other:?}"),
            }
        })
        .unwrap();
    }
}
