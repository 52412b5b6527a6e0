use std::future::Future;

use crate::error::Error;
use crate::rt::task::Task;
use crate::rt::{scheduler, Runtime};

/// Spawns a new task running concurrently with other tasks.
///
/// Inside a task, the new task is queued on the same scheduler and recorded
/// as a child of the spawning task. Outside, the thread's entered runtime is
/// used; spawning with no runtime in scope is a caller bug.
///
/// The task body starts synchronously: `spawn` returns after the body's
/// first suspension (or immediate completion).
pub fn spawn<T, F>(future: F) -> Result<Task<T>, Error>
where
    T: 'static,
    F: Future<Output = Result<T, Error>> + 'static,
{
    if let Some((scheduler, _)) = scheduler::context() {
        return Ok(Task::new(&scheduler, future));
    }

    let runtime = Runtime::current()
        .ok_or_else(|| Error::bug("spawn called with no runtime in scope; enter a runtime first"))?;
    Ok(runtime.queue(future))
}

/// Spawns `future` and blocks until it resolves, returning its output.
///
/// Must be called from outside any task (it drives the scheduler); inside a
/// task, `spawn(..)?.join().await` is the non-blocking equivalent.
pub fn run<T, F>(future: F) -> Result<T, Error>
where
    T: Clone + 'static,
    F: Future<Output = Result<T, Error>> + 'static,
{
    spawn(future)?.wait()
}
