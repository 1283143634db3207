//! Fan-out/fan-in over a list of independent closures.

use std::any::Any;
use std::thread;

use crate::core::{GymError, Result};

/// Run every task on its own scoped thread and wait for all of them.
///
/// `results[i]` always belongs to `tasks[i]`, whatever order the threads
/// finish in. A panicking task yields `GymError::Panicked` at its index; the
/// other tasks still run to completion.
pub fn run_all<T, F>(tasks: Vec<F>) -> Vec<Result<T>>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    thread::scope(|scope| {
        let handles: Vec<_> = tasks.into_iter().map(|task| scope.spawn(task)).collect();
        handles
            .into_iter()
            .map(|handle| handle.join().map_err(|payload| GymError::Panicked(panic_message(payload.as_ref()))))
            .collect()
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
