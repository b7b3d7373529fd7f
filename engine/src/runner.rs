//! Bounded fan-out/fan-in over independent work items.
//!
//! `run_parallel` feeds items to a fixed pool of worker threads through a
//! channel and waits for all of them. A failing or panicking item is reported
//! in its own slot of the result vector; it never stops the other items.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::unbounded;
use thiserror::Error;
use tracing::{debug, warn};

/// Why an item did not produce a value.
#[derive(Debug, Error)]
pub enum TaskFailure<E> {
    /// The work function returned an error
    #[error("{0}")]
    Failed(E),

    /// The work function panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl<E> TaskFailure<E> {
    pub fn error(&self) -> Option<&E> {
        match self {
            TaskFailure::Failed(e) => Some(e),
            TaskFailure::Panicked(_) => None,
        }
    }
}

pub type TaskOutcome<R, E> = Result<R, TaskFailure<E>>;

/// Effective worker count for a configured limit (0 = available cores).
pub fn effective_limit(limit: usize) -> usize {
    if limit > 0 {
        return limit;
    }
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Run `work` for every item with at most `concurrency_limit` items in flight.
///
/// Returns once every item has finished. Result `i` belongs to item `i`; the
/// order in which items complete is unspecified. A limit of 0 uses the number
/// of available cores.
pub fn run_parallel<T, R, E, F>(items: Vec<T>, concurrency_limit: usize, work: F) -> Vec<TaskOutcome<R, E>>
where
    T: Send,
    R: Send,
    E: Send,
    F: Fn(T) -> Result<R, E> + Sync,
{
    let count = items.len();
    if count == 0 {
        return Vec::new();
    }
    let workers = effective_limit(concurrency_limit).min(count);

    let (job_tx, job_rx) = unbounded::<(usize, T)>();
    let (result_tx, result_rx) = unbounded::<(usize, TaskOutcome<R, E>)>();
    for job in items.into_iter().enumerate() {
        // The receiver is alive until the end of this function
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let execute = |index: usize, item: T| -> TaskOutcome<R, E> {
        match panic::catch_unwind(AssertUnwindSafe(|| work(item))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskFailure::Failed(e)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(index, %message, "task panicked");
                Err(TaskFailure::Panicked(message))
            }
        }
    };

    thread::scope(|scope| {
        let mut spawned = 0;
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let execute = &execute;
            let spawn = thread::Builder::new()
                .name(format!("privxfer-worker-{worker}"))
                .spawn_scoped(scope, move || {
                    for (index, item) in job_rx.iter() {
                        let _ = result_tx.send((index, execute(index, item)));
                    }
                });
            match spawn {
                Ok(_) => spawned += 1,
                Err(e) => warn!(worker, error = %e, "failed to spawn worker thread"),
            }
        }

        if spawned == 0 {
            // No pool available: drain the queue on the calling thread
            for (index, item) in job_rx.iter() {
                let _ = result_tx.send((index, execute(index, item)));
            }
        }
        debug!(items = count, workers = spawned, "parallel run dispatched");
    });
    drop(result_tx);

    let mut slots: Vec<Option<TaskOutcome<R, E>>> = (0..count).map(|_| None).collect();
    for (index, outcome) in result_rx.try_iter() {
        slots[index] = Some(outcome);
    }
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(TaskFailure::Panicked("task was not run".to_string()))))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A `run_parallel` with its concurrency limit fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct ParallelRunner {
    limit: usize,
}

impl ParallelRunner {
    pub fn new(limit: usize) -> Self {
        ParallelRunner { limit }
    }

    pub fn limit(&self) -> usize {
        effective_limit(self.limit)
    }

    pub fn run<T, R, E, F>(&self, items: Vec<T>, work: F) -> Vec<TaskOutcome<R, E>>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        run_parallel(items, self.limit, work)
    }
}
