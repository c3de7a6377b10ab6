//! Bounded worker pool for extraction tasks.
//!
//! Tasks are handed to a fixed set of worker threads through a bounded
//! crossbeam channel, so `submit` blocks once `queue_depth` tasks are
//! waiting. Every task gets exactly one `complete` call from the worker that
//! ran it, whether `run` succeeded, failed or panicked. `drain` waits for all
//! submitted tasks to complete.

use crate::config::PoolConfig;
use crate::error::{IvecdError, Result};
use crossbeam_channel::{Sender, bounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::error;

/// A unit of work for the pool.
pub trait Task: Send + 'static {
    /// Does the work. May run on any worker thread.
    fn run(&mut self) -> Result<()>;

    /// Called once after `run` returns or panics, with its outcome.
    fn complete(self, outcome: Result<()>);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

fn execute<T: Task>(mut task: T) {
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(result) => result,
        Err(payload) => Err(IvecdError::Other(format!(
            "task panicked: {}",
            panic_message(payload.as_ref())
        ))),
    };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.complete(outcome))) {
        error!(
            "ivecd: task completion panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

/// Fixed-size pool of worker threads fed by a bounded queue.
pub struct TaskPool<T: Task> {
    tx: Option<Sender<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Task> TaskPool<T> {
    /// Spawns `config.num_threads` workers with room for `config.queue_depth` waiting tasks.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let num_threads = config.num_threads.max(1);
        let (tx, rx) = bounded::<T>(config.queue_depth.max(1));

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("ivecd-worker-{}", i))
                .spawn(move || {
                    for task in rx.iter() {
                        execute(task);
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers,
        })
    }

    /// Queues `task`, blocking while the queue is full.
    pub fn submit(&self, task: T) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| IvecdError::Other("task pool already drained".to_string()))?;
        tx.send(task)
            .map_err(|_| IvecdError::Other("all task pool workers have exited".to_string()))
    }

    /// Closes the queue and waits until every submitted task has completed.
    pub fn drain(mut self) {
        self.join_all();
    }

    fn join_all(&mut self) {
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                error!(
                    "ivecd: worker thread panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl<T: Task> Drop for TaskPool<T> {
    fn drop(&mut self) {
        self.join_all();
    }
}
