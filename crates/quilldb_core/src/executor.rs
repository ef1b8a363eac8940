//! Serialized operation queue.
//!
//! The executor owns the datastore's mutable state on a dedicated worker
//! thread and runs submitted operations one at a time, in submission order.
//! This is the single-writer guarantee: no two operations ever observe the
//! state concurrently, and an operation that fails leaves the queue intact
//! for the next one.
//!
//! The queue starts in **buffer mode**: jobs are accepted but held until a
//! *forced* job (the datastore's initial load) has run, after which the
//! buffer drains in submission order and the queue goes live. Callers block
//! on a per-job result channel, so submissions made during buffer mode
//! simply wait for the load to finish.

use crate::error::{DbError, DbResult};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::thread::JoinHandle;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Envelope<S> {
    Run { job: Job<S>, forced: bool },
    Shutdown,
}

/// A FIFO executor owning state `S` on a worker thread.
pub struct Executor<S> {
    sender: Sender<Envelope<S>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> Executor<S> {
    /// Spawns the worker thread, transferring ownership of `state` to it.
    pub fn new(state: S) -> Self {
        let (sender, receiver) = unbounded();
        let worker = std::thread::Builder::new()
            .name("quilldb-executor".to_string())
            .spawn(move || run_worker(state, receiver))
            .ok();
        Self { sender, worker }
    }

    /// Runs an operation on the worker and blocks for its result.
    ///
    /// `forced` jobs bypass buffer mode; the first forced job to complete
    /// flips the queue live and drains the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] when the worker has shut down, in
    /// addition to whatever the operation itself returns.
    pub fn submit<T, F>(&self, forced: bool, operation: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> DbResult<T> + Send + 'static,
    {
        let (reply, result) = bounded(1);
        let job: Job<S> = Box::new(move |state| {
            let _ = reply.send(operation(state));
        });
        if self.sender.send(Envelope::Run { job, forced }).is_err() {
            return Err(DbError::Closed);
        }
        result.recv().unwrap_or(Err(DbError::Closed))
    }
}

impl<S> Drop for Executor<S> {
    fn drop(&mut self) {
        let _ = self.sender.send(Envelope::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker<S>(mut state: S, receiver: Receiver<Envelope<S>>) {
    let mut live = false;
    let mut buffer: VecDeque<Job<S>> = VecDeque::new();

    for envelope in receiver {
        match envelope {
            Envelope::Run { job, forced } => {
                if forced {
                    job(&mut state);
                    live = true;
                    while let Some(buffered) = buffer.pop_front() {
                        buffered(&mut state);
                    }
                } else if live {
                    job(&mut state);
                } else {
                    buffer.push_back(job);
                }
            }
            Envelope::Shutdown => break,
        }
    }
}
