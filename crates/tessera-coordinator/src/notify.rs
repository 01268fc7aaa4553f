//! Fire-and-forget worker pool for placement notifications.
//!
//! Each worker owns a bounded `ArrayQueue` inbox and runs jobs in arrival
//! order on its own named thread. Jobs are spread round-robin. A full
//! inbox does not block the submitter: the job runs on a detached thread
//! instead and a warning is logged.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use tessera_config::CoordinatorConfig;
use tracing::warn;

use crate::error::{CoordinatorError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Request {
    Run(Job),
    Shutdown,
}

/// Upper bound on how long an idle worker sleeps before rechecking its inbox.
const IDLE_PARK: Duration = Duration::from_millis(50);

struct Worker {
    inbox: Arc<ArrayQueue<Request>>,
    thread: Thread,
    handle: Option<JoinHandle<()>>,
}

/// Bounded pool of notification workers.
///
/// Dropping the pool drains every inbox and joins the workers.
pub struct NotifyPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
}

impl NotifyPool {
    /// Spawns `config.notify_workers` workers, each with an inbox of
    /// `config.notify_queue_capacity` jobs.
    pub fn new(config: &CoordinatorConfig) -> Result<Self> {
        let count = config.notify_workers.max(1);
        let capacity = config.notify_queue_capacity.max(1);

        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let inbox = Arc::new(ArrayQueue::new(capacity));
            let worker_inbox = Arc::clone(&inbox);
            let handle = thread::Builder::new()
                .name(format!("tessera-notify-{id}"))
                .spawn(move || worker_loop(&worker_inbox))
                .map_err(CoordinatorError::Spawn)?;
            workers.push(Worker {
                inbox,
                thread: handle.thread().clone(),
                handle: Some(handle),
            });
        }

        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job` on the next worker.
    ///
    /// Returns `false` when that worker's inbox was full and the job was
    /// handed to a detached thread.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[index];
        match worker.inbox.push(Request::Run(Box::new(job))) {
            Ok(()) => {
                worker.thread.unpark();
                true
            }
            Err(request) => {
                warn!(worker = index, "notification inbox full, running detached");
                let Request::Run(job) = request else {
                    return false;
                };
                run_detached(job);
                false
            }
        }
    }

    /// Stops every worker after it drains its inbox, then joins them.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            if worker.handle.is_none() {
                continue;
            }
            let mut request = Request::Shutdown;
            while let Err(back) = worker.inbox.push(request) {
                request = back;
                worker.thread.unpark();
                thread::yield_now();
            }
            worker.thread.unpark();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for NotifyPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NotifyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

fn worker_loop(inbox: &ArrayQueue<Request>) {
    loop {
        match inbox.pop() {
            Some(Request::Run(job)) => run_guarded(job),
            Some(Request::Shutdown) => break,
            None => thread::park_timeout(IDLE_PARK),
        }
    }
}

/// Runs a job, logging instead of unwinding the worker if it panics.
fn run_guarded(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        warn!("notification job panicked");
    }
}

fn run_detached(job: Job) {
    // Shared so the job survives a failed spawn.
    let slot = Arc::new(Mutex::new(Some(job)));
    let thread_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name("tessera-notify-overflow".to_string())
        .spawn(move || {
            if let Some(job) = thread_slot.lock().take() {
                run_guarded(job);
            }
        });
    if let Err(error) = spawned {
        warn!(%error, "overflow thread spawn failed, running inline");
        if let Some(job) = slot.lock().take() {
            run_guarded(job);
        }
    }
}
