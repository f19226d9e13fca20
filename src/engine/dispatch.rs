//! Completion dispatcher — worker pool for operation completion units.
//!
//! The receive path must never run caller callbacks or protocol handlers
//! itself: it finalizes a result, queues a completion unit here and
//! returns. A fixed set of worker threads drains the queue.
//!
//! ```text
//!  ┌──────────────┐  queue()   ┌───────────────┐   ┌──────────────────┐
//!  │ Receive path │──────────▶│               │──▶│ worker 0         │
//!  │ Cancel/timer │──────────▶│   job queue   │──▶│ worker 1         │
//!  │ Send failure │──────────▶│               │──▶│ ...              │
//!  └──────────────┘            └───────────────┘   │ callback/handler │
//!                                                  └──────────────────┘
//! ```
//!
//! Queueing never blocks beyond a short lock. No ordering is promised
//! between jobs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// One unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: VecDeque<Job>,
    running: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Fixed-size worker pool.
pub struct Dispatcher {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `workers` threads named `{name}-{i}`.
    pub fn new(name: &str, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("dispatcher needs at least one worker"));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(&worker_shared));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("dispatcher '{}': spawning worker {} failed: {}", name, i, e);
                    // Dropping the partial pool stops the workers already running.
                    drop(Self {
                        shared,
                        workers: handles,
                    });
                    return Err(Error::Config("failed to spawn dispatcher worker"));
                }
            }
        }

        info!("dispatcher '{}' started ({} workers)", name, workers);
        Ok(Self {
            shared,
            workers: handles,
        })
    }

    /// Queue `job` for execution on a worker thread.
    pub fn queue(&self, job: Job) {
        let mut queue = self.shared.queue.lock();
        if !queue.running {
            // Only reachable while the pool itself is being dropped.
            error!("dispatcher: job queued after shutdown, dropping");
            return;
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        if let Some(job) = queue.jobs.pop_front() {
            drop(queue);
            job();
            queue = shared.queue.lock();
        } else if !queue.running {
            break;
        } else {
            shared.available.wait(&mut queue);
        }
    }
    debug!("dispatcher: worker exiting");
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.queue.lock().running = false;
        self.shared.available.notify_all();

        // The last owner may be a job running on one of our own workers.
        let me = std::thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                error!("dispatcher: worker panicked");
            }
        }
    }
}
