//! Per-operation completion event.
//!
//! The synchronous send path parks on this until the completion unit
//! signals it, the deadline passes, or another thread interrupts the
//! wait.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Pending,
    Done,
    Interrupted,
}

/// How a [`Completion::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Interrupted,
}

pub struct Completion {
    signal: Mutex<Signal>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self {
            signal: Mutex::new(Signal::Pending),
            cond: Condvar::new(),
        }
    }

    /// Mark the event done and wake every waiter.
    pub fn complete(&self) {
        *self.signal.lock() = Signal::Done;
        self.cond.notify_all();
    }

    /// Wake waiters with [`WaitOutcome::Interrupted`]. No effect once done.
    pub fn interrupt(&self) {
        let mut signal = self.signal.lock();
        if *signal == Signal::Pending {
            *signal = Signal::Interrupted;
            drop(signal);
            self.cond.notify_all();
        }
    }

    pub fn is_done(&self) -> bool {
        *self.signal.lock() == Signal::Done
    }

    /// Block until done, interrupted, or `timeout` elapses (`None` = forever).
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut signal = self.signal.lock();
        loop {
            match *signal {
                Signal::Done => return WaitOutcome::Completed,
                Signal::Interrupted => {
                    // Consume the interrupt so a later wait parks again.
                    *signal = Signal::Pending;
                    return WaitOutcome::Interrupted;
                }
                Signal::Pending => {}
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut signal, deadline).timed_out()
                        && *signal == Signal::Pending
                    {
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.cond.wait(&mut signal),
            }
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}
