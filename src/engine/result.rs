//! Sticky operation result.
//!
//! ```text
//!   Unset ──begin()──▶ InProgress ──finish(s)──▶ Final(s)
//!                                     ▲
//!               response · send failure · cancel · timeout
//!               (first writer wins, the rest are ignored)
//! ```
//!
//! `Unset` is a dedicated variant rather than a reserved status value,
//! so "never set" cannot be confused with any real outcome. Invalid
//! writes (a second `begin`, or writing `Unset`) are logged and turned
//! into a `Final(Malfunction)` write that still obeys first-writer-wins.

use log::error;
use parking_lot::Mutex;

use super::status::Status;

/// Observable state of a [`StickyResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    /// Initial state; nothing has been sent or received yet.
    Unset,
    /// Request handed to the transport (or dispatched to a handler).
    InProgress,
    /// Terminal result.
    Final(Status),
}

impl ResultState {
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Final(_))
    }

    /// The final status, if the result has been set.
    pub const fn status(self) -> Option<Status> {
        match self {
            Self::Final(s) => Some(s),
            _ => None,
        }
    }
}

/// What a write did to the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Transition {
    /// `Unset → InProgress`.
    Started,
    /// This write produced the final result. The writer owns completion.
    Finalized,
    /// Someone else got there first; nothing changed.
    Ignored,
}

impl Transition {
    pub const fn won(self) -> bool {
        matches!(self, Self::Finalized)
    }
}

/// One-shot, first-writer-wins result cell.
pub struct StickyResult {
    state: Mutex<ResultState>,
}

impl StickyResult {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ResultState::Unset),
        }
    }

    pub fn get(&self) -> ResultState {
        *self.state.lock()
    }

    /// Request the given state.
    pub fn set(&self, next: ResultState) -> Transition {
        let mut state = self.state.lock();
        match next {
            ResultState::InProgress => {
                if *state == ResultState::Unset {
                    *state = ResultState::InProgress;
                    return Transition::Started;
                }
                error!("result: in-progress set twice (was {:?})", *state);
                Self::finalize(&mut state, Status::Malfunction)
            }
            ResultState::Unset => {
                error!("result: attempt to reset to unset (was {:?})", *state);
                Self::finalize(&mut state, Status::Malfunction)
            }
            ResultState::Final(status) => Self::finalize(&mut state, status),
        }
    }

    /// `Unset → InProgress`.
    pub fn begin(&self) -> Transition {
        self.set(ResultState::InProgress)
    }

    /// `InProgress → Final(status)`, if nobody has finalized yet.
    pub fn finish(&self, status: Status) -> Transition {
        self.set(ResultState::Final(status))
    }

    fn finalize(state: &mut ResultState, status: Status) -> Transition {
        if *state == ResultState::InProgress {
            *state = ResultState::Final(status);
            Transition::Finalized
        } else {
            Transition::Ignored
        }
    }
}

impl Default for StickyResult {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for StickyResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("StickyResult").field(&self.get()).finish()
    }
}
