//! Cooperative cancellation for an import run.
//!
//! The run moves through [`RunState`] monotonically:
//!
//! ```text
//! Running ──signal──▶ Draining ──signal──▶ Stopped
//!    │                   │
//!    └──abort──▶ Aborting ◀──abort──┘
//! ```
//!
//! - `Draining`: the producer stops reading and sends the end-of-input
//!   marker; workers finish queued batches; the summary is still flushed.
//! - `Aborting`: a fatal error occurred; everyone stops at the next
//!   checkpoint and nothing more is flushed.
//! - `Stopped`: a second signal; the owner of the signal handler terminates
//!   the process immediately. Pending writes are lost.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Lifecycle state of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RunState {
    /// Normal operation.
    Running = 0,
    /// First signal received: drain in-flight work, admit nothing new.
    Draining = 1,
    /// Fatal error: stop at the next checkpoint.
    Aborting = 2,
    /// Second signal received: terminate immediately.
    Stopped = 3,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            2 => Self::Aborting,
            _ => Self::Stopped,
        }
    }
}

/// Shared cancellation state for one run.
///
/// Transitions only ever move forward; there is no way back to
/// [`RunState::Running`].
///
/// # Examples
///
/// ```
/// use ods_loader::{CancellationController, RunState};
///
/// let controller = CancellationController::new();
/// assert_eq!(controller.signal(), RunState::Draining);
/// assert_eq!(controller.signal(), RunState::Stopped);
/// ```
#[derive(Debug, Default)]
pub struct CancellationController {
    state: AtomicU8,
    signals: AtomicUsize,
}

impl CancellationController {
    /// Creates a controller in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Registers one cancellation signal (for example Ctrl+C).
    ///
    /// The first signal drains; any later one stops. Returns the state after
    /// the transition; a caller seeing [`RunState::Stopped`] is expected to
    /// exit the process.
    pub fn signal(&self) -> RunState {
        let count = self.signals.fetch_add(1, Ordering::SeqCst) + 1;
        let target = if count == 1 {
            RunState::Draining
        } else {
            RunState::Stopped
        };
        self.advance(target)
    }

    /// Moves to [`RunState::Aborting`] after a fatal error.
    pub fn abort(&self) -> RunState {
        self.advance(RunState::Aborting)
    }

    /// Returns how many signals have been received.
    pub fn signal_count(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }

    /// Returns true while no cancellation of any kind has happened.
    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Returns true once new input must no longer be admitted.
    pub fn is_cancelled(&self) -> bool {
        self.state() != RunState::Running
    }

    /// Returns true once in-flight work must be abandoned as well.
    pub fn is_aborting(&self) -> bool {
        self.state() >= RunState::Aborting
    }

    fn advance(&self, target: RunState) -> RunState {
        let previous = self.state.fetch_max(target as u8, Ordering::SeqCst);
        RunState::from_u8(previous.max(target as u8))
    }
}
