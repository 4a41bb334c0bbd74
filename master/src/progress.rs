//! The outcome shape every cycle-driven state machine in this crate returns
//! (§5, §9 "switch-per-state state machines").
//!
//! Every outer and inner FSM in this crate exposes an `advance` method
//! returning `Progress<T>` instead of blocking: the caller (application main
//! loop, or a test harness driving simulated cycles) re-enters next cycle
//! when it sees [`Progress::InProgress`].

use crate::error::MasterError;

/// Advisory delay, in milliseconds, before the caller should re-enter.
/// `0` means "re-enter on the very next cycle".
pub type SleepTimeMs = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    /// The operation needs at least one more cycle.
    InProgress(SleepTimeMs),
    /// The operation finished successfully.
    Done(T),
    /// The operation was cancelled via `cancelActTrans`/Hot-Plug `cancel`.
    Canceled,
    /// The operation failed terminally.
    Failed(MasterError),
}

impl<T> Progress<T> {
    pub const fn in_progress() -> Self {
        Progress::InProgress(0)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Progress::InProgress(_))
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    /// Maps the success payload, leaving other variants untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::InProgress(t) => Progress::InProgress(t),
            Progress::Done(v) => Progress::Done(f(v)),
            Progress::Canceled => Progress::Canceled,
            Progress::Failed(e) => Progress::Failed(e),
        }
    }
}

impl<T> From<MasterError> for Progress<T> {
    fn from(e: MasterError) -> Self {
        Progress::Failed(e)
    }
}
