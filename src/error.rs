use thiserror::Error;

use crate::timer::TimerEventKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("a session is already active")]
    AlreadyActive,

    #[error("no active session")]
    NoActiveSession,

    /// Raised by an observer. Logged by the dispatcher, never returned to callers.
    #[error("handler for {kind} failed: {message}")]
    HandlerFailure {
        kind: TimerEventKind,
        message: String,
    },

    /// Unexpected failure inside a ticker iteration. Logged, never returned to callers.
    #[error("timer loop fault: {0}")]
    LoopFault(String),
}

pub type TimerResult<T> = Result<T, TimerError>;
