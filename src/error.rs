//! Library error type.
//!
//! Tracking failure is never an error: the tracker reports it through its
//! state machine and callers poll the state. Errors here cover recoverable
//! I/O and configuration problems only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdgetrackError {
    #[error("classifier database archive is corrupt: {0}")]
    CorruptDatabase(String),

    #[error("database magic marker mismatch (expected {expected:?})")]
    BadMagic { expected: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("component is not valid (load a model/database first)")]
    NotValid,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EdgetrackError>;
