//! Framing errors.
//!
//! A `FrameError` from a decoder means the peer sent something that cannot be
//! parsed: the connection must be closed and no response written. From an
//! encoder it means the message cannot be represented on the wire.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than the message kind requires
    #[error("short {what}: need {needed} bytes, have {available}")]
    ShortFrame {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("unknown op code {0}")]
    UnknownOpCode(i8),

    #[error("unknown error code {0}")]
    UnknownErrorCode(i32),

    #[error("frame length {length} exceeds limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("negative frame length {0}")]
    NegativeLength(i32),

    #[error("master key must be {expected} bytes, got {actual}")]
    InvalidMasterKey { expected: usize, actual: usize },

    #[error("add entry request has no payload")]
    MissingPayload,
}

pub type FrameResult<T> = Result<T, FrameError>;
