//! Length-prefixed framing.
//!
//! On the wire every frame is `[length: i32 BE][body]`, where `length` counts
//! the body only. Transports feed received bytes into a `BytesMut` and call
//! `take_frame` until it returns `None`; each body it yields goes to a
//! decoder. Bodies are split off the buffer without copying.

use bytes::{Buf, Bytes, BytesMut};

use bookie_core::Config;

use crate::error::{FrameError, FrameResult};
use crate::header::HEADER_LENGTH;

/// Size of the length prefix.
pub const LENGTH_FIELD: usize = 4;

/// ledger_id + entry_id
pub const ENTRY_ID_FIELDS: usize = 16;

/// error_code + ledger_id + entry_id
pub const RESPONSE_FIXED_BODY: usize = 4 + ENTRY_ID_FIELDS;

/// Largest body the signed length prefix can describe.
pub const MAX_WIRE_FRAME_LENGTH: usize = i32::MAX as usize;

/// Process-wide wire constants shared by the server and client codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub master_key_length: usize,
    pub max_frame_length: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        let master_key_length = bookie_core::config::DEFAULT_MASTER_KEY_LENGTH;
        Self {
            master_key_length,
            max_frame_length: HEADER_LENGTH + master_key_length + ENTRY_ID_FIELDS + 5 * 1024 * 1024,
        }
    }
}

impl CodecConfig {
    /// `max_frame_length` capped at what the length prefix can carry.
    pub fn frame_limit(&self) -> usize {
        self.max_frame_length.min(MAX_WIRE_FRAME_LENGTH)
    }

    /// Frames large enough for the largest entry the storage will accept.
    pub fn from_storage_config(config: &Config) -> Self {
        Self {
            master_key_length: config.master_key_length,
            max_frame_length: HEADER_LENGTH + config.master_key_length + ENTRY_ID_FIELDS + config.max_value_size,
        }
    }
}

/// Fail with `ShortFrame` unless `frame` still holds `needed` bytes.
pub(crate) fn ensure(frame: &Bytes, needed: usize, what: &'static str) -> FrameResult<()> {
    if frame.remaining() < needed {
        return Err(FrameError::ShortFrame { what, needed, available: frame.remaining() });
    }
    Ok(())
}

/// Split the next complete frame body off `buf`.
///
/// Returns `Ok(None)` until a whole frame has arrived. A negative or
/// oversized length is an error; the connection should be closed.
pub fn take_frame(buf: &mut BytesMut, max_frame_length: usize) -> FrameResult<Option<Bytes>> {
    if buf.len() < LENGTH_FIELD {
        return Ok(None);
    }

    let declared = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if declared < 0 {
        return Err(FrameError::NegativeLength(declared));
    }
    let length = declared as usize;
    if length > max_frame_length {
        return Err(FrameError::FrameTooLarge { length, limit: max_frame_length });
    }

    if buf.len() < LENGTH_FIELD + length {
        buf.reserve(LENGTH_FIELD + length - buf.len());
        return Ok(None);
    }

    buf.advance(LENGTH_FIELD);
    Ok(Some(buf.split_to(length).freeze()))
}
