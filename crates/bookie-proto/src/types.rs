//! Requests, responses and wire error codes.

use std::fmt;

use bytes::Bytes;

use bookie_core::EntryKey;

use crate::error::{FrameError, FrameResult};
use crate::header::{OpCode, CURRENT_PROTOCOL_VERSION, FLAG_FENCING};

/// Result codes carried by add and read responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    NoLedger = 1,
    NoEntry = 2,
    BadRequest = 100,
    Io = 101,
    Unauthorized = 102,
    BadVersion = 103,
    Fenced = 104,
    ReadOnly = 105,
    TooManyRequests = 106,
}

impl ErrorCode {
    pub fn from_code(code: i32) -> FrameResult<Self> {
        Ok(match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::NoLedger,
            2 => ErrorCode::NoEntry,
            100 => ErrorCode::BadRequest,
            101 => ErrorCode::Io,
            102 => ErrorCode::Unauthorized,
            103 => ErrorCode::BadVersion,
            104 => ErrorCode::Fenced,
            105 => ErrorCode::ReadOnly,
            106 => ErrorCode::TooManyRequests,
            other => return Err(FrameError::UnknownErrorCode(other)),
        })
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub protocol_version: i8,
    pub op_code: OpCode,
    pub flags: i16,
    pub ledger_id: i64,
    pub entry_id: i64,
    /// Fixed-length authentication block; empty when the op carries none.
    pub master_key: Bytes,
    pub data: Option<Bytes>,
}

impl Request {
    pub fn add_entry(ledger_id: i64, entry_id: i64, master_key: Bytes, data: Bytes) -> Self {
        Self {
            protocol_version: CURRENT_PROTOCOL_VERSION,
            op_code: OpCode::AddEntry,
            flags: 0,
            ledger_id,
            entry_id,
            master_key,
            data: Some(data),
        }
    }

    pub fn read_entry(ledger_id: i64, entry_id: i64) -> Self {
        Self {
            protocol_version: CURRENT_PROTOCOL_VERSION,
            op_code: OpCode::ReadEntry,
            flags: 0,
            ledger_id,
            entry_id,
            master_key: Bytes::new(),
            data: None,
        }
    }

    pub fn fencing_read(ledger_id: i64, entry_id: i64, master_key: Bytes) -> Self {
        Self {
            flags: FLAG_FENCING,
            master_key,
            ..Self::read_entry(ledger_id, entry_id)
        }
    }

    pub fn auth() -> Self {
        Self {
            op_code: OpCode::Auth,
            ..Self::read_entry(0, 0)
        }
    }

    pub fn is_fencing(&self) -> bool {
        self.flags & FLAG_FENCING != 0
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.ledger_id, self.entry_id)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}(v{} ledger={} entry={} flags={:#06x} data_len={})",
            self.op_code,
            self.protocol_version,
            self.ledger_id,
            self.entry_id,
            self.flags,
            self.data.as_ref().map_or(0, |d| d.len())
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub protocol_version: i8,
    pub op_code: OpCode,
    pub error_code: ErrorCode,
    pub ledger_id: i64,
    pub entry_id: i64,
    pub data: Option<Bytes>,
}

impl Response {
    /// A response echoing the request's version, op code and entry.
    pub fn for_request(request: &Request, error_code: ErrorCode) -> Self {
        Self {
            protocol_version: request.protocol_version,
            op_code: request.op_code,
            error_code,
            ledger_id: request.ledger_id,
            entry_id: request.entry_id,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}(v{} {:?} ledger={} entry={} data_len={})",
            self.op_code,
            self.protocol_version,
            self.error_code,
            self.ledger_id,
            self.entry_id,
            self.data.as_ref().map_or(0, |d| d.len())
        )
    }
}
