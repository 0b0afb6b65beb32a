//! Packed V2 frame header.
//!
//! Every frame body starts with one big-endian 32-bit word:
//!
//! ```text
//!  31       24 23       16 15                      0
//! +-----------+-----------+-------------------------+
//! |  version  |  op code  |          flags          |
//! +-----------+-----------+-------------------------+
//! ```
//!
//! Only flag bit 0 (fencing, read requests) is defined.

use crate::error::{FrameError, FrameResult};

/// Size of the packed header on the wire.
pub const HEADER_LENGTH: usize = 4;

/// Protocol version written by this node.
pub const CURRENT_PROTOCOL_VERSION: i8 = 2;

/// Read request must be authenticated and may fence the ledger.
pub const FLAG_FENCING: i16 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum OpCode {
    AddEntry = 1,
    ReadEntry = 2,
    Auth = 3,
}

impl OpCode {
    pub fn from_i8(value: i8) -> FrameResult<Self> {
        match value {
            1 => Ok(OpCode::AddEntry),
            2 => Ok(OpCode::ReadEntry),
            3 => Ok(OpCode::Auth),
            other => Err(FrameError::UnknownOpCode(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: i8,
    pub op_code: OpCode,
    pub flags: i16,
}

impl PacketHeader {
    pub fn new(version: i8, op_code: OpCode, flags: i16) -> Self {
        Self { version, op_code, flags }
    }

    pub fn to_int(self) -> i32 {
        pack(self.version, self.op_code as i8, self.flags)
    }

    /// Unpack a header word; an op code outside the known set is an error.
    pub fn from_int(value: i32) -> FrameResult<Self> {
        let (version, op_code, flags) = unpack(value);
        Ok(Self { version, op_code: OpCode::from_i8(op_code)?, flags })
    }

    pub fn is_fencing(self) -> bool {
        self.flags & FLAG_FENCING != 0
    }
}

/// `version:8 | op_code:8 | flags:16`, most significant first.
pub fn pack(version: i8, op_code: i8, flags: i16) -> i32 {
    (((version as u8 as u32) << 24) | ((op_code as u8 as u32) << 16) | (flags as u16 as u32)) as i32
}

/// Inverse of `pack`; no validation.
pub fn unpack(value: i32) -> (i8, i8, i16) {
    let bits = value as u32;
    ((bits >> 24) as u8 as i8, (bits >> 16) as u8 as i8, bits as u16 as i16)
}
