//! Entry keys.
//!
//! An entry is addressed by `(ledger_id, entry_id)`. On disk and in the
//! journal the key is 16 bytes, big-endian, ledger first, so raw byte order
//! groups entries by ledger and orders them by non-negative entry id within it.

use bytes::{Buf, BufMut};

/// Encoded key length in bytes.
pub const ENTRY_KEY_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub ledger_id: i64,
    pub entry_id: i64,
}

impl EntryKey {
    pub fn new(ledger_id: i64, entry_id: i64) -> Self {
        EntryKey { ledger_id, entry_id }
    }

    pub fn encode<B: BufMut + ?Sized>(self, buf: &mut B) {
        buf.put_i64(self.ledger_id);
        buf.put_i64(self.entry_id);
    }

    pub fn to_bytes(self) -> [u8; ENTRY_KEY_LENGTH] {
        let mut buffer = [0; ENTRY_KEY_LENGTH];
        let mut slice = &mut buffer[..];
        self.encode(&mut slice);
        buffer
    }

    /// Decode from the first 16 bytes of `data`. Returns `None` if fewer are available.
    pub fn from_slice(mut data: &[u8]) -> Option<Self> {
        if data.len() < ENTRY_KEY_LENGTH {
            return None;
        }
        let ledger_id = data.get_i64();
        let entry_id = data.get_i64();
        Some(EntryKey { ledger_id, entry_id })
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.ledger_id, self.entry_id)
    }
}
