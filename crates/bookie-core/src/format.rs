//! Binary format of journal records
//!
//! Every journal record is a fixed header followed by its payload:
//!
//! ```text
//! RecordHeader (16 bytes) + ledger_id (i64 BE) + entry_id (i64 BE) + value bytes
//! ```
//!
//! The payload starts with the encoded `EntryKey`, so a record carries the
//! same 16-byte key the RAM index is sorted by.

use std::path::PathBuf;

use bytes::Bytes;

use crate::error::{StorageError, StorageResult};
use crate::key::{EntryKey, ENTRY_KEY_LENGTH};

/// Magic bytes identifying journal records: "BKJR"
pub const MAGIC_ARRAY: [u8; 4] = *b"BKJR";

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Fixed-size header for each journal record
///
/// Layout:
///   [0..4]   magic:    [u8;4] - "BKJR"
///   [4..8]   length:   u32 LE - payload length in bytes
///   [8..12]  checksum: u32 LE - CRC32C of payload bytes
///   [12..16] reserved: must be zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub length: u32,
    pub checksum: u32,
}

impl RecordHeader {
    pub fn new(length: u32, checksum: u32) -> Self {
        Self { magic: MAGIC_ARRAY, length, checksum }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

/// A decoded journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub key: EntryKey,
    pub value: Bytes,
}

/// Serialize an entry into a complete journal record.
pub fn serialize_record(key: &EntryKey, value: &[u8], max_value_size: usize) -> StorageResult<Vec<u8>> {
    // Size check happens before any allocation
    if value.len() > max_value_size {
        return Err(StorageError::OversizedEntry {
            entry_size: value.len() as u64,
            max_size: max_value_size as u64,
        });
    }

    let payload_size = ENTRY_KEY_LENGTH + value.len();
    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload_size);
    buffer.extend_from_slice(&[0u8; HEADER_SIZE]);
    key.encode(&mut buffer);
    buffer.extend_from_slice(value);

    let checksum = crc32c::crc32c(&buffer[HEADER_SIZE..]);
    let header = RecordHeader::new(payload_size as u32, checksum);
    buffer[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    Ok(buffer)
}

/// Deserialize one journal record from the start of `data`.
///
/// `data` must hold at least the full record; trailing bytes are ignored.
pub fn deserialize_record(data: &[u8]) -> StorageResult<JournalRecord> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    match data.get(..HEADER_SIZE) {
        Some(slice) => header_bytes.copy_from_slice(slice),
        None => return Err(corrupted(0, format!("record too short: {} bytes", data.len()))),
    }
    let header = RecordHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(corrupted(0, format!("bad magic {:02x?}", header.magic)));
    }
    if header_bytes[12..HEADER_SIZE] != [0u8; 4] {
        return Err(corrupted(12, format!("reserved bytes set {:02x?}", &header_bytes[12..HEADER_SIZE])));
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    let payload = match data.get(HEADER_SIZE..payload_end) {
        Some(payload) => payload,
        None => {
            return Err(corrupted(
                HEADER_SIZE as u64,
                format!("torn record: need {} payload bytes, have {}", header.length, data.len() - HEADER_SIZE),
            ))
        }
    };

    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(StorageError::ChecksumMismatch {
            path: PathBuf::from("<buffer>"),
            expected: header.checksum,
            actual: computed,
            offset: HEADER_SIZE as u64,
        });
    }

    let key = EntryKey::from_slice(payload)
        .ok_or_else(|| corrupted(HEADER_SIZE as u64, "payload shorter than entry key".to_string()))?;

    Ok(JournalRecord {
        key,
        value: Bytes::copy_from_slice(&payload[ENTRY_KEY_LENGTH..]),
    })
}

fn corrupted(offset: u64, reason: String) -> StorageError {
    StorageError::JournalCorrupted {
        path: PathBuf::from("<buffer>"),
        offset,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let key = EntryKey::new(3, 17);
        let record = serialize_record(&key, b"entry payload", MAX).unwrap();
        assert_eq!(record.len(), HEADER_SIZE + ENTRY_KEY_LENGTH + 13);

        let decoded = deserialize_record(&record).unwrap();
        assert_eq!(decoded.key, key);
        assert_eq!(&decoded.value[..], b"entry payload");
    }

    #[test]
    fn test_payload_begins_with_big_endian_key() {
        let key = EntryKey::new(1, 2);
        let record = serialize_record(&key, b"", MAX).unwrap();
        assert_eq!(&record[HEADER_SIZE..], &key.to_bytes());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let value = vec![0u8; MAX + 1];
        let result = serialize_record(&EntryKey::new(1, 1), &value, MAX);
        assert!(matches!(result, Err(StorageError::OversizedEntry { entry_size, .. }) if entry_size == (MAX + 1) as u64));
    }

    #[test]
    fn test_value_at_limit_accepted() {
        let value = vec![0x41u8; MAX];
        assert!(serialize_record(&EntryKey::new(1, 1), &value, MAX).is_ok());
    }

    #[test]
    fn test_corrupted_magic_detected() {
        let mut data = serialize_record(&EntryKey::new(1, 1), b"value", MAX).unwrap();
        data[0] = 0xFF;
        assert!(matches!(deserialize_record(&data), Err(StorageError::JournalCorrupted { .. })));
    }

    #[test]
    fn test_reserved_bytes_must_be_zero() {
        let mut data = serialize_record(&EntryKey::new(1, 1), b"value", MAX).unwrap();
        assert_eq!(&data[12..HEADER_SIZE], &[0u8; 4]);
        data[14] = 1;
        assert!(matches!(
            deserialize_record(&data),
            Err(StorageError::JournalCorrupted { offset: 12, .. })
        ));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut data = serialize_record(&EntryKey::new(1, 1), b"value", MAX).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(matches!(deserialize_record(&data), Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_torn_record_detected() {
        let data = serialize_record(&EntryKey::new(1, 1), b"value", MAX).unwrap();
        let torn = &data[..data.len() - 2];
        assert!(matches!(deserialize_record(torn), Err(StorageError::JournalCorrupted { .. })));
    }
}
