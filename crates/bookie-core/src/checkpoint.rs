//! Index checkpoints in the data directory
//!
//! A checkpoint holds every live entry, written as journal records into
//! `checkpoint-{seq}.dat`. `seq` is the first journal file the checkpoint
//! does NOT cover: recovery loads the newest checkpoint and replays journal
//! files from `seq` on, and journal files below `seq` can be deleted.
//!
//! Files are published with the atomic rename pattern:
//! 1. Write `checkpoint-{seq}.dat.tmp`
//! 2. durable_sync the temp file
//! 3. Rename it to `checkpoint-{seq}.dat`
//! 4. durable_sync the directory
//!
//! A crash before the rename leaves an orphaned temp file and the previous
//! checkpoint intact.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{StorageError, StorageResult};
use crate::format::{serialize_record, JournalRecord};
use crate::journal::{durable_sync, read_record_file};
use crate::key::EntryKey;

const FILE_PREFIX: &str = "checkpoint-";
const FILE_SUFFIX: &str = ".dat";
const TEMP_SUFFIX: &str = ".tmp";

fn checkpoint_file_name(sequence: u64) -> String {
    format!("{}{:016x}{}", FILE_PREFIX, sequence, FILE_SUFFIX)
}

fn parse_sequence(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// The newest published checkpoint in `dir`, if any.
pub fn latest_checkpoint(dir: &Path) -> StorageResult<Option<(u64, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io_at(dir, &e, "failed to read data directory")),
    };

    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io_at(dir, &e, "failed to read directory entry"))?;
        if let Some(seq) = entry.file_name().to_str().and_then(parse_sequence) {
            if latest.as_ref().map_or(true, |(best, _)| seq > *best) {
                latest = Some((seq, entry.path()));
            }
        }
    }
    Ok(latest)
}

pub fn load_checkpoint(path: &Path) -> StorageResult<Vec<JournalRecord>> {
    read_record_file(path)
}

/// Durably publish `entries` as the checkpoint for `sequence`.
pub fn write_checkpoint(dir: &Path, sequence: u64, entries: &[(EntryKey, Bytes)]) -> StorageResult<PathBuf> {
    let final_path = dir.join(checkpoint_file_name(sequence));
    let temp_path = dir.join(format!("{}{}", checkpoint_file_name(sequence), TEMP_SUFFIX));

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| StorageError::io_at(&temp_path, &e, "failed to create checkpoint file"))?;
        let mut writer = BufWriter::new(file);
        for (key, value) in entries {
            // Values were size-checked when they were first journaled
            let record = serialize_record(key, value, usize::MAX)?;
            writer
                .write_all(&record)
                .map_err(|e| StorageError::io_at(&temp_path, &e, "checkpoint write failed"))?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::io_at(&temp_path, e.error(), "checkpoint flush failed"))?;
        durable_sync(&file).map_err(|e| StorageError::io_at(&temp_path, &e, "checkpoint sync failed"))?;
    }

    fs::rename(&temp_path, &final_path)
        .map_err(|e| StorageError::io_at(&final_path, &e, "failed to publish checkpoint"))?;
    sync_dir(dir)?;
    Ok(final_path)
}

/// Delete checkpoints older than `sequence` and any orphaned temp files.
pub fn remove_stale_checkpoints(dir: &Path, sequence: u64) -> StorageResult<usize> {
    let entries = fs::read_dir(dir).map_err(|e| StorageError::io_at(dir, &e, "failed to read data directory"))?;
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io_at(dir, &e, "failed to read directory entry"))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stale = match parse_sequence(name) {
            Some(seq) => seq < sequence,
            None => name.starts_with(FILE_PREFIX) && name.ends_with(TEMP_SUFFIX),
        };
        if stale {
            let path = entry.path();
            fs::remove_file(&path).map_err(|e| StorageError::io_at(&path, &e, "failed to remove checkpoint"))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn sync_dir(dir: &Path) -> StorageResult<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir).map_err(|e| StorageError::io_at(dir, &e, "failed to open directory for sync"))?;
        durable_sync(&handle).map_err(|e| StorageError::io_at(dir, &e, "directory sync failed"))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries() -> Vec<(EntryKey, Bytes)> {
        vec![
            (EntryKey::new(1, 0), Bytes::from_static(b"a")),
            (EntryKey::new(1, 1), Bytes::from_static(b"")),
            (EntryKey::new(2, 5), Bytes::from(vec![9u8; 4096])),
        ]
    }

    #[test]
    fn test_write_then_load() {
        let temp = TempDir::new().unwrap();
        let path = write_checkpoint(temp.path(), 3, &entries()).unwrap();
        assert_eq!(path, temp.path().join(checkpoint_file_name(3)));

        let records = load_checkpoint(&path).unwrap();
        let loaded: Vec<(EntryKey, Bytes)> = records.into_iter().map(|r| (r.key, r.value)).collect();
        assert_eq!(loaded, entries());
    }

    #[test]
    fn test_latest_picks_highest_sequence() {
        let temp = TempDir::new().unwrap();
        assert_eq!(latest_checkpoint(temp.path()).unwrap(), None);
        assert_eq!(latest_checkpoint(&temp.path().join("missing")).unwrap(), None);

        write_checkpoint(temp.path(), 2, &entries()).unwrap();
        write_checkpoint(temp.path(), 10, &[]).unwrap();
        let (seq, _) = latest_checkpoint(temp.path()).unwrap().unwrap();
        assert_eq!(seq, 10);
    }

    #[test]
    fn test_orphaned_temp_file_is_ignored_then_removed() {
        let temp = TempDir::new().unwrap();
        write_checkpoint(temp.path(), 1, &entries()).unwrap();
        let orphan = temp.path().join(format!("{}{}", checkpoint_file_name(4), TEMP_SUFFIX));
        fs::write(&orphan, b"partial").unwrap();

        assert_eq!(latest_checkpoint(temp.path()).unwrap().unwrap().0, 1);

        write_checkpoint(temp.path(), 5, &[]).unwrap();
        assert_eq!(remove_stale_checkpoints(temp.path(), 5).unwrap(), 2);
        assert!(!orphan.exists());
        assert!(temp.path().join(checkpoint_file_name(5)).exists());
    }
}
