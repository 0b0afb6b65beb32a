//! Journal files for the entry store
//!
//! Writes are appended to the current journal file without syncing. Durability
//! comes from `JournalWriter::sync`, which the storage layer calls once per
//! batch of appended entries (group commit). On startup `JournalReader`
//! replays every journal file in sequence order to rebuild the entry index.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{StorageError, StorageResult};
use crate::format::{deserialize_record, serialize_record, JournalRecord, HEADER_SIZE, MAGIC_ARRAY};
use crate::key::EntryKey;

const FILE_PREFIX: &str = "journal-";
const FILE_SUFFIX: &str = ".log";

fn journal_file_name(sequence: u64) -> String {
    format!("{}{:016x}{}", FILE_PREFIX, sequence, FILE_SUFFIX)
}

fn parse_sequence(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// Flush file data to persistent media.
///
/// Linux uses fdatasync (metadata is not needed to replay the journal), macOS
/// needs F_FULLFSYNC to get past the drive cache, everything else falls back
/// to `File::sync_data`.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File`.
        let result = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File`.
        let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
    {
        file.sync_data()
    }
}

/// Appends journal records and syncs them on request.
pub struct JournalWriter {
    file: File,
    path: PathBuf,
    size: u64,
    dir: PathBuf,
    sequence: u64,
    rotation_bytes: u64,
    max_value_size: usize,
}

impl JournalWriter {
    /// Open the journal in `dir`.
    ///
    /// An empty highest-numbered file is reused. A non-empty one may end in a
    /// torn record, so writing starts in the next file instead: records
    /// appended after a torn tail would be unreachable on replay. Sequences
    /// below `first_sequence` are never written.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        first_sequence: u64,
        rotation_bytes: u64,
        max_value_size: usize,
    ) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StorageError::io_at(&dir, &e, "failed to create journal directory"))?;

        let sequence = match list_journal_files(&dir)?.pop() {
            Some((last, path)) => {
                let existing = std::fs::metadata(&path)
                    .map_err(|e| StorageError::io_at(&path, &e, "failed to stat journal file"))?
                    .len();
                if existing == 0 {
                    last
                } else {
                    last + 1
                }
            }
            None => 0,
        }
        .max(first_sequence);

        let path = dir.join(journal_file_name(sequence));
        let file = Self::open_file(&path)?;
        let size = file
            .metadata()
            .map_err(|e| StorageError::io_at(&path, &e, "failed to stat journal file"))?
            .len();

        Ok(Self { file, path, size, dir, sequence, rotation_bytes, max_value_size })
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StorageError::io_at(path, &e, "failed to open journal file"))
    }

    /// Append a record without syncing. The record is in the OS page cache
    /// once this returns; call `sync` to make it durable.
    pub fn append(&mut self, key: &EntryKey, value: &[u8]) -> StorageResult<()> {
        let record = serialize_record(key, value, self.max_value_size)?;

        if self.size > 0 && self.size + record.len() as u64 > self.rotation_bytes {
            self.roll()?;
        }

        self.file
            .write_all(&record)
            .map_err(|e| StorageError::io_at(&self.path, &e, "journal write failed"))?;
        self.size += record.len() as u64;
        Ok(())
    }

    /// Make every record appended so far durable.
    pub fn sync(&self) -> StorageResult<()> {
        durable_sync(&self.file).map_err(|e| StorageError::io_at(&self.path, &e, "journal sync failed"))
    }

    /// Switch to a new journal file and return its sequence. The current file
    /// is synced first so nothing appended before the switch is left behind
    /// unsynced.
    pub fn roll(&mut self) -> StorageResult<u64> {
        self.sync()?;

        let sequence = self.sequence + 1;
        let new_path = self.dir.join(journal_file_name(sequence));
        self.file = Self::open_file(&new_path)?;
        self.sequence = sequence;
        self.path = new_path;
        self.size = 0;
        info!("event=journal_rotated path={}", self.path.display());
        Ok(sequence)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn current_size(&self) -> u64 {
        self.size
    }
}

/// Replays journal files for recovery.
pub struct JournalReader {
    dir: PathBuf,
}

impl JournalReader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    /// Recover all records from every journal file, oldest file first.
    pub fn recover_records(&self) -> StorageResult<Vec<JournalRecord>> {
        self.recover_records_from(0)
    }

    /// Recover records from journal files numbered `first_sequence` or higher.
    pub fn recover_records_from(&self, first_sequence: u64) -> StorageResult<Vec<JournalRecord>> {
        let mut records = Vec::new();
        for (sequence, path) in list_journal_files(&self.dir)? {
            if sequence >= first_sequence {
                records.extend(read_record_file(&path)?);
            }
        }
        Ok(records)
    }
}

/// Journal files in `dir`, sorted by sequence. A missing directory is empty.
fn list_journal_files(dir: &Path) -> StorageResult<Vec<(u64, PathBuf)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io_at(dir, &e, "failed to read journal directory")),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io_at(dir, &e, "failed to read directory entry"))?;
        if let Some(seq) = entry.file_name().to_str().and_then(parse_sequence) {
            files.push((seq, entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

/// Delete journal files numbered below `sequence`. Returns how many went.
pub fn remove_journal_files_before(dir: &Path, sequence: u64) -> StorageResult<usize> {
    let mut removed = 0;
    for (seq, path) in list_journal_files(dir)? {
        if seq >= sequence {
            break;
        }
        std::fs::remove_file(&path).map_err(|e| StorageError::io_at(&path, &e, "failed to remove journal file"))?;
        removed += 1;
    }
    Ok(removed)
}

/// Read every record in one file of journal records.
///
/// A bad magic or checksum skips forward to the next magic; an incomplete
/// record at the end of the file is the crash point and ends the scan.
pub(crate) fn read_record_file(path: &Path) -> StorageResult<Vec<JournalRecord>> {
    let mut buffer = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut buffer))
        .map_err(|e| StorageError::io_at(path, &e, "failed to read journal file"))?;

    let mut records = Vec::new();
    let mut offset = 0;

    while offset + HEADER_SIZE <= buffer.len() {
        if buffer[offset..offset + 4] != MAGIC_ARRAY {
            warn!("event=journal_bad_magic path={} offset={}", path.display(), offset);
            match find_next_magic(&buffer, offset + 1) {
                Some(next) => {
                    offset = next;
                    continue;
                }
                None => break,
            }
        }

        let length = u32::from_le_bytes([
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        ]) as usize;
        let total = HEADER_SIZE + length;

        if offset + total > buffer.len() {
            warn!(
                "event=journal_torn_tail path={} offset={} need={} have={}",
                path.display(),
                offset,
                total,
                buffer.len() - offset
            );
            break;
        }

        match deserialize_record(&buffer[offset..offset + total]) {
            Ok(record) => {
                records.push(record);
                offset += total;
            }
            Err(e) => {
                warn!("event=journal_corrupt_record path={} offset={} error={}", path.display(), offset, e);
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => offset = next,
                    None => break,
                }
            }
        }
    }

    Ok(records)
}

fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .windows(MAGIC_ARRAY.len())
        .skip(start)
        .position(|window| window == MAGIC_ARRAY)
        .map(|pos| pos + start)
}
