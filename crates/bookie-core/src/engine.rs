//! Persistent entry engine.
//!
//! `PersistentEngine` is the contract the write path consumes: apply a write,
//! sync the log, and read entries back. `EntryLogEngine` is the bundled
//! implementation: a RAM index over a journal, with periodic checkpoints of
//! the index in the data directory so the journal can be trimmed.
//!
//! **Write path**: journal append (no sync), then RAM insert
//! **Sync**: one durable sync of the current journal file covers every append before it
//! **Read path**: RAM only; ledgers are ordered maps so scans are range reads
//! **Recovery**: newest checkpoint, then the journal files it does not cover

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use hashbrown::HashMap;
use log::{error, info};
use parking_lot::{Mutex, RwLock};

use crate::checkpoint;
use crate::config::Config;
use crate::error::{StorageError, StorageResult};
use crate::journal::{self, JournalReader, JournalWriter};
use crate::key::EntryKey;

/// Ordered-key entry store consumed by the write path.
///
/// Implementations must be safe to call concurrently: writers call `put`
/// from many threads while the journal thread calls `sync_log`.
pub trait PersistentEngine: Send + Sync {
    /// Apply a write. On return the entry is readable but not necessarily durable.
    /// Writing an existing key replaces its value.
    fn put(&self, key: &EntryKey, value: &[u8]) -> StorageResult<()>;

    /// Make every write applied before this call durable.
    fn sync_log(&self) -> StorageResult<()>;

    fn get(&self, key: &EntryKey) -> StorageResult<Option<Bytes>>;

    /// All entries of one ledger, ordered by entry id.
    fn scan_ledger(&self, ledger_id: i64) -> StorageResult<Vec<(EntryKey, Bytes)>>;
}

/// Entries of one ledger keyed by entry id.
type Ledger = BTreeMap<i64, Bytes>;

/// RAM entry index backed by a journal.
///
/// All methods take `&self`. Writers hold the journal mutex across the append
/// and the index insert, so a checkpoint taken under the same mutex sees
/// exactly the entries journaled before it. Readers share the index read lock.
pub struct EntryLogEngine {
    index: RwLock<HashMap<i64, Ledger>>,
    journal: Mutex<JournalWriter>,
    checkpointing: Mutex<()>,
    data_dir: PathBuf,
    journal_dir: PathBuf,
}

impl EntryLogEngine {
    /// Open or create the engine described by `config`, replaying the
    /// newest checkpoint and the journal after it.
    pub fn open(config: &Config) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| StorageError::io_at(&config.data_dir, &e, "failed to create data directory"))?;

        info!(
            "event=engine_open data_dir={} journal_dir={}",
            config.data_dir.display(),
            config.journal_dir.display()
        );

        let mut index: HashMap<i64, Ledger> = HashMap::new();
        let mut replayed = 0;

        let first_sequence = match checkpoint::latest_checkpoint(&config.data_dir)? {
            Some((sequence, path)) => {
                let records = checkpoint::load_checkpoint(&path)?;
                info!("event=checkpoint_loaded path={} entries={}", path.display(), records.len());
                for record in records {
                    index.entry(record.key.ledger_id).or_default().insert(record.key.entry_id, record.value);
                }
                sequence
            }
            None => 0,
        };

        for record in JournalReader::new(&config.journal_dir).recover_records_from(first_sequence)? {
            index.entry(record.key.ledger_id).or_default().insert(record.key.entry_id, record.value);
            replayed += 1;
        }
        if replayed > 0 {
            info!("event=engine_recovered records={} ledgers={}", replayed, index.len());
        }

        let journal = JournalWriter::open(
            &config.journal_dir,
            first_sequence,
            config.journal_rotation_bytes,
            config.max_value_size,
        )?;

        Ok(Self {
            index: RwLock::new(index),
            journal: Mutex::new(journal),
            checkpointing: Mutex::new(()),
            data_dir: config.data_dir.clone(),
            journal_dir: config.journal_dir.clone(),
        })
    }

    /// Write every live entry to a new checkpoint, then delete the journal
    /// files and older checkpoints it supersedes. Returns the checkpoint's
    /// sequence.
    ///
    /// Writers are blocked only while the journal rolls over and the index
    /// is copied; the checkpoint file itself is written without the lock.
    pub fn checkpoint(&self) -> StorageResult<u64> {
        let _guard = self.checkpointing.lock();

        let (sequence, entries) = {
            let mut journal = self.journal.lock();
            let sequence = journal.roll()?;
            let index = self.index.read();
            let mut entries = Vec::with_capacity(index.values().map(|ledger| ledger.len()).sum());
            for (ledger_id, ledger) in index.iter() {
                for (entry_id, value) in ledger {
                    entries.push((EntryKey::new(*ledger_id, *entry_id), value.clone()));
                }
            }
            (sequence, entries)
        };

        checkpoint::write_checkpoint(&self.data_dir, sequence, &entries)?;
        let journals = journal::remove_journal_files_before(&self.journal_dir, sequence)?;
        let checkpoints = checkpoint::remove_stale_checkpoints(&self.data_dir, sequence)?;
        info!(
            "event=checkpoint_written sequence={} entries={} journals_removed={} checkpoints_removed={}",
            sequence,
            entries.len(),
            journals,
            checkpoints
        );
        Ok(sequence)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }

    pub fn len(&self) -> usize {
        self.index.read().values().map(|ledger| ledger.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.index
            .read()
            .get(&key.ledger_id)
            .map_or(false, |ledger| ledger.contains_key(&key.entry_id))
    }
}

impl PersistentEngine for EntryLogEngine {
    fn put(&self, key: &EntryKey, value: &[u8]) -> StorageResult<()> {
        let mut journal = self.journal.lock();
        if let Err(e) = journal.append(key, value) {
            error!("event=engine_put_failed key={} error={}", key, e);
            return Err(e);
        }
        self.index
            .write()
            .entry(key.ledger_id)
            .or_default()
            .insert(key.entry_id, Bytes::copy_from_slice(value));
        Ok(())
    }

    fn sync_log(&self) -> StorageResult<()> {
        self.journal.lock().sync()
    }

    fn get(&self, key: &EntryKey) -> StorageResult<Option<Bytes>> {
        Ok(self.index.read().get(&key.ledger_id).and_then(|ledger| ledger.get(&key.entry_id)).cloned())
    }

    fn scan_ledger(&self, ledger_id: i64) -> StorageResult<Vec<(EntryKey, Bytes)>> {
        let index = self.index.read();
        let entries = match index.get(&ledger_id) {
            Some(ledger) => ledger
                .iter()
                .map(|(entry_id, value)| (EntryKey::new(ledger_id, *entry_id), value.clone()))
                .collect(),
            None => Vec::new(),
        };
        Ok(entries)
    }
}
