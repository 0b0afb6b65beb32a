//! Durable write path with group commit.
//!
//! `Storage::put` applies an entry to the engine on the caller's thread. When
//! `sync_every_write` is on, the caller gets back an unresolved `Completion`
//! and the resolver goes onto a bounded queue read by the journal thread.
//! The journal thread loops:
//!
//! 1. take a permit from the rate source (bounds syncs per second)
//! 2. drain every queued resolver without blocking
//! 3. if nothing was queued, park on the queue until something arrives
//! 4. issue one `sync_log` and settle the whole batch with its outcome
//!
//! A full queue blocks `put` until the journal thread catches up.
//!
//! Shutdown enqueues `JournalMessage::Shutdown`. The journal thread does not
//! sync after seeing it; every resolver it holds or can still drain is settled
//! with `StorageError::ShuttingDown` before the thread exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use log::{debug, error, warn};

use crate::completion::{completion_pair, Completion, Resolver};
use crate::config::Config;
use crate::engine::{EntryLogEngine, PersistentEngine};
use crate::error::{StorageError, StorageResult};
use crate::key::EntryKey;
use crate::rate::{self, RateSource};

enum JournalMessage {
    Pending(Resolver),
    Shutdown,
}

/// Counters maintained by the journal thread.
#[derive(Debug, Default)]
struct JournalStats {
    syncs: AtomicU64,
    entries_synced: AtomicU64,
    entries_failed: AtomicU64,
}

/// Point-in-time copy of the journal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// `sync_log` calls issued by the journal thread
    pub syncs: u64,
    /// Completions settled successfully by a sync
    pub entries_synced: u64,
    /// Completions settled with an error by the journal thread
    pub entries_failed: u64,
}

struct JournalHandle {
    queue: SyncSender<JournalMessage>,
    thread: Option<thread::JoinHandle<()>>,
}

/// The write path: engine apply plus optional group-commit journal thread.
pub struct Storage {
    engine: Arc<dyn PersistentEngine>,
    journal: Option<JournalHandle>,
    stats: Arc<JournalStats>,
}

impl Storage {
    /// Open the bundled engine and rate limiter described by `config`.
    pub fn open(config: &Config) -> StorageResult<Self> {
        config.validate()?;
        let engine = EntryLogEngine::open(config)?;
        Self::with_engine(Arc::new(engine), rate::for_rate(config.max_sync_rate), config)
    }

    /// Build the write path over injected collaborators.
    ///
    /// The journal thread is only started when `config.sync_every_write` is
    /// set; otherwise `rate` is unused.
    pub fn with_engine(
        engine: Arc<dyn PersistentEngine>,
        rate: Box<dyn RateSource>,
        config: &Config,
    ) -> StorageResult<Self> {
        let stats = Arc::new(JournalStats::default());

        let journal = if config.sync_every_write {
            let (queue, receiver) = mpsc::sync_channel(config.journal_queue_capacity.max(1));
            let worker_engine = Arc::clone(&engine);
            let worker_stats = Arc::clone(&stats);
            let thread = thread::Builder::new()
                .name("bookie-journal".to_string())
                .spawn(move || journal_loop(worker_engine, rate, receiver, worker_stats))
                .map_err(|e| StorageError::Io {
                    path: Some(config.journal_dir.clone()),
                    kind: e.kind(),
                    message: format!("failed to spawn journal thread: {}", e),
                })?;
            Some(JournalHandle { queue, thread: Some(thread) })
        } else {
            None
        };

        Ok(Self { engine, journal, stats })
    }

    /// Apply an entry and return a handle that settles once it is durable.
    ///
    /// An engine failure returns an already-failed completion. Without
    /// durability batching a successful apply returns an already-succeeded
    /// completion. Blocks while the journal queue is full.
    pub fn put(&self, key: EntryKey, value: &[u8]) -> Completion {
        if let Err(e) = self.engine.put(&key, value) {
            error!("event=storage_apply_failed key={} error={}", key, e);
            return Completion::ready(Err(StorageError::ApplyFailed {
                ledger_id: key.ledger_id,
                entry_id: key.entry_id,
                reason: e.to_string(),
            }));
        }

        let journal = match &self.journal {
            Some(journal) => journal,
            None => return Completion::ready(Ok(())),
        };

        let (resolver, completion) = completion_pair();
        // A send error hands the message back; dropping it settles the
        // completion with ShuttingDown.
        if journal.queue.send(JournalMessage::Pending(resolver)).is_err() {
            warn!("event=storage_put_after_shutdown key={}", key);
        }
        completion
    }

    pub fn get(&self, key: &EntryKey) -> StorageResult<Option<Bytes>> {
        self.engine.get(key)
    }

    pub fn scan_ledger(&self, ledger_id: i64) -> StorageResult<Vec<(EntryKey, Bytes)>> {
        self.engine.scan_ledger(ledger_id)
    }

    pub fn engine(&self) -> &Arc<dyn PersistentEngine> {
        &self.engine
    }

    /// Whether completions wait for a journal sync.
    pub fn is_batching(&self) -> bool {
        self.journal.is_some()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            syncs: self.stats.syncs.load(Ordering::Acquire),
            entries_synced: self.stats.entries_synced.load(Ordering::Acquire),
            entries_failed: self.stats.entries_failed.load(Ordering::Acquire),
        }
    }

    /// Stop the journal thread, failing any completion it had not synced.
    pub fn close(mut self) {
        self.shutdown_journal();
    }

    /// Enqueue the shutdown sentinel without waiting for the thread.
    fn signal_shutdown(&self) {
        if let Some(journal) = &self.journal {
            let _ = journal.queue.send(JournalMessage::Shutdown);
        }
    }

    fn shutdown_journal(&mut self) {
        self.signal_shutdown();
        if let Some(mut journal) = self.journal.take() {
            if let Some(thread) = journal.thread.take() {
                if thread.join().is_err() {
                    error!("event=journal_thread_panicked");
                }
            }
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.shutdown_journal();
    }
}

/// Body of the journal thread.
fn journal_loop(
    engine: Arc<dyn PersistentEngine>,
    mut rate: Box<dyn RateSource>,
    queue: Receiver<JournalMessage>,
    stats: Arc<JournalStats>,
) {
    let mut batch: Vec<Resolver> = Vec::new();

    loop {
        rate.acquire();

        let mut stopping = drain_available(&queue, &mut batch);
        if !stopping && batch.is_empty() {
            // Idle: wait on the queue rather than spending permits polling
            match queue.recv() {
                Ok(JournalMessage::Pending(resolver)) => {
                    batch.push(resolver);
                    stopping = drain_available(&queue, &mut batch);
                }
                Ok(JournalMessage::Shutdown) | Err(_) => stopping = true,
            }
        }

        if stopping {
            abandon(batch, &queue, &stats);
            return;
        }

        commit_batch(engine.as_ref(), &mut batch, &stats);
    }
}

/// Move every queued resolver into `batch` without blocking.
/// Returns true once the shutdown sentinel (or a closed queue) is seen.
fn drain_available(queue: &Receiver<JournalMessage>, batch: &mut Vec<Resolver>) -> bool {
    loop {
        match queue.try_recv() {
            Ok(JournalMessage::Pending(resolver)) => batch.push(resolver),
            Ok(JournalMessage::Shutdown) => return true,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}

/// One sync for the whole batch; every resolver gets the sync's outcome.
fn commit_batch(engine: &dyn PersistentEngine, batch: &mut Vec<Resolver>, stats: &JournalStats) {
    let size = batch.len();
    let result = engine.sync_log();
    stats.syncs.fetch_add(1, Ordering::AcqRel);

    match result {
        Ok(()) => {
            debug!("event=journal_synced entries={}", size);
            // Count first so a woken waiter observes its own entry
            stats.entries_synced.fetch_add(size as u64, Ordering::AcqRel);
            for resolver in batch.drain(..) {
                resolver.resolve(Ok(()));
            }
        }
        Err(e) => {
            error!("event=journal_sync_failed entries={} error={}", size, e);
            let failure = StorageError::SyncFailed { batch_size: size, reason: e.to_string() };
            stats.entries_failed.fetch_add(size as u64, Ordering::AcqRel);
            for resolver in batch.drain(..) {
                resolver.resolve(Err(failure.clone()));
            }
        }
    }
}

/// Settle everything still owned or queued with `ShuttingDown`.
fn abandon(mut batch: Vec<Resolver>, queue: &Receiver<JournalMessage>, stats: &JournalStats) {
    while let Ok(message) = queue.try_recv() {
        if let JournalMessage::Pending(resolver) = message {
            batch.push(resolver);
        }
    }

    if !batch.is_empty() {
        warn!("event=journal_shutdown_unsynced entries={}", batch.len());
    }
    stats.entries_failed.fetch_add(batch.len() as u64, Ordering::AcqRel);
    for resolver in batch {
        resolver.resolve(Err(StorageError::ShuttingDown));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::rate::Unlimited;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Put(EntryKey),
        Sync,
    }

    /// In-memory engine that records the order of puts and syncs.
    #[derive(Default)]
    struct RecordingEngine {
        entries: Mutex<BTreeMap<EntryKey, Bytes>>,
        events: Mutex<Vec<Event>>,
        fail_put: AtomicBool,
        fail_sync: AtomicBool,
    }

    impl RecordingEngine {
        fn sync_count(&self) -> usize {
            self.events.lock().iter().filter(|e| **e == Event::Sync).count()
        }
    }

    impl PersistentEngine for RecordingEngine {
        fn put(&self, key: &EntryKey, value: &[u8]) -> StorageResult<()> {
            if self.fail_put.load(Ordering::SeqCst) {
                return Err(StorageError::Io {
                    path: None,
                    kind: std::io::ErrorKind::Other,
                    message: "put rejected".into(),
                });
            }
            self.entries.lock().insert(*key, Bytes::copy_from_slice(value));
            self.events.lock().push(Event::Put(*key));
            Ok(())
        }

        fn sync_log(&self) -> StorageResult<()> {
            self.events.lock().push(Event::Sync);
            if self.fail_sync.load(Ordering::SeqCst) {
                return Err(StorageError::Io {
                    path: None,
                    kind: std::io::ErrorKind::Other,
                    message: "fsync failed".into(),
                });
            }
            Ok(())
        }

        fn get(&self, key: &EntryKey) -> StorageResult<Option<Bytes>> {
            Ok(self.entries.lock().get(key).cloned())
        }

        fn scan_ledger(&self, ledger_id: i64) -> StorageResult<Vec<(EntryKey, Bytes)>> {
            Ok(self
                .entries
                .lock()
                .iter()
                .filter(|(k, _)| k.ledger_id == ledger_id)
                .map(|(k, v)| (*k, v.clone()))
                .collect())
        }
    }

    /// Rate source that hands out one permit per message from the test.
    struct GatedRate(Receiver<()>);

    impl RateSource for GatedRate {
        fn acquire(&mut self) {
            let _ = self.0.recv();
        }
    }

    fn config(batching: bool) -> Config {
        Config::ephemeral("/unused").with_sync_every_write(batching)
    }

    fn gated_storage(capacity: usize) -> (Storage, Arc<RecordingEngine>, SyncSender<()>) {
        let engine = Arc::new(RecordingEngine::default());
        let (permits, gate) = mpsc::sync_channel(16);
        let mut config = config(true);
        config.journal_queue_capacity = capacity;
        let storage = Storage::with_engine(engine.clone(), Box::new(GatedRate(gate)), &config).unwrap();
        (storage, engine, permits)
    }

    #[test]
    fn test_put_without_batching_resolves_immediately() {
        let engine = Arc::new(RecordingEngine::default());
        let storage = Storage::with_engine(engine.clone(), Box::new(Unlimited), &config(false)).unwrap();
        assert!(!storage.is_batching());

        let key = EntryKey::new(1, 1);
        let completion = storage.put(key, b"hello");
        assert_eq!(completion.try_result(), Some(Ok(())));
        assert_eq!(storage.get(&key).unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(engine.sync_count(), 0);
    }

    #[test]
    fn test_apply_failure_is_never_queued() {
        let (storage, engine, permits) = gated_storage(8);
        engine.fail_put.store(true, Ordering::SeqCst);

        let completion = storage.put(EntryKey::new(1, 1), b"x");
        assert!(matches!(completion.try_result(), Some(Err(StorageError::ApplyFailed { ledger_id: 1, entry_id: 1, .. }))));

        permits.send(()).unwrap();
        drop(permits);
        storage.close();
        assert_eq!(engine.sync_count(), 0);
    }

    #[test]
    fn test_completion_waits_for_sync() {
        let (storage, engine, permits) = gated_storage(8);
        let key = EntryKey::new(1, 1);

        let completion = storage.put(key, b"hello");
        assert_eq!(completion.wait_timeout(Duration::from_millis(50)), None);
        assert_eq!(engine.sync_count(), 0);
        // Applied but not yet durable: readable already
        assert_eq!(storage.get(&key).unwrap(), Some(Bytes::from_static(b"hello")));

        permits.send(()).unwrap();
        assert_eq!(completion.wait_timeout(WAIT), Some(Ok(())));
        assert_eq!(*engine.events.lock(), vec![Event::Put(key), Event::Sync]);
    }

    #[test]
    fn test_queued_entries_share_one_sync() {
        let (storage, engine, permits) = gated_storage(16);
        let completions: Vec<Completion> =
            (0..5).map(|i| storage.put(EntryKey::new(2, i), b"v")).collect();

        permits.send(()).unwrap();
        for completion in &completions {
            assert_eq!(completion.wait_timeout(WAIT), Some(Ok(())));
        }
        assert_eq!(engine.sync_count(), 1);
        assert_eq!(
            storage.stats(),
            StorageStats { syncs: 1, entries_synced: 5, entries_failed: 0 }
        );
    }

    #[test]
    fn test_sync_failure_fails_whole_batch() {
        let (storage, engine, permits) = gated_storage(16);
        engine.fail_sync.store(true, Ordering::SeqCst);
        let completions: Vec<Completion> =
            (0..3).map(|i| storage.put(EntryKey::new(3, i), b"v")).collect();

        permits.send(()).unwrap();
        for completion in &completions {
            match completion.wait_timeout(WAIT) {
                Some(Err(StorageError::SyncFailed { batch_size, .. })) => assert_eq!(batch_size, 3),
                other => panic!("expected SyncFailed, got {:?}", other),
            }
        }
        assert_eq!(storage.stats().entries_failed, 3);
    }

    #[test]
    fn test_no_sync_while_idle() {
        let (storage, engine, permits) = gated_storage(8);
        for _ in 0..5 {
            permits.send(()).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.sync_count(), 0);
        assert_eq!(storage.stats().syncs, 0);
    }

    #[test]
    fn test_shutdown_fails_unsynced_completions() {
        let (storage, engine, permits) = gated_storage(16);
        let completions: Vec<Completion> =
            (0..4).map(|i| storage.put(EntryKey::new(4, i), b"v")).collect();

        // Sentinel lands behind the pending entries; the next permit lets the
        // journal thread see both in one drain.
        storage.signal_shutdown();
        permits.send(()).unwrap();

        for completion in &completions {
            assert_eq!(completion.wait_timeout(WAIT), Some(Err(StorageError::ShuttingDown)));
        }
        storage.close();
        assert_eq!(engine.sync_count(), 0);
    }

    #[test]
    fn test_close_after_synced_batch_leaves_results_intact() {
        let engine = Arc::new(RecordingEngine::default());
        let storage = Storage::with_engine(engine.clone(), Box::new(Unlimited), &config(true)).unwrap();
        let completion = storage.put(EntryKey::new(5, 0), b"v");
        assert_eq!(completion.wait_timeout(WAIT), Some(Ok(())));
        storage.close();
        assert_eq!(completion.try_result(), Some(Ok(())));
    }

    #[test]
    fn test_full_queue_blocks_put() {
        let (storage, _engine, permits) = gated_storage(2);
        let storage = Arc::new(storage);
        let first: Vec<Completion> = (0..2).map(|i| storage.put(EntryKey::new(6, i), b"v")).collect();

        let returned = Arc::new(AtomicBool::new(false));
        let blocked = {
            let storage = Arc::clone(&storage);
            let returned = Arc::clone(&returned);
            std::thread::spawn(move || {
                let completion = storage.put(EntryKey::new(6, 2), b"v");
                returned.store(true, Ordering::SeqCst);
                completion
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!returned.load(Ordering::SeqCst), "put should block on a full queue");

        permits.send(()).unwrap();
        for completion in &first {
            assert_eq!(completion.wait_timeout(WAIT), Some(Ok(())));
        }
        let third = blocked.join().unwrap();
        permits.send(()).unwrap();
        assert_eq!(third.wait_timeout(WAIT), Some(Ok(())));
        drop(permits);
    }

    #[test]
    fn test_every_completion_follows_its_sync() {
        let engine = Arc::new(RecordingEngine::default());
        let storage = Arc::new(Storage::with_engine(engine.clone(), Box::new(Unlimited), &config(true)).unwrap());

        let handles: Vec<_> = (0..4i64)
            .map(|ledger| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|entry| {
                            let key = EntryKey::new(ledger, entry);
                            (key, storage.put(key, b"payload"))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        for (_, completion) in &all {
            assert_eq!(completion.wait_timeout(WAIT), Some(Ok(())));
        }

        let events = engine.events.lock().clone();
        let last_sync = events.iter().rposition(|e| *e == Event::Sync).unwrap();
        for (key, _) in &all {
            let put_at = events.iter().position(|e| *e == Event::Put(*key)).unwrap();
            assert!(put_at < last_sync, "entry {} resolved without a covering sync", key);
        }
        let stats = storage.stats();
        assert_eq!(stats.entries_synced, 200);
        assert!(stats.syncs >= 1 && stats.syncs <= 200);
    }
}
