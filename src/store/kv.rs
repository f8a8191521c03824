//! Ordered key-value store over a concurrent skip list.
//!
//! Point reads and scan steps take a shared commit lock; writes take it
//! exclusively while they are logged and applied, which makes a batch atomic
//! to every reader. Scans are cursors that re-seek the skip list from the last
//! returned key, so no lock is held between steps and a scan may freely span
//! `await` points.

use super::log::Log;
use super::{BatchOp, ScanIterator, ScanOptions, Store, WriteBatch};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::flock::FileLock;
use crate::Error;

use crossbeam_skiplist::SkipMap;
use std::fs;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const LOCK_FILE: &str = "rankdb.lock";
const LOG_FILE: &str = "rankdb.log";

type Index = SkipMap<Vec<u8>, Vec<u8>>;

pub struct KvStore {
    data: Arc<Index>,
    commit: Arc<RwLock<()>>,
    log: Option<Mutex<Log>>,
    lock: Mutex<Option<FileLock>>,
    closed: AtomicBool,
    sync_on_write: bool,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("entries", &self.data.len())
            .field("durable", &self.log.is_some())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl KvStore {
    /// Volatile store, nothing survives the process.
    pub fn memory() -> Self {
        Self {
            data: Arc::new(SkipMap::new()),
            commit: Arc::new(RwLock::new(())),
            log: None,
            lock: Mutex::new(None),
            closed: AtomicBool::new(false),
            sync_on_write: false,
        }
    }

    /// Open a durable store in `config.dir`, replaying its log.
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let lock = FileLock::lock(config.dir.join(LOCK_FILE))?;

        let data = Arc::new(SkipMap::new());
        let mut log = Log::open(config.dir.join(LOG_FILE), config.log_buffer_size)?;

        let mut replay = log.replay()?;
        let mut records = 0u64;
        for batch in replay.by_ref() {
            apply(&data, batch?);
            records += 1;
        }
        if replay.is_torn() {
            tracing::warn!(
                path = %log.path().display(),
                valid_len = replay.valid_len(),
                "Dropping torn record at end of log"
            );
            log.truncate(replay.valid_len())?;
        }
        tracing::info!(
            path = %log.path().display(),
            records = records,
            entries = data.len(),
            "Store recovered from log"
        );

        Ok(Self {
            data,
            commit: Arc::new(RwLock::new(())),
            log: Some(Mutex::new(log)),
            lock: Mutex::new(Some(lock)),
            closed: AtomicBool::new(false),
            sync_on_write: config.sync_on_write,
        })
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn commit(&self, ops: Vec<BatchOp>) -> Result<()> {
        let _guard = self.commit.write()?;
        // close() flips the flag before taking the lock for its final flush
        self.check_open()?;
        if let Some(log) = &self.log {
            let mut log = log.lock()?;
            log.append(&ops)?;
            if self.sync_on_write {
                log.flush()?;
            }
        }
        apply(&self.data, ops);
        Ok(())
    }
}

fn apply(data: &Index, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put(key, value) => {
                data.insert(key, value);
            }
            BatchOp::Delete(key) => {
                data.remove(&key);
            }
        }
    }
}

#[async_trait::async_trait]
impl Store for KvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let _guard = self.commit.read()?;
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.commit(vec![BatchOp::Put(key.to_vec(), value)])
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.commit(vec![BatchOp::Delete(key.to_vec())])
    }

    async fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.commit(batch.into_ops())
    }

    fn scan(&self, options: ScanOptions) -> Result<ScanIterator> {
        self.check_open()?;
        Ok(Box::new(Cursor::new(
            self.data.clone(),
            self.commit.clone(),
            options,
        )))
    }

    async fn sync(&self) -> Result<()> {
        self.check_open()?;
        if let Some(log) = &self.log {
            log.lock()?.flush()?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.commit.write()?;
        if let Some(log) = &self.log {
            log.lock()?.flush()?;
        }
        self.lock.lock()?.take();
        tracing::debug!("Store closed");
        Ok(())
    }
}

/// Lazy range cursor over the skip list.
struct Cursor {
    data: Arc<Index>,
    commit: Arc<RwLock<()>>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    reverse: bool,
    remaining: Option<usize>,
    done: bool,
}

impl Cursor {
    fn new(data: Arc<Index>, commit: Arc<RwLock<()>>, options: ScanOptions) -> Self {
        let (lower, upper) = options.range;
        Self {
            data,
            commit,
            lower,
            upper,
            reverse: options.reverse,
            remaining: options.limit,
            done: false,
        }
    }

    fn step(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if is_empty_range(&self.lower, &self.upper) {
            return Ok(None);
        }
        let _guard = self.commit.read()?;
        let mut range = self.data.range((self.lower.clone(), self.upper.clone()));
        let entry = if self.reverse {
            range.next_back()
        } else {
            range.next()
        };
        Ok(entry.map(|entry| (entry.key().clone(), entry.value().clone())))
    }
}

impl Iterator for Cursor {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        match self.step() {
            Ok(Some((key, value))) => {
                // Narrow the range past the key just returned
                if self.reverse {
                    self.upper = Bound::Excluded(key.clone());
                } else {
                    self.lower = Bound::Excluded(key.clone());
                }
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Some(Ok((key, value)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
