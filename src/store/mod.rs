pub mod kv;
pub mod log;

pub use kv::KvStore;

use crate::error::Result;
use crate::keys::KeyRange;
use std::ops::Bound;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Mutations applied as one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put(key, value));
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Delete(key));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Bounds, direction and limit of a range scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub range: KeyRange,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            reverse: false,
            limit: None,
        }
    }

    /// Every key in the store.
    pub fn all() -> Self {
        Self::new((Bound::Unbounded, Bound::Unbounded))
    }

    /// Yield the highest key first
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Stop after `limit` entries
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub type ScanIterator = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + Send>;
pub type KeyIterator = Box<dyn Iterator<Item = Result<Vec<u8>>> + Send>;
pub type ValueIterator = Box<dyn Iterator<Item = Result<Vec<u8>>> + Send>;

/// An ordered key-value store. Keys compare as raw bytes.
///
/// Implementations must be safe for concurrent use; a [`WriteBatch`] is
/// applied atomically with respect to `get` and to each step of a scan.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Retrieves the value for a given key.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or updates a key-value pair.
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Removes a key. Removing an absent key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Applies every operation of the batch, or none of them.
    async fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Lazily iterates over an ordered range of key-value pairs.
    fn scan(&self, options: ScanOptions) -> Result<ScanIterator>;

    /// Like scan, yielding keys only.
    fn scan_keys(&self, options: ScanOptions) -> Result<KeyIterator> {
        Ok(Box::new(self.scan(options)?.map(|r| r.map(|(k, _)| k))))
    }

    /// Like scan, yielding values only.
    fn scan_values(&self, options: ScanOptions) -> Result<ValueIterator> {
        Ok(Box::new(self.scan(options)?.map(|r| r.map(|(_, v)| v))))
    }

    /// Makes buffered writes durable.
    async fn sync(&self) -> Result<()>;

    /// Syncs and releases the store. Later operations fail.
    async fn close(&self) -> Result<()>;
}
