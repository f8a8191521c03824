pub mod aggregate;
pub mod clock;
pub mod config;
pub mod db;
pub mod encoding;
pub mod error;
pub mod flock;
pub mod ingest;
pub mod keys;
pub mod meta;
pub mod rank;
pub mod scheduler;
pub mod store;
pub mod top;

pub use aggregate::DayCount;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{RankConfig, StoreConfig};
pub use db::DownloadDb;
pub use error::{Error, Result};
pub use ingest::{Collector, CollectorEvent, PackageDownloads, ScriptedCollector, UpdateReport};
pub use rank::{RankRecord, RankReport};
pub use store::{KvStore, Store};
