use crate::aggregate::{Aggregator, DayCount};
use crate::clock::{Clock, SystemClock};
use crate::config::RankConfig;
use crate::error::Result;
use crate::ingest::{Collector, Ingestor, UpdateReport};
use crate::meta::Metadata;
use crate::rank::{RankEngine, RankRecord, RankReport};
use crate::scheduler::tasks::{RankTask, SyncTask};
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::top::RankQuery;
use crate::Error;

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Download counts and rankings over an ordered key-value store.
///
/// Cloning is cheap; clones share the store, the metadata cache and the
/// generation counter, so calls on different clones may overlap freely.
#[derive(Clone)]
pub struct DownloadDb {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    meta: Arc<Metadata>,
    config: RankConfig,
    ingestor: Ingestor,
    aggregator: Aggregator,
    engine: RankEngine,
    query: RankQuery,
}

impl DownloadDb {
    pub async fn open(store: Arc<dyn Store>, config: RankConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        store: Arc<dyn Store>,
        config: RankConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let meta = Arc::new(Metadata::load(store.as_ref()).await);
        let inner = Inner {
            ingestor: Ingestor::new(store.clone(), meta.clone()),
            aggregator: Aggregator::new(store.clone()),
            engine: RankEngine::new(store.clone(), meta.clone(), clock, config.clone()),
            query: RankQuery::new(store.clone(), meta.clone(), config.max_top_limit),
            store,
            meta,
            config,
        };
        tracing::info!(
            rank_period_days = inner.config.rank_period_days,
            last_rank_timestamp = inner.meta.last_rank_timestamp(),
            "Download database opened"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &RankConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.inner.store.clone()
    }

    /// Run one ingestion round to completion.
    pub async fn update(&self, collector: &mut dyn Collector) -> Result<UpdateReport> {
        self.inner.ingestor.run(collector).await
    }

    /// Run one ranking pass to completion.
    pub async fn rank(&self) -> Result<RankReport> {
        self.inner.engine.rank().await
    }

    /// Downloads of `package` on `day`; 0 when nothing is stored.
    pub async fn package_count(&self, package: &str, day: NaiveDate) -> Result<u64> {
        match self.inner.aggregator.day_count(package, day).await {
            Err(Error::NotFound(_)) => Ok(0),
            other => other,
        }
    }

    /// Downloads of `package` from `start` to `end`, both inclusive.
    pub async fn package_count_range(
        &self,
        package: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<u64> {
        self.inner.aggregator.sum(package, start, end).await
    }

    /// Stored daily counts of `package` from `start` to `end`. Gaps are not filled.
    pub async fn package_counts(
        &self,
        package: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayCount>> {
        self.inner.aggregator.series(package, start, end).await
    }

    pub async fn package_rank(&self, package: &str) -> Result<RankRecord> {
        self.inner.query.package_rank(package).await
    }

    pub async fn top_packages(&self, limit: usize) -> Result<Vec<RankRecord>> {
        self.inner.query.top_packages(limit).await
    }

    pub async fn top_packages_default(&self) -> Result<Vec<RankRecord>> {
        self.top_packages(self.inner.config.default_top_limit).await
    }

    /// Package names seen by the most recent completed ingestion round.
    pub fn all_packages(&self) -> Option<Arc<BTreeSet<String>>> {
        self.inner.meta.all_packages()
    }

    pub fn period_all_total(&self) -> Option<u64> {
        self.inner.meta.period_all_total()
    }

    /// Generation of the most recent published ranking pass.
    pub fn last_rank_timestamp(&self) -> Option<u64> {
        self.inner.meta.last_rank_timestamp()
    }

    /// Start periodic ranking and store syncing.
    pub fn start_background(&self) -> Scheduler {
        let scheduler = Scheduler::new();
        scheduler
            .register(Arc::new(RankTask::new(self.clone())))
            .register(Arc::new(SyncTask::new(
                self.store(),
                self.inner.config.sync_interval,
            )));
        scheduler
    }

    pub async fn close(&self) -> Result<()> {
        tracing::info!("Closing download database");
        self.inner.store.close().await
    }
}
