//! Ranking passes.
//!
//! A pass is tagged with a generation id and runs in three phases:
//!
//! 1. **Aggregate**: every registered package gets a scratch record keyed by
//!    `(generation, zero-padded count, package)`, so the generation's scratch
//!    range is already sorted by count.
//! 2. **Rank**: a reverse scan of that range yields packages highest count
//!    first; competition ranks are assigned on the fly and persisted as one
//!    rank record per package for the ranking day.
//! 3. **Finalize**: the generation is published as `lastRankTimestamp` and
//!    stale scratch is deleted in fixed-size batches.
//!
//! Passes may overlap. Each one only ever reads its own generation, and
//! cleanup spares every generation that is still running, newer than the one
//! finishing, or currently published. A failed pass leaves its scratch behind
//! for a later pass to reclaim.

use crate::aggregate::Aggregator;
use crate::clock::Clock;
use crate::config::RankConfig;
use crate::encoding::format::{Formatter as _, Keys};
use crate::encoding::{Key as _, Value};
use crate::error::Result;
use crate::Error;
use crate::keys::{Key, Namespace};
use crate::meta::Metadata;
use crate::store::{ScanOptions, Store, WriteBatch};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Scratch value: a package's total over the window of one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotal {
    pub package: String,
    pub count: u64,
    /// Size of the package registry snapshot when the pass ran, if known.
    pub package_count: Option<u64>,
}

/// Rank of a package as of one ranking day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRecord {
    pub package: String,
    pub rank: u64,
    pub day: NaiveDate,
    pub count: u64,
}

/// Outcome of one ranking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankReport {
    pub generation: u64,
    /// Day the rank records are filed under, the last day of the window.
    pub day: NaiveDate,
    pub window_start: NaiveDate,
    pub ranked: usize,
    pub period_total: u64,
    /// False when a newer generation had already been published.
    pub published: bool,
    pub removed_scratch: usize,
}

/// Competition ranking over counts arriving in descending order: equal
/// counts share a rank, and the next lower count skips past the whole tie.
#[derive(Debug)]
pub struct CompetitionRanker {
    rank: u64,
    run: u64,
    previous: Option<u64>,
}

impl Default for CompetitionRanker {
    fn default() -> Self {
        Self {
            rank: 1,
            run: 0,
            previous: None,
        }
    }
}

impl CompetitionRanker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank of the next entry.
    pub fn assign(&mut self, count: u64) -> u64 {
        if self.previous.is_some_and(|previous| previous != count) {
            self.rank += self.run;
            self.run = 1;
        } else {
            self.run += 1;
        }
        self.previous = Some(count);
        self.rank
    }
}

pub struct RankEngine {
    store: Arc<dyn Store>,
    meta: Arc<Metadata>,
    aggregator: Aggregator,
    clock: Arc<dyn Clock>,
    config: RankConfig,
    last_generation: AtomicU64,
    running: Mutex<BTreeSet<u64>>,
}

impl RankEngine {
    pub fn new(
        store: Arc<dyn Store>,
        meta: Arc<Metadata>,
        clock: Arc<dyn Clock>,
        config: RankConfig,
    ) -> Self {
        let seed = meta.last_rank_timestamp().unwrap_or(0);
        Self {
            aggregator: Aggregator::new(store.clone()),
            store,
            meta,
            clock,
            config,
            last_generation: AtomicU64::new(seed),
            running: Mutex::new(BTreeSet::new()),
        }
    }

    /// Run one full ranking pass.
    pub async fn rank(&self) -> Result<RankReport> {
        let (window_start, day) = self.window(self.clock.today())?;
        let pass = self.begin();
        let generation = pass.generation;

        tracing::info!(
            generation = generation,
            window_start = %window_start,
            window_end = %day,
            "Ranking pass started"
        );

        let period_total = self.aggregate(generation, window_start, day).await?;
        self.meta
            .set_period_all_total(self.store.as_ref(), period_total)
            .await?;

        let ranked = self.assign_ranks(generation, day).await?;

        let published = self
            .meta
            .publish_generation(self.store.as_ref(), generation)
            .await?;
        let removed_scratch = self.collect_garbage(generation).await?;

        tracing::info!(
            generation = generation,
            ranked = ranked,
            period_total = period_total,
            published = published,
            removed_scratch = removed_scratch,
            "Ranking pass finished"
        );

        Ok(RankReport {
            generation,
            day,
            window_start,
            ranked,
            period_total,
            published,
            removed_scratch,
        })
    }

    /// First and last day of the window ending the day before `today`.
    fn window(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        let period = u64::from(self.config.rank_period_days);
        let end = today.checked_sub_days(Days::new(1));
        let start = today.checked_sub_days(Days::new(period + 1));
        match (start, end) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(Error::InvalidInput(format!(
                "a {} day window before {} is out of the calendar range",
                period, today
            ))),
        }
    }

    /// Generations of passes currently in progress.
    pub fn running_generations(&self) -> Vec<u64> {
        self.running().iter().copied().collect()
    }

    /// Allocate a strictly increasing generation and mark it running.
    fn begin(&self) -> Pass<'_> {
        let mut running = self.running();
        let now = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        let mut generation = now;
        // fetch_update only fails when the closure returns None
        let _ = self
            .last_generation
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                generation = now.max(last + 1);
                Some(generation)
            });
        running.insert(generation);
        Pass {
            engine: self,
            generation,
        }
    }

    fn running(&self) -> std::sync::MutexGuard<'_, BTreeSet<u64>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one scratch record per registered package; returns the grand total.
    async fn aggregate(&self, generation: u64, start: NaiveDate, end: NaiveDate) -> Result<u64> {
        let package_count = self.meta.all_packages().map(|p| p.len() as u64);
        let registry = self
            .store
            .scan_values(ScanOptions::new(Namespace::Package.range()))?;

        let mut total = 0u64;
        let mut packages = 0usize;
        for value in registry {
            let package = String::decode(&value?)?;
            let count = self.aggregator.sum(&package, start, end).await?;
            total = total.saturating_add(count);
            packages += 1;

            let key = Key::PeriodTotal {
                generation,
                count,
                package: package.clone(),
            }
            .encode()?;
            let value = PeriodTotal {
                package,
                count,
                package_count,
            };
            self.store.put(&key, value.encode()).await?;
        }

        tracing::debug!(
            generation = generation,
            packages = packages,
            total = total,
            "Period totals written"
        );
        Ok(total)
    }

    /// Scan the generation's scratch highest count first and persist ranks.
    async fn assign_ranks(&self, generation: u64, day: NaiveDate) -> Result<usize> {
        let scratch = self
            .store
            .scan_values(ScanOptions::new(Key::generation_range(generation)?).reverse())?;

        let mut ranker = CompetitionRanker::new();
        let mut batch = WriteBatch::new();
        let mut ranked = 0usize;
        for value in scratch {
            let entry = PeriodTotal::decode(&value?)?;
            let record = RankRecord {
                rank: ranker.assign(entry.count),
                day,
                count: entry.count,
                package: entry.package,
            };
            batch.put(
                Key::Rank(record.package.clone(), day).encode()?,
                record.encode(),
            );
            ranked += 1;

            if batch.len() >= self.config.write_batch_size {
                self.store.write(std::mem::take(&mut batch)).await?;
            }
        }
        self.store.write(batch).await?;
        Ok(ranked)
    }

    /// Delete scratch of generations that are neither running, newer than
    /// `generation`, nor published. Deletes go out in fixed-size batches.
    async fn collect_garbage(&self, generation: u64) -> Result<usize> {
        let keys = self
            .store
            .scan_keys(ScanOptions::new(Namespace::PeriodTotal.range()))?;

        let mut batch = WriteBatch::new();
        let mut removed = 0usize;
        for key in keys {
            let key = key?;
            let stale = match Key::generation_of(&key) {
                Ok(other) => !self.is_protected(other, generation),
                // Unparseable scratch belongs to no generation
                Err(e) => {
                    tracing::debug!(key = %Keys::key(&key), error = %e, "Dropping unparseable scratch");
                    true
                }
            };
            if !stale {
                continue;
            }

            batch.delete(key);
            removed += 1;
            if batch.len() >= self.config.cleanup_batch_size {
                self.store.write(std::mem::take(&mut batch)).await?;
            }
        }
        self.store.write(batch).await?;

        tracing::debug!(generation = generation, removed = removed, "Stale scratch removed");
        Ok(removed)
    }

    fn is_protected(&self, other: u64, finishing: u64) -> bool {
        other >= finishing
            || self.meta.last_rank_timestamp() == Some(other)
            || self.running().contains(&other)
    }
}

/// A running pass; its generation stays protected until it is dropped.
struct Pass<'a> {
    engine: &'a RankEngine,
    generation: u64,
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        self.engine.running().remove(&self.generation);
    }
}
