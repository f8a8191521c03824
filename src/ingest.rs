//! Applies per-package download batches coming from a collector.

use crate::aggregate::DayCount;
use crate::encoding::{Key as _, Value};
use crate::error::Result;
use crate::keys::Key;
use crate::meta::Metadata;
use crate::store::{Store, WriteBatch};
use crate::Error;

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Daily downloads of one package as fetched upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDownloads {
    pub name: String,
    pub downloads: Vec<DayCount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorEvent {
    /// Counts for one package.
    PackageData(PackageDownloads),
    /// Fetching one package failed; the round goes on without it.
    PackageError { name: String, error: String },
    /// Collection failed as a whole.
    Error(String),
    /// Every package has been attempted.
    Finish,
}

/// Source of collector events for one ingestion round.
#[async_trait::async_trait]
pub trait Collector: Send {
    /// Next event, or `None` once the collector has nothing more to say.
    async fn next_event(&mut self) -> Option<CollectorEvent>;
}

#[async_trait::async_trait]
impl Collector for mpsc::Receiver<CollectorEvent> {
    async fn next_event(&mut self) -> Option<CollectorEvent> {
        self.recv().await
    }
}

/// Replays a fixed list of events.
#[derive(Debug, Default)]
pub struct ScriptedCollector {
    events: VecDeque<CollectorEvent>,
}

impl ScriptedCollector {
    pub fn new(events: impl IntoIterator<Item = CollectorEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl Collector for ScriptedCollector {
    async fn next_event(&mut self) -> Option<CollectorEvent> {
        self.events.pop_front()
    }
}

/// Outcome of one ingestion round.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Packages whose data arrived, in arrival order.
    pub packages: Vec<String>,
    /// Packages the collector could not fetch.
    pub package_errors: Vec<Error>,
    /// Writes that failed; the packages around them were still processed.
    pub write_errors: Vec<Error>,
}

impl UpdateReport {
    pub fn is_clean(&self) -> bool {
        self.package_errors.is_empty() && self.write_errors.is_empty()
    }
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    meta: Arc<Metadata>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, meta: Arc<Metadata>) -> Self {
        Self { store, meta }
    }

    /// Drive one collector to completion.
    ///
    /// Every write this round issues has landed by the time this returns.
    pub async fn run(&self, collector: &mut dyn Collector) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        let mut names = BTreeSet::new();

        loop {
            let event = collector
                .next_event()
                .await
                .ok_or_else(|| Error::Collector("collector ended without finishing".to_string()))?;

            match event {
                CollectorEvent::PackageData(data) => {
                    names.insert(data.name.clone());
                    report.packages.push(data.name.clone());
                    report.write_errors.extend(self.ingest_package(&data).await);
                }
                CollectorEvent::PackageError { name, error } => {
                    tracing::warn!(package = %name, error = %error, "Package fetch failed");
                    report.package_errors.push(Error::Upstream {
                        package: name,
                        message: error,
                    });
                }
                CollectorEvent::Error(message) => {
                    tracing::error!(error = %message, "Collection failed");
                    return Err(Error::Collector(message));
                }
                CollectorEvent::Finish => break,
            }
        }

        if let Err(e) = self.meta.set_all_packages(self.store.as_ref(), names).await {
            tracing::warn!(error = %e, "Failed to write package registry snapshot");
            report.write_errors.push(e);
        }

        tracing::info!(
            packages = report.packages.len(),
            package_errors = report.package_errors.len(),
            write_errors = report.write_errors.len(),
            "Update finished"
        );
        Ok(report)
    }

    /// Write one registry entry and one atomic batch of daily counts.
    /// The two writes are independent; each failure is returned on its own.
    pub async fn ingest_package(&self, data: &PackageDownloads) -> Vec<Error> {
        let (registry, counts) = tokio::join!(self.write_registry(data), self.write_counts(data));

        let mut errors = Vec::new();
        for result in [registry, counts] {
            if let Err(e) = result {
                tracing::warn!(package = %data.name, error = %e, "Package write failed");
                errors.push(e);
            }
        }
        errors
    }

    async fn write_registry(&self, data: &PackageDownloads) -> Result<()> {
        let key = Key::Package(data.name.clone()).encode()?;
        self.store.put(&key, data.name.encode()).await
    }

    async fn write_counts(&self, data: &PackageDownloads) -> Result<()> {
        let mut batch = WriteBatch::new();
        for day in &data.downloads {
            let key = Key::Count(data.name.clone(), day.day).encode()?;
            batch.put(key, day.count.encode());
        }
        self.store.write(batch).await
    }
}
