//! Process-wide cached scalars.
//!
//! Each field is loaded once from the store and afterwards refreshed only by
//! the component that writes it, right after its write succeeds. A field that
//! is missing or undecodable in the store stays unset.

use crate::encoding::{Key as _, Value};
use crate::error::Result;
use crate::keys::Key;
use crate::store::Store;

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default, Clone)]
struct Fields {
    all_packages: Option<Arc<BTreeSet<String>>>,
    period_all_total: Option<u64>,
    last_rank_timestamp: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Metadata {
    fields: RwLock<Fields>,
    // Serializes check-and-write of the published generation
    publish: tokio::sync::Mutex<()>,
}

impl Metadata {
    /// Best-effort load; never fails.
    pub async fn load(store: &dyn Store) -> Self {
        let fields = Fields {
            all_packages: load_field::<BTreeSet<String>>(store, Key::AllPackages)
                .await
                .map(Arc::new),
            period_all_total: load_field(store, Key::PeriodAllTotal).await,
            last_rank_timestamp: load_field(store, Key::LastRankTimestamp).await,
        };
        tracing::debug!(
            packages = fields.all_packages.as_ref().map(|p| p.len()),
            period_all_total = fields.period_all_total,
            last_rank_timestamp = fields.last_rank_timestamp,
            "Metadata loaded"
        );
        Self {
            fields: RwLock::new(fields),
            publish: tokio::sync::Mutex::new(()),
        }
    }

    pub fn all_packages(&self) -> Option<Arc<BTreeSet<String>>> {
        self.read().all_packages.clone()
    }

    pub fn period_all_total(&self) -> Option<u64> {
        self.read().period_all_total
    }

    pub fn last_rank_timestamp(&self) -> Option<u64> {
        self.read().last_rank_timestamp
    }

    pub async fn set_all_packages(
        &self,
        store: &dyn Store,
        packages: BTreeSet<String>,
    ) -> Result<()> {
        store.put(&Key::AllPackages.encode()?, packages.encode()).await?;
        self.write().all_packages = Some(Arc::new(packages));
        Ok(())
    }

    pub async fn set_period_all_total(&self, store: &dyn Store, total: u64) -> Result<()> {
        store.put(&Key::PeriodAllTotal.encode()?, total.encode()).await?;
        self.write().period_all_total = Some(total);
        Ok(())
    }

    /// Publish a completed generation. Older generations never replace a
    /// newer one; returns whether `generation` became the published one.
    pub async fn publish_generation(&self, store: &dyn Store, generation: u64) -> Result<bool> {
        let _publish = self.publish.lock().await;
        if self.last_rank_timestamp().is_some_and(|last| last >= generation) {
            return Ok(false);
        }
        store
            .put(&Key::LastRankTimestamp.encode()?, generation.encode())
            .await?;
        self.write().last_rank_timestamp = Some(generation);
        Ok(true)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Fields> {
        // Plain data, a panicked writer cannot leave it half-updated
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Fields> {
        self.fields.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn load_field<T: Value>(store: &dyn Store, key: Key) -> Option<T> {
    let encoded = key.encode().ok()?;
    match store.get(&encoded).await {
        Ok(Some(bytes)) => match T::decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = ?key, error = %e, "Ignoring undecodable metadata");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key = ?key, error = %e, "Failed to load metadata");
            None
        }
    }
}
