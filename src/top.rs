use crate::encoding::Value;
use crate::error::Result;
use crate::keys::Key;
use crate::meta::Metadata;
use crate::rank::{PeriodTotal, RankRecord};
use crate::store::{ScanOptions, Store};
use crate::Error;

use std::sync::Arc;

/// Read side of ranking: per-package rank lookups and the top-N listing.
#[derive(Clone)]
pub struct RankQuery {
    store: Arc<dyn Store>,
    meta: Arc<Metadata>,
    max_limit: usize,
}

impl RankQuery {
    pub fn new(store: Arc<dyn Store>, meta: Arc<Metadata>, max_limit: usize) -> Self {
        Self {
            store,
            meta,
            max_limit,
        }
    }

    /// Most recent rank record of `package`.
    pub async fn package_rank(&self, package: &str) -> Result<RankRecord> {
        let options = ScanOptions::new(Key::rank_range(package)?).reverse().limit(1);
        match self.store.scan_values(options)?.next() {
            Some(value) => RankRecord::decode(&value?),
            None => Err(Error::RankNotFound(package.to_string())),
        }
    }

    /// Highest-count packages of the published generation, best first.
    /// Empty until a ranking pass has completed.
    pub async fn top_packages(&self, limit: usize) -> Result<Vec<RankRecord>> {
        let Some(generation) = self.meta.last_rank_timestamp() else {
            return Ok(Vec::new());
        };

        let limit = limit.min(self.max_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let options = ScanOptions::new(Key::generation_range(generation)?)
            .reverse()
            .limit(limit);

        let mut top = Vec::with_capacity(limit);
        for value in self.store.scan_values(options)? {
            let entry = PeriodTotal::decode(&value?)?;
            top.push(self.package_rank(&entry.package).await?);
        }
        Ok(top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Key as _;
    use crate::store::{KvStore, WriteBatch};
    use chrono::NaiveDate;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(package: &str, rank: u64, d: &str, count: u64) -> RankRecord {
        RankRecord {
            package: package.to_string(),
            rank,
            day: day(d),
            count,
        }
    }

    async fn seeded(generation: u64, entries: &[(&str, u64, u64)]) -> (Arc<KvStore>, RankQuery) {
        let store = Arc::new(KvStore::memory());
        let mut batch = WriteBatch::new();
        for (package, rank, count) in entries {
            let total = PeriodTotal {
                package: package.to_string(),
                count: *count,
                package_count: None,
            };
            batch.put(
                Key::PeriodTotal {
                    generation,
                    count: *count,
                    package: package.to_string(),
                }
                .encode()
                .unwrap(),
                total.encode(),
            );
            let ranked = record(package, *rank, "2024-03-14", *count);
            batch.put(
                Key::Rank(package.to_string(), ranked.day).encode().unwrap(),
                ranked.encode(),
            );
        }
        store.write(batch).await.unwrap();

        let meta = Arc::new(Metadata::load(store.as_ref()).await);
        meta.publish_generation(store.as_ref(), generation).await.unwrap();
        let query = RankQuery::new(store.clone(), meta, 3);
        (store, query)
    }

    #[tokio::test]
    async fn test_top_before_any_pass_is_empty() {
        let store = Arc::new(KvStore::memory());
        let meta = Arc::new(Metadata::load(store.as_ref()).await);
        let query = RankQuery::new(store, meta, 1000);

        assert!(query.top_packages(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_is_ordered_and_capped() {
        let (_store, query) = seeded(
            7,
            &[("a", 1, 300), ("b", 2, 200), ("c", 2, 200), ("d", 4, 50)],
        )
        .await;

        let top = query.top_packages(10).await.unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], record("a", 1, "2024-03-14", 300));
        assert!(top[1..].iter().all(|r| r.rank == 2 && r.count == 200));

        let top = query.top_packages(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].package, "a");
        assert!(query.top_packages(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_package_rank_prefers_latest_day() {
        let (store, query) = seeded(7, &[("a", 1, 300)]).await;
        let newer = record("a", 5, "2024-03-15", 10);
        store
            .put(&Key::Rank("a".to_string(), newer.day).encode().unwrap(), newer.encode())
            .await
            .unwrap();
        // A longer name sharing the prefix must not leak into the lookup
        let other = record("ab", 9, "2024-12-31", 1);
        store
            .put(&Key::Rank("ab".to_string(), other.day).encode().unwrap(), other.encode())
            .await
            .unwrap();

        assert_eq!(query.package_rank("a").await.unwrap(), newer);
        assert!(matches!(
            query.package_rank("zzz").await,
            Err(Error::RankNotFound(p)) if p == "zzz"
        ));
    }

    #[tokio::test]
    async fn test_missing_rank_record_fails_top() {
        let (store, query) = seeded(7, &[("a", 1, 300), ("b", 2, 200)]).await;
        store
            .delete(&Key::Rank("b".to_string(), day("2024-03-14")).encode().unwrap())
            .await
            .unwrap();

        assert!(matches!(
            query.top_packages(10).await,
            Err(Error::RankNotFound(p)) if p == "b"
        ));
    }
}
