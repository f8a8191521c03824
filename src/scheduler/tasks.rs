use std::{sync::Arc, time::Duration};

use crate::{
    db::DownloadDb,
    error::Result,
    scheduler::{BackgroundTask, Context},
    store::Store,
};

pub struct RankTask {
    db: DownloadDb,
}

impl RankTask {
    pub fn new(db: DownloadDb) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for RankTask {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn interval(&self) -> Duration {
        self.db.config().rank_interval
    }

    async fn execute(&self, mut ctx: Context) -> Result<()> {
        // Abandon the pass on shutdown; its scratch is reclaimed by a later one
        tokio::select! {
            report = self.db.rank() => {
                let report = report?;
                tracing::debug!(
                    run_id = ctx.run_id,
                    generation = report.generation,
                    ranked = report.ranked,
                    "Scheduled ranking pass done"
                );
            }
            _ = ctx.shutdown.recv() => {
                tracing::info!(task = ctx.task_name, "Ranking pass abandoned on shutdown");
            }
        }
        Ok(())
    }
}

pub struct SyncTask {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl SyncTask {
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for SyncTask {
    fn name(&self) -> &'static str {
        "store-sync"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        self.store.sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::RankConfig;
    use crate::store::KvStore;
    use chrono::{TimeZone, Utc};

    #[tokio::test(start_paused = true)]
    async fn test_background_ranking() -> Result<()> {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        let config = RankConfig::default()
            .rank_interval(Duration::from_millis(100))
            .sync_interval(Duration::from_millis(100));
        let db = DownloadDb::with_clock(Arc::new(KvStore::memory()), config, clock).await;

        let scheduler = db.start_background();
        assert_eq!(scheduler.len(), 2);

        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(db.last_rank_timestamp().is_some());

        scheduler.shutdown().await
    }

    #[tokio::test]
    async fn test_sync_task_surfaces_closed_store() {
        let store = Arc::new(KvStore::memory());
        let task = SyncTask::new(store.clone(), Duration::from_secs(1));
        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        let ctx = || Context {
            task_name: "store-sync",
            run_id: 1,
            shutdown: rx.resubscribe(),
        };

        assert!(task.execute(ctx()).await.is_ok());
        store.close().await.unwrap();
        assert!(matches!(task.execute(ctx()).await, Err(crate::Error::Closed)));
    }
}
