use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rankdb::{
    Clock, Collector, CollectorEvent, DayCount, DownloadDb, Error, FixedClock, KvStore, PackageDownloads,
    RankConfig, ScriptedCollector, StoreConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap(),
    ))
}

fn package(name: &str, days: &[(NaiveDate, u64)]) -> CollectorEvent {
    CollectorEvent::PackageData(PackageDownloads {
        name: name.to_string(),
        downloads: days
            .iter()
            .map(|(day, count)| DayCount { day: *day, count: *count })
            .collect(),
    })
}

fn failed(name: &str) -> CollectorEvent {
    CollectorEvent::PackageError {
        name: name.to_string(),
        error: "upstream returned 404".to_string(),
    }
}

async fn memory_db(clock: &Arc<FixedClock>) -> DownloadDb {
    DownloadDb::with_clock(Arc::new(KvStore::memory()), RankConfig::default(), clock.clone()).await
}

async fn ranks(db: &DownloadDb, packages: &[&str]) -> BTreeMap<String, (u64, u64)> {
    let mut ranks = BTreeMap::new();
    for package in packages {
        let record = db.package_rank(package).await.unwrap();
        ranks.insert(package.to_string(), (record.rank, record.count));
    }
    ranks
}

#[tokio::test]
async fn test_tracked_packages_scenario() {
    let clock = clock();
    let db = memory_db(&clock).await;
    let today = clock.today();
    let yesterday = today - Duration::days(1);
    let history = [(today - Duration::days(20), 200), (today - Duration::days(10), 100)];

    let mut collector = ScriptedCollector::new(vec![
        package("p0", &[(yesterday, 1000)]),
        package("p1", &history),
        failed("p2"),
        package("p3", &history),
        package("p4", &[]),
        CollectorEvent::Finish,
    ]);
    let update = db.update(&mut collector).await.unwrap();
    assert_eq!(update.packages, vec!["p0", "p1", "p3", "p4"]);
    assert!(matches!(&update.package_errors[..], [Error::Upstream { package, .. }] if package == "p2"));
    assert!(update.write_errors.is_empty());

    let report = db.rank().await.unwrap();
    assert_eq!(report.day, yesterday);
    assert_eq!(report.ranked, 4);
    assert_eq!(report.period_total, 1600);

    let expected: BTreeMap<String, (u64, u64)> = [
        ("p0".to_string(), (1, 1000)),
        ("p1".to_string(), (2, 300)),
        ("p3".to_string(), (2, 300)),
        ("p4".to_string(), (4, 0)),
    ]
    .into();
    assert_eq!(ranks(&db, &["p0", "p1", "p3", "p4"]).await, expected);
    assert_eq!(db.package_rank("p1").await.unwrap().day, yesterday);

    let err = db.package_rank("p2").await.unwrap_err();
    assert!(matches!(err, Error::RankNotFound(_)));
    assert_eq!(err.to_string(), "No rank for package (p2) found");

    let top = db.top_packages(3).await.unwrap();
    assert_eq!(top.len(), 3);
    assert_eq!(top[0].package, "p0");
    assert!(top[1..].iter().all(|r| r.rank == 2));
}

#[tokio::test]
async fn test_tied_counts_share_a_rank() {
    let clock = clock();
    let db = memory_db(&clock).await;
    let day = clock.today() - Duration::days(2);

    let mut collector = ScriptedCollector::new(vec![
        package("d", &[(day, 50)]),
        package("c", &[(day, 200)]),
        package("a", &[(day, 300)]),
        package("b", &[(day, 200)]),
        CollectorEvent::Finish,
    ]);
    db.update(&mut collector).await.unwrap();
    db.rank().await.unwrap();

    let got = ranks(&db, &["a", "b", "c", "d"]).await;
    let ranks: Vec<u64> = got.values().map(|(rank, _)| *rank).collect();
    assert_eq!(ranks, vec![1, 2, 2, 4]);
}

#[tokio::test]
async fn test_counts_outside_window_are_ignored() {
    let clock = clock();
    let db = memory_db(&clock).await;
    let today = clock.today();

    let mut collector = ScriptedCollector::new(vec![
        package("old", &[(today - Duration::days(40), 9000), (today - Duration::days(31), 1)]),
        package("new", &[(today, 9000), (today - Duration::days(1), 2)]),
        CollectorEvent::Finish,
    ]);
    db.update(&mut collector).await.unwrap();
    db.rank().await.unwrap();

    // Today is not part of the window; its first day is today - 31
    assert_eq!(db.package_rank("new").await.unwrap().count, 2);
    assert_eq!(db.package_rank("old").await.unwrap().count, 1);
}

#[tokio::test]
async fn test_count_queries_agree() {
    let clock = clock();
    let db = memory_db(&clock).await;
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let days: Vec<_> = [0, 3, 4, 9]
        .iter()
        .map(|offset| (start + Duration::days(*offset), 10 * (*offset as u64 + 1)))
        .collect();

    let mut collector = ScriptedCollector::new(vec![package("x", &days), CollectorEvent::Finish]);
    db.update(&mut collector).await.unwrap();

    let end = start + Duration::days(14);
    let series = db.package_counts("x", start, end).await.unwrap();
    assert_eq!(series.len(), 4);
    let summed: u64 = series.iter().map(|d| d.count).sum();
    assert_eq!(db.package_count_range("x", start, end).await.unwrap(), summed);

    assert_eq!(db.package_count("x", start + Duration::days(1)).await.unwrap(), 0);
    assert_eq!(db.package_count("x", start + Duration::days(3)).await.unwrap(), 40);
}

#[tokio::test]
async fn test_repeated_ranking_is_stable() {
    let clock = clock();
    let db = memory_db(&clock).await;
    let day = clock.today() - Duration::days(3);
    let names = ["a", "b", "c", "d", "e"];

    let mut collector = ScriptedCollector::new(
        names
            .iter()
            .zip([5u64, 9, 9, 0, 1])
            .map(|(name, count)| package(name, &[(day, count)]))
            .chain([CollectorEvent::Finish]),
    );
    db.update(&mut collector).await.unwrap();

    db.rank().await.unwrap();
    let first = ranks(&db, &names).await;
    db.rank().await.unwrap();
    assert_eq!(ranks(&db, &names).await, first);

    // A day later the same ranks are filed under the new day
    clock.advance(Duration::days(1));
    let report = db.rank().await.unwrap();
    assert_eq!(ranks(&db, &names).await, first);
    assert_eq!(db.package_rank("a").await.unwrap().day, report.day);
    assert_eq!(db.top_packages(10).await.unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_passes() {
    let clock = clock();
    let db = memory_db(&clock).await;
    let day = clock.today() - Duration::days(1);

    let events: Vec<_> = (0..200u64)
        .map(|i| package(&format!("pkg-{i:03}"), &[(day, i % 17)]))
        .chain([CollectorEvent::Finish])
        .collect();
    db.update(&mut ScriptedCollector::new(events)).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.rank().await })
        })
        .collect();

    let mut generations = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.ranked, 200);
        generations.push(report.generation);
    }

    generations.sort_unstable();
    generations.dedup();
    assert_eq!(generations.len(), 4);
    assert_eq!(db.last_rank_timestamp(), generations.last().copied());

    let top = db.top_packages(1000).await.unwrap();
    assert_eq!(top.len(), 200);
    assert!(top.windows(2).all(|w| w[0].count >= w[1].count && w[0].rank <= w[1].rank));
    assert_eq!(top[0].count, 16);
}

#[tokio::test]
async fn test_top_packages_before_ranking() {
    let clock = clock();
    let db = memory_db(&clock).await;

    assert!(db.top_packages(10).await.unwrap().is_empty());
    assert!(db.top_packages_default().await.unwrap().is_empty());
    assert!(db.last_rank_timestamp().is_none());
}

#[tokio::test]
async fn test_fatal_collection_error() {
    let clock = clock();
    let db = memory_db(&clock).await;

    let mut collector = ScriptedCollector::new(vec![
        package("a", &[]),
        CollectorEvent::Error("registry unreachable".to_string()),
    ]);
    assert!(matches!(db.update(&mut collector).await, Err(Error::Collector(_))));
    assert!(db.all_packages().is_none());
}

#[tokio::test]
async fn test_channel_collector() {
    let clock = clock();
    let db = memory_db(&clock).await;
    let day = clock.today() - Duration::days(1);
    let (tx, mut rx) = mpsc::channel(8);

    let producer = tokio::spawn(async move {
        for name in ["x", "y"] {
            tx.send(package(name, &[(day, 1)])).await.unwrap();
        }
        tx.send(failed("z")).await.unwrap();
        tx.send(CollectorEvent::Finish).await.unwrap();
    });

    let collector: &mut dyn Collector = &mut rx;
    let report = db.update(collector).await.unwrap();
    producer.await.unwrap();

    assert_eq!(report.packages, vec!["x", "y"]);
    assert_eq!(report.package_errors.len(), 1);
    assert_eq!(db.all_packages().unwrap().len(), 2);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let day = clock.today() - Duration::days(1);

    let (generation, before) = {
        let store = Arc::new(KvStore::open(StoreConfig::new(dir.path())).unwrap());
        let db = DownloadDb::with_clock(store, RankConfig::default(), clock.clone()).await;

        let mut collector = ScriptedCollector::new(vec![
            package("a", &[(day, 7)]),
            package("b", &[(day, 3)]),
            CollectorEvent::Finish,
        ]);
        db.update(&mut collector).await.unwrap();
        let report = db.rank().await.unwrap();
        let before = db.top_packages(10).await.unwrap();
        db.close().await.unwrap();
        (report.generation, before)
    };

    let store = Arc::new(KvStore::open(StoreConfig::new(dir.path())).unwrap());
    let db = DownloadDb::with_clock(store, RankConfig::default(), clock.clone()).await;

    assert_eq!(db.last_rank_timestamp(), Some(generation));
    assert_eq!(db.period_all_total(), Some(10));
    assert_eq!(db.all_packages().unwrap().len(), 2);
    assert_eq!(db.top_packages(10).await.unwrap(), before);
    assert_eq!(db.package_count("a", day).await.unwrap(), 7);

    // Generations keep increasing even though the clock has not moved
    let report = db.rank().await.unwrap();
    assert!(report.generation > generation);
    assert_eq!(report.removed_scratch, 2);
    db.close().await.unwrap();
}
