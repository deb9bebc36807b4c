//! Tests for rebuilding the shared record from namespace annotations.

use std::sync::Arc;
use std::time::Duration;

use straylight::allocator::UidAllocator;
use straylight::controller::repair::{Repair, RepairReport};
use straylight::controller::shared::SharedRecordAllocator;
use straylight::controller::NamespaceSync;
use straylight::store::{NamespaceStore, RangeAllocationStore};
use straylight::types::{Namespace, RangeAllocation};
use straylight::uid::{Block, Range};
use tokio::sync::watch;

use crate::support::{annotated, as_namespaces, as_records, keys, mcs, range, FlakyStore, RECORD};

fn repair(store: &Arc<FlakyStore>, range: Range) -> Repair {
    Repair::new(
        as_namespaces(store),
        as_records(store),
        range,
        RECORD,
        keys().uid_range,
        Duration::from_millis(10),
    )
}

fn pool_from(record: &RangeAllocation, range: Range) -> UidAllocator {
    let mut pool = UidAllocator::new(range);
    if let Err(err) = pool.restore(&record.range, &record.data) {
        panic!("record should restore: {err}");
    }
    pool
}

#[tokio::test]
async fn rebuilds_record_from_annotations() {
    let store = FlakyStore::new();
    store.seed(annotated("a", "10/2")).await;
    store.seed(annotated("b", "14-15")).await;
    store.seed(Namespace::new("unallocated")).await;

    let report = repair(&store, range()).run_once().await;
    assert_eq!(report.ok(), Some(RepairReport { allocated: 2, skipped: 0 }));

    let pool = pool_from(&store.record().await, range());
    assert!(pool.has(&Block { start: 10, end: 11 }));
    assert!(!pool.has(&Block { start: 12, end: 13 }));
    assert!(pool.has(&Block { start: 14, end: 15 }));
}

#[tokio::test]
async fn skips_bad_foreign_and_duplicate_blocks() {
    let store = FlakyStore::new();
    store.seed(annotated("good", "10/2")).await;
    store.seed(annotated("twin", "10/2")).await;
    store.seed(annotated("garbage", "ten")).await;
    store.seed(annotated("foreign", "500/2")).await;
    store.seed(annotated("unaligned", "11/2")).await;

    let report = repair(&store, range()).run_once().await;
    assert_eq!(report.ok(), Some(RepairReport { allocated: 1, skipped: 4 }));
    assert_eq!(pool_from(&store.record().await, range()).count(), 1);
}

#[tokio::test]
async fn releases_blocks_no_namespace_holds() {
    let store = FlakyStore::new();
    assert!(repair(&store, range()).run_once().await.is_ok());
    let alloc = SharedRecordAllocator::new(
        as_namespaces(&store),
        as_records(&store),
        range(),
        RECORD,
        mcs(),
        keys(),
    );
    for name in ["a", "b"] {
        store.seed(Namespace::new(name)).await;
        assert!(alloc.sync(name).await.is_ok());
    }
    assert!(NamespaceStore::delete(&store.inner, "a").await.is_ok());

    assert!(repair(&store, range()).run_once().await.is_ok());

    let pool = pool_from(&store.record().await, range());
    assert!(!pool.has(&Block { start: 10, end: 11 }));
    assert!(pool.has(&Block { start: 12, end: 13 }));

    // The freed block is handed out again.
    store.seed(Namespace::new("c")).await;
    assert!(alloc.sync("c").await.is_ok());
    assert_eq!(store.namespace("c").await.annotation(&keys().uid_range), Some("10/2"));
}

#[tokio::test]
async fn rewrites_record_for_a_new_range() {
    let store = FlakyStore::new();
    let old = RangeAllocation {
        name: RECORD.to_owned(),
        range: "100-200/10".to_owned(),
        data: vec![0xFF],
        ..RangeAllocation::default()
    };
    assert!(RangeAllocationStore::create(&store.inner, &old).await.is_ok());
    store.seed(annotated("a", "12/2")).await;

    assert!(repair(&store, range()).run_once().await.is_ok());

    let record = store.record().await;
    assert_eq!(record.range, "10-20/2");
    assert_eq!(record.data, vec![0b10]);
}

#[tokio::test]
async fn record_conflicts_are_retried() {
    let store = FlakyStore::new();
    assert!(repair(&store, range()).run_once().await.is_ok());
    store.seed(annotated("a", "10/2")).await;
    store
        .record_conflicts
        .store(2, std::sync::atomic::Ordering::SeqCst);

    assert!(repair(&store, range()).run_once().await.is_ok());
    assert_eq!(store.record().await.data, vec![0b1]);
}

#[tokio::test(start_paused = true)]
async fn loop_runs_each_interval_until_shutdown() {
    let store = FlakyStore::new();
    let (tx, rx) = watch::channel(false);
    let task = {
        let repair = repair(&store, range());
        tokio::spawn(async move { repair.run_until(rx).await })
    };

    // Nothing happens before the first interval.
    tokio::task::yield_now().await;
    assert!(RangeAllocationStore::get(&store.inner, RECORD)
        .await
        .is_err_and(|e| e.is_not_found()));

    store.seed(annotated("a", "10/2")).await;
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(store.record().await.data, vec![0b1]);

    assert!(tx.send(true).is_ok());
    match task.await {
        Ok(result) => assert!(result.is_ok()),
        Err(err) => panic!("repair task should join: {err}"),
    }
}
