//! Tests for allocation through the shared record.

use std::sync::atomic::Ordering;

use straylight::controller::shared::SharedRecordAllocator;
use straylight::controller::{ControllerError, NamespaceSync};
use straylight::store::RangeAllocationStore;
use straylight::types::{Namespace, RangeAllocation};

use crate::support::{
    annotated, as_namespaces, as_records, keys, mcs, range, repaired, FlakyStore, RECORD,
};

fn allocator(store: &std::sync::Arc<FlakyStore>) -> SharedRecordAllocator {
    SharedRecordAllocator::new(as_namespaces(store), as_records(store), range(), RECORD, mcs(), keys())
}

#[tokio::test]
async fn first_namespace_gets_first_block_and_label() {
    let store = FlakyStore::new();
    repaired(&store).await;
    store.seed(Namespace::new("test")).await;

    let result = allocator(&store).sync("test").await;
    assert!(result.is_ok(), "sync failed: {result:?}");

    let ns = store.namespace("test").await;
    let keys = keys();
    assert_eq!(ns.annotation(&keys.uid_range), Some("10/2"));
    assert_eq!(ns.annotation(&keys.supplemental_groups), Some("10/2"));
    assert_eq!(ns.annotation(&keys.mcs), Some("s0:c1,c0"));

    let record = store.record().await;
    assert_eq!(record.range, "10-20/2");
    assert_eq!(record.data, vec![0b1]);
}

#[tokio::test]
async fn consecutive_namespaces_get_distinct_blocks() {
    let store = FlakyStore::new();
    repaired(&store).await;
    let alloc = allocator(&store);
    for name in ["a", "b", "c"] {
        store.seed(Namespace::new(name)).await;
        assert!(alloc.sync(name).await.is_ok());
    }

    let keys = keys();
    assert_eq!(store.namespace("b").await.annotation(&keys.uid_range), Some("12/2"));
    assert_eq!(store.namespace("b").await.annotation(&keys.mcs), Some("s0:c3,c2"));
    assert_eq!(store.namespace("c").await.annotation(&keys.uid_range), Some("14/2"));
    assert_eq!(store.record().await.data, vec![0b111]);
}

#[tokio::test]
async fn missing_record_defers_allocation() {
    let store = FlakyStore::new();
    store.seed(Namespace::new("fresh")).await;

    match allocator(&store).sync("fresh").await {
        Err(err @ ControllerError::RecordNotReady { .. }) => {
            assert!(!err.is_fatal());
            assert!(err.to_string().contains(RECORD));
        }
        other => panic!("expected the record to be missing, got {other:?}"),
    }
    assert_eq!(store.namespace("fresh").await.annotation(&keys().uid_range), None);
    assert!(RangeAllocationStore::get(&store.inner, RECORD)
        .await
        .is_err_and(|e| e.is_not_found()));
}

#[tokio::test]
async fn blocks_held_before_the_record_existed_are_not_reused() {
    let store = FlakyStore::new();
    store.seed(annotated("existing", "10/2")).await;
    store.seed(Namespace::new("fresh")).await;
    let alloc = allocator(&store);

    assert!(alloc.sync("fresh").await.is_err());
    repaired(&store).await;
    assert!(alloc.sync("fresh").await.is_ok());

    let keys = keys();
    assert_eq!(store.namespace("existing").await.annotation(&keys.uid_range), Some("10/2"));
    assert_eq!(store.namespace("fresh").await.annotation(&keys.uid_range), Some("12/2"));
    assert_eq!(store.record().await.data, vec![0b11]);
}

#[tokio::test]
async fn allocated_namespace_is_left_alone() {
    let store = FlakyStore::new();
    store.seed(annotated("done", "18/2")).await;
    let before = store.namespace("done").await;

    assert!(allocator(&store).sync("done").await.is_ok());

    assert_eq!(store.namespace("done").await, before);
    assert!(RangeAllocationStore::get(&store.inner, RECORD)
        .await
        .is_err_and(|e| e.is_not_found()));
}

#[tokio::test]
async fn existing_label_is_kept() {
    let store = FlakyStore::new();
    repaired(&store).await;
    let mut ns = Namespace::new("labelled");
    ns.annotations.insert(keys().mcs, "s0:c9,c8".to_owned());
    store.seed(ns).await;

    assert!(allocator(&store).sync("labelled").await.is_ok());

    let ns = store.namespace("labelled").await;
    assert_eq!(ns.annotation(&keys().uid_range), Some("10/2"));
    assert_eq!(ns.annotation(&keys().mcs), Some("s0:c9,c8"));
}

#[tokio::test]
async fn missing_namespace_is_not_an_error() {
    let store = FlakyStore::new();
    assert!(allocator(&store).sync("ghost").await.is_ok());
}

#[tokio::test]
async fn record_for_another_range_is_fatal() {
    let store = FlakyStore::new();
    let foreign = RangeAllocation {
        name: RECORD.to_owned(),
        range: "100-200/10".to_owned(),
        ..RangeAllocation::default()
    };
    assert!(RangeAllocationStore::create(&store.inner, &foreign).await.is_ok());
    store.seed(Namespace::new("test")).await;

    match allocator(&store).sync("test").await {
        Err(err @ ControllerError::MismatchedRange { .. }) => assert!(err.is_fatal()),
        other => panic!("expected a range mismatch, got {other:?}"),
    }
    assert_eq!(store.namespace("test").await.annotation(&keys().uid_range), None);
}

#[tokio::test]
async fn exhausted_range_is_reported() {
    let store = FlakyStore::new();
    repaired(&store).await;
    let alloc = allocator(&store);
    for i in 0..5 {
        let name = format!("ns{i}");
        store.seed(Namespace::new(name.as_str())).await;
        assert!(alloc.sync(&name).await.is_ok());
    }
    store.seed(Namespace::new("overflow")).await;

    match alloc.sync("overflow").await {
        Err(err @ ControllerError::RangeExhausted { .. }) => {
            assert!(!err.is_fatal());
            assert!(err.to_string().contains("10-20/2"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn record_conflicts_are_retried() {
    let store = FlakyStore::new();
    repaired(&store).await;
    store.seed(Namespace::new("test")).await;
    store.record_conflicts.store(3, Ordering::SeqCst);

    assert!(allocator(&store).sync("test").await.is_ok());
    assert_eq!(store.namespace("test").await.annotation(&keys().uid_range), Some("10/2"));
    assert_eq!(store.record().await.data, vec![0b1]);
}

#[tokio::test]
async fn record_conflicts_give_up_after_the_retry_budget() {
    let store = FlakyStore::new();
    repaired(&store).await;
    store.seed(Namespace::new("test")).await;
    store.record_conflicts.store(10, Ordering::SeqCst);

    let alloc = allocator(&store).with_conflict_retries(2);
    match alloc.sync("test").await {
        Err(ControllerError::RetriesExhausted { retries, .. }) => assert_eq!(retries, 2),
        other => panic!("expected retries to run out, got {other:?}"),
    }
    // The reservation never landed.
    assert!(store.record().await.data.is_empty());
}

#[tokio::test]
async fn namespace_conflict_rereads_and_retries() {
    let store = FlakyStore::new();
    repaired(&store).await;
    store.seed(Namespace::new("test")).await;
    store.namespace_conflicts.store(1, Ordering::SeqCst);

    assert!(allocator(&store).sync("test").await.is_ok());
    assert_eq!(store.namespace("test").await.annotation(&keys().uid_range), Some("10/2"));
}
