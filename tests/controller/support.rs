//! Shared fixtures for controller tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use straylight::allocator::{default_mcs_allocation, McsAllocationFn};
use straylight::config::AnnotationKeys;
use straylight::controller::repair::Repair;
use straylight::mcs::CategoryRange;
use straylight::store::{
    MemoryStore, NamespaceEvent, NamespaceStore, RangeAllocationStore, StoreError,
};
use straylight::types::{Namespace, RangeAllocation};
use straylight::uid::Range;

pub const RECORD: &str = "scc-uid";

pub fn range() -> Range {
    match Range::new(10, 20, 2) {
        Ok(range) => range,
        Err(err) => panic!("range should build: {err}"),
    }
}

pub fn mcs() -> McsAllocationFn {
    let labels = match CategoryRange::new("s0:", 10, 2) {
        Ok(labels) => labels,
        Err(err) => panic!("category range should build: {err}"),
    };
    default_mcs_allocation(range(), labels, 5)
}

pub fn keys() -> AnnotationKeys {
    AnnotationKeys::default()
}

pub fn annotated(name: &str, uid: &str) -> Namespace {
    let mut ns = Namespace::new(name);
    ns.annotations.insert(keys().uid_range, uid.to_owned());
    ns
}

/// Decrement `counter` if positive; true when a failure should be injected.
fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A [`MemoryStore`] that fails a configurable number of writes.
#[derive(Debug)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Namespace updates to reject with a conflict.
    pub namespace_conflicts: AtomicU32,
    /// Namespace updates to reject with a backend error.
    pub namespace_failures: AtomicU32,
    /// Record updates to reject with a conflict.
    pub record_conflicts: AtomicU32,
    /// Hand out watches that never see an event.
    pub muted: AtomicBool,
    silent: broadcast::Sender<NamespaceEvent>,
}

impl Default for FlakyStore {
    fn default() -> Self {
        let (silent, _) = broadcast::channel(1);
        Self {
            inner: MemoryStore::new(),
            namespace_conflicts: AtomicU32::new(0),
            namespace_failures: AtomicU32::new(0),
            record_conflicts: AtomicU32::new(0),
            muted: AtomicBool::new(false),
            silent,
        }
    }
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed(&self, namespace: Namespace) {
        if let Err(err) = NamespaceStore::create(&self.inner, &namespace).await {
            panic!("seeding {} should succeed: {err}", namespace.name);
        }
    }

    pub async fn namespace(&self, name: &str) -> Namespace {
        match NamespaceStore::get(&self.inner, name).await {
            Ok(ns) => ns,
            Err(err) => panic!("namespace {name} should exist: {err}"),
        }
    }

    pub async fn record(&self) -> RangeAllocation {
        match RangeAllocationStore::get(&self.inner, RECORD).await {
            Ok(record) => record,
            Err(err) => panic!("record should exist: {err}"),
        }
    }
}

#[async_trait]
impl NamespaceStore for FlakyStore {
    async fn get(&self, name: &str) -> Result<Namespace, StoreError> {
        NamespaceStore::get(&self.inner, name).await
    }

    async fn create(&self, namespace: &Namespace) -> Result<Namespace, StoreError> {
        NamespaceStore::create(&self.inner, namespace).await
    }

    async fn update(&self, namespace: &Namespace) -> Result<Namespace, StoreError> {
        if take(&self.namespace_failures) {
            return Err(StoreError::Backend("injected failure".to_owned()));
        }
        if take(&self.namespace_conflicts) {
            return Err(StoreError::Conflict {
                kind: "namespace",
                name: namespace.name.clone(),
            });
        }
        NamespaceStore::update(&self.inner, namespace).await
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete(name).await
    }

    async fn list(&self) -> Result<Vec<Namespace>, StoreError> {
        self.inner.list().await
    }

    fn watch(&self) -> broadcast::Receiver<NamespaceEvent> {
        if self.muted.load(Ordering::SeqCst) {
            return self.silent.subscribe();
        }
        self.inner.watch()
    }
}

#[async_trait]
impl RangeAllocationStore for FlakyStore {
    async fn get(&self, name: &str) -> Result<RangeAllocation, StoreError> {
        RangeAllocationStore::get(&self.inner, name).await
    }

    async fn create(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        RangeAllocationStore::create(&self.inner, record).await
    }

    async fn update(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        if take(&self.record_conflicts) {
            return Err(StoreError::Conflict {
                kind: "rangeallocation",
                name: record.name.clone(),
            });
        }
        RangeAllocationStore::update(&self.inner, record).await
    }
}

pub fn as_namespaces(store: &Arc<FlakyStore>) -> Arc<dyn NamespaceStore> {
    Arc::clone(store) as Arc<dyn NamespaceStore>
}

pub fn as_records(store: &Arc<FlakyStore>) -> Arc<dyn RangeAllocationStore> {
    Arc::clone(store) as Arc<dyn RangeAllocationStore>
}

/// Create the shared record the way a controller does at startup: one
/// repair pass over the current namespaces.
pub async fn repaired(store: &Arc<FlakyStore>) {
    let repair = Repair::new(
        as_namespaces(store),
        as_records(store),
        range(),
        RECORD,
        keys().uid_range,
        Duration::from_secs(60),
    );
    if let Err(err) = repair.run_once().await {
        panic!("initial repair should succeed: {err}");
    }
}
