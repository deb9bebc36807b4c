//! In-process store used by tests and single-process deployments.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{NamespaceEvent, NamespaceStore, RangeAllocationStore, StoreError, WATCH_CHANNEL_CAPACITY};
use crate::types::{Namespace, RangeAllocation};

const NAMESPACE: &str = "namespace";
const RANGE_ALLOCATION: &str = "rangeallocation";

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    allocations: BTreeMap<String, RangeAllocation>,
}

/// Both store interfaces over in-memory maps.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<NamespaceEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_owned()))
    }

    fn notify(&self, event: NamespaceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl NamespaceStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Namespace, StoreError> {
        self.lock()?
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: NAMESPACE,
                name: name.to_owned(),
            })
    }

    async fn create(&self, namespace: &Namespace) -> Result<Namespace, StoreError> {
        let created = {
            let mut state = self.lock()?;
            if state.namespaces.contains_key(&namespace.name) {
                return Err(StoreError::AlreadyExists {
                    kind: NAMESPACE,
                    name: namespace.name.clone(),
                });
            }
            let mut created = namespace.clone();
            created.resource_version = 1;
            state.namespaces.insert(created.name.clone(), created.clone());
            created
        };
        self.notify(NamespaceEvent::Upserted(created.name.clone()));
        Ok(created)
    }

    async fn update(&self, namespace: &Namespace) -> Result<Namespace, StoreError> {
        let updated = {
            let mut state = self.lock()?;
            let current = state
                .namespaces
                .get_mut(&namespace.name)
                .ok_or_else(|| StoreError::NotFound {
                    kind: NAMESPACE,
                    name: namespace.name.clone(),
                })?;
            if current.resource_version != namespace.resource_version {
                return Err(StoreError::Conflict {
                    kind: NAMESPACE,
                    name: namespace.name.clone(),
                });
            }
            let mut updated = namespace.clone();
            updated.resource_version = current.resource_version.saturating_add(1);
            *current = updated.clone();
            updated
        };
        self.notify(NamespaceEvent::Upserted(updated.name.clone()));
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let removed = self.lock()?.namespaces.remove(name);
        if removed.is_none() {
            return Err(StoreError::NotFound {
                kind: NAMESPACE,
                name: name.to_owned(),
            });
        }
        self.notify(NamespaceEvent::Deleted(name.to_owned()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Namespace>, StoreError> {
        Ok(self.lock()?.namespaces.values().cloned().collect())
    }

    fn watch(&self) -> broadcast::Receiver<NamespaceEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RangeAllocationStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<RangeAllocation, StoreError> {
        self.lock()?
            .allocations
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: RANGE_ALLOCATION,
                name: name.to_owned(),
            })
    }

    async fn create(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        let mut state = self.lock()?;
        if state.allocations.contains_key(&record.name) {
            return Err(StoreError::AlreadyExists {
                kind: RANGE_ALLOCATION,
                name: record.name.clone(),
            });
        }
        let mut created = record.clone();
        created.resource_version = 1;
        created.updated_at = Some(chrono::Utc::now());
        state.allocations.insert(created.name.clone(), created.clone());
        Ok(created)
    }

    async fn update(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        let mut state = self.lock()?;
        let current = state
            .allocations
            .get_mut(&record.name)
            .ok_or_else(|| StoreError::NotFound {
                kind: RANGE_ALLOCATION,
                name: record.name.clone(),
            })?;
        if current.resource_version != record.resource_version {
            return Err(StoreError::Conflict {
                kind: RANGE_ALLOCATION,
                name: record.name.clone(),
            });
        }
        let mut updated = record.clone();
        updated.resource_version = current.resource_version.saturating_add(1);
        updated.updated_at = Some(chrono::Utc::now());
        *current = updated.clone();
        Ok(updated)
    }
}
