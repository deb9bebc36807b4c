//! Namespace allocation controller.
//!
//! The [`Controller`] follows namespace changes, feeds their names through a
//! [`WorkQueue`], and hands each name to a [`NamespaceSync`] implementation
//! on one of several worker tasks. Two implementations exist:
//!
//! - [`shared::SharedRecordAllocator`]: the pool lives in a shared,
//!   versioned record and is mutated with conditional writes, so several
//!   controller replicas can run at once. [`repair::Repair`] periodically
//!   rebuilds the record from namespace annotations.
//! - [`legacy::InProcessAllocator`]: the pool lives in this process and
//!   failed writes are undone through an explicit [`legacy::Transaction`].

pub mod legacy;
pub mod queue;
pub mod repair;
pub mod shared;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::allocator::AllocationError;
use crate::store::{NamespaceEvent, NamespaceStore, StoreError};

pub use queue::WorkQueue;
use repair::Repair;

/// Placeholder period for the informer's resync timer when resync is off.
const IDLE_RESYNC: Duration = Duration::from_secs(86_400);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from allocation and repair.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The shared record was written for a different range. Never
    /// reconciled automatically.
    #[error("the provided UID range {expected} does not match the allocation record's range {found}")]
    MismatchedRange {
        /// Range this controller is configured with.
        expected: String,
        /// Range recorded in the shared record.
        found: String,
    },

    /// Every block of the range is taken.
    #[error("the UID range {range} is full; you must widen the range in order to allocate more UIDs")]
    RangeExhausted {
        /// The exhausted range.
        range: String,
    },

    /// The shared record does not exist yet; repair creates it.
    #[error("cannot allocate resources from allocation record {record} at this time; it has not been created by repair")]
    RecordNotReady {
        /// Record name.
        record: String,
    },

    /// Conditional writes kept conflicting.
    #[error("unable to allocate for namespace {namespace} after {retries} retries")]
    RetriesExhausted {
        /// Namespace (or record) being written.
        namespace: String,
        /// Attempts made.
        retries: u32,
    },

    /// An allocation pool rejected an operation.
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A controller task panicked or was cancelled.
    #[error("controller task failed: {0}")]
    Task(String),
}

impl ControllerError {
    /// Whether the controller must stop rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MismatchedRange { .. } | Self::Task(_))
    }
}

// ---------------------------------------------------------------------------
// Sync interface
// ---------------------------------------------------------------------------

/// Brings one namespace to its allocated state.
#[async_trait]
pub trait NamespaceSync: Send + Sync {
    /// Allocate for namespace `name` if it has no allocation yet. A missing
    /// namespace is not an error.
    async fn sync(&self, name: &str) -> Result<(), ControllerError>;
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Watches namespaces and runs [`NamespaceSync`] for each change.
pub struct Controller {
    namespaces: Arc<dyn NamespaceStore>,
    sync: Arc<dyn NamespaceSync>,
    queue: WorkQueue<String>,
    workers: usize,
    max_retries: u32,
    resync: Option<Duration>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("workers", &self.workers)
            .field("max_retries", &self.max_retries)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// A controller running `workers` concurrent syncs; a failing namespace
    /// is retried `max_retries` times before it is dropped.
    pub fn new(
        namespaces: Arc<dyn NamespaceStore>,
        sync: Arc<dyn NamespaceSync>,
        workers: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            namespaces,
            sync,
            queue: WorkQueue::new(),
            workers: workers.max(1),
            max_retries,
            resync: None,
        }
    }

    /// Requeue every namespace each `period`, catching changes made by
    /// writers whose events this process does not see.
    pub fn with_resync(mut self, period: Duration) -> Self {
        self.resync = Some(period.max(Duration::from_millis(1)));
        self
    }

    /// Use `queue` instead of a default one.
    pub fn with_queue(mut self, queue: WorkQueue<String>) -> Self {
        self.queue = queue;
        self
    }

    /// The controller's work queue.
    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Queue every existing namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespaces cannot be listed.
    pub async fn enqueue_all(&self) -> Result<usize, StoreError> {
        enqueue_all(self.namespaces.as_ref(), &self.queue).await
    }

    /// Take one key from the queue and sync it.
    ///
    /// Returns `Ok(false)` once the queue is shut down.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned; others requeue the key.
    pub async fn process_next(&self) -> Result<bool, ControllerError> {
        let Some(key) = self.queue.get().await else {
            return Ok(false);
        };
        let result = self.sync.sync(&key).await;
        let outcome = match result {
            Ok(()) => {
                self.queue.forget(&key);
                Ok(true)
            }
            Err(e) if e.is_fatal() => {
                error!(namespace = %key, error = %e, "fatal allocation error");
                Err(e)
            }
            Err(e) => {
                if self.queue.num_requeues(&key) < self.max_retries {
                    warn!(namespace = %key, error = %e, "allocation failed; requeueing");
                    self.queue.add_rate_limited(key.clone());
                } else {
                    error!(namespace = %key, error = %e, "dropping namespace out of the queue");
                    self.queue.forget(&key);
                }
                Ok(true)
            }
        };
        self.queue.done(&key);
        outcome
    }

    /// Run the informer and workers until `shutdown` fires or a fatal error
    /// occurs.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ControllerError> {
        info!(workers = self.workers, "namespace controller started");

        let informer = tokio::spawn(run_informer(
            Arc::clone(&self.namespaces),
            self.queue.clone(),
            self.resync,
            shutdown.clone(),
        ));

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let this = Arc::clone(&self);
            workers.spawn(async move {
                while this.process_next().await? {}
                Ok::<(), ControllerError>(())
            });
        }

        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) => break Err(ControllerError::Task(e.to_string())),
                    None => break Ok(()),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
            }
        };

        self.queue.shut_down();
        informer.abort();
        while workers.join_next().await.is_some() {}

        info!("namespace controller stopped");
        outcome
    }

    /// Run the controller alongside the periodic `repair` loop until
    /// `shutdown` fires. Whichever stops first stops the other; a failed
    /// repair pass is returned as the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first repair failure or fatal controller error.
    pub async fn run_with_repair(
        self: Arc<Self>,
        repair: Repair,
        shutdown: &watch::Sender<bool>,
    ) -> Result<(), ControllerError> {
        let controller = self.run(shutdown.subscribe());
        let repair_loop = repair.run_until(shutdown.subscribe());
        tokio::pin!(controller, repair_loop);

        tokio::select! {
            outcome = &mut controller => {
                shutdown.send_replace(true);
                let repaired = repair_loop.await;
                outcome.and(repaired)
            }
            repaired = &mut repair_loop => {
                if let Err(e) = &repaired {
                    error!(error = %e, "repair failed; stopping the controller");
                }
                shutdown.send_replace(true);
                let outcome = controller.await;
                repaired.and(outcome)
            }
        }
    }
}

async fn enqueue_all(
    namespaces: &dyn NamespaceStore,
    queue: &WorkQueue<String>,
) -> Result<usize, StoreError> {
    let all = namespaces.list().await?;
    let count = all.len();
    for namespace in all {
        queue.add(namespace.name);
    }
    debug!(count, "queued all namespaces");
    Ok(count)
}

/// Queue every namespace, then every namespace that changes.
async fn run_informer(
    namespaces: Arc<dyn NamespaceStore>,
    queue: WorkQueue<String>,
    resync: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Subscribe before listing so no change slips between the two.
    let mut events = namespaces.watch();
    if let Err(e) = enqueue_all(namespaces.as_ref(), &queue).await {
        warn!(error = %e, "initial namespace list failed");
    }

    // The tick branch is disabled without a resync period.
    let period = resync.unwrap_or(IDLE_RESYNC);
    let start = tokio::time::Instant::now()
        .checked_add(period)
        .unwrap_or_else(tokio::time::Instant::now);
    let mut ticker = tokio::time::interval_at(start, period);

    loop {
        tokio::select! {
            _ = ticker.tick(), if resync.is_some() => {
                if let Err(e) = enqueue_all(namespaces.as_ref(), &queue).await {
                    warn!(error = %e, "namespace resync failed");
                }
            }
            event = events.recv() => match event {
                Ok(NamespaceEvent::Upserted(name)) => queue.add(name),
                Ok(NamespaceEvent::Deleted(name)) => debug!(namespace = %name, "namespace deleted"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "namespace watch lagged; relisting");
                    if let Err(e) = enqueue_all(namespaces.as_ref(), &queue).await {
                        warn!(error = %e, "namespace relist failed");
                    }
                }
                Err(RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("namespace informer stopped");
}
