//! Listener registry and event delivery.
//!
//! Listeners are registered per [`EventType`] and are never removed.
//! [`Dispatcher::emit`] queues a fired event for a single background
//! delivery worker. The worker takes events in emission order and invokes
//! every listener for each type in registration order, so listeners see
//! occurrences in the order the engine fired them. Each invocation is
//! isolated: an error or panic is logged with the event's ID and type,
//! counted, and the next listener still runs.
//!
//! # Backpressure
//!
//! At most `max_concurrent_deliveries` events are queued or being delivered
//! at once. When all permits are taken, `emit` waits for one to free up,
//! which slows the tick that is emitting rather than letting the queue grow.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use tempo_types::{DispatchStats, EventType, FiredEvent, ListenerId};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, error, warn};

/// Hard ceiling on queued deliveries, whatever the configuration says.
pub const MAX_CONCURRENT_DELIVERIES: usize = 4_096;

/// A listener invocation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The listener reported a failure.
    #[error("handler failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// The listener panicked.
    #[error("handler panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl HandlerError {
    /// Build a [`HandlerError::Failed`] from any displayable error.
    pub fn failed(message: impl ToString) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }
}

/// Outcome of one listener invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// A listener for fired events.
///
/// Implementations perform their own side effects (typically a call into
/// an external collaborator) and report the outcome. Retries are the
/// implementation's concern; the dispatcher guarantees one delivery
/// attempt per fired event.
pub trait EventHandler: Send + Sync {
    /// Handle one fired event.
    fn handle(&self, event: FiredEvent) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as an [`EventHandler`].
pub const fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(FiredEvent) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler(f)
}

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(FiredEvent) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, event: FiredEvent) -> BoxFuture<'static, HandlerResult> {
        (self.0)(event).boxed()
    }
}

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    name: String,
    handler: Arc<dyn EventHandler>,
}

#[derive(Debug, Default)]
struct Counters {
    deliveries: AtomicU64,
    unhandled: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            deliveries: self.deliveries.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            handler_successes: self.successes.load(Ordering::Relaxed),
            handler_failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// One fired event waiting for the delivery worker.
struct Delivery {
    registrations: Vec<Registration>,
    event: FiredEvent,
    permit: OwnedSemaphorePermit,
}

/// Type-keyed listener registry with bounded, ordered, isolated delivery.
pub struct Dispatcher {
    listeners: RwLock<BTreeMap<EventType, Vec<Registration>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
    // Spawned on first emit so a dispatcher can be built outside a runtime.
    worker: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher allowing `max_concurrent_deliveries` events to be
    /// queued or delivering at once (clamped to
    /// `1..=MAX_CONCURRENT_DELIVERIES`).
    pub fn new(max_concurrent_deliveries: usize) -> Self {
        let capacity = max_concurrent_deliveries.clamp(1, MAX_CONCURRENT_DELIVERIES);
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(Counters::default()),
            worker: Mutex::new(None),
        }
    }

    /// Register a listener. Listeners for the same type run in
    /// registration order.
    pub fn subscribe(
        &self,
        event_type: EventType,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> ListenerId {
        let registration = Registration {
            id: ListenerId::new(),
            name: name.into(),
            handler,
        };
        let id = registration.id;
        debug!(listener = %registration.name, %event_type, listener_id = %id, "Listener subscribed");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(registration);
        id
    }

    /// Number of listeners registered for `event_type`.
    pub fn listener_count(&self, event_type: &EventType) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Names of the listeners for `event_type`, in invocation order.
    pub fn listener_names(&self, event_type: &EventType) -> Vec<String> {
        self.registrations_for(event_type)
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    /// Queue `event` for its listeners on the delivery worker.
    ///
    /// Events are delivered one at a time in the order they were emitted.
    /// Waits for a permit when the queue limit is reached. Returns the
    /// number of listeners the event was handed to.
    pub async fn emit(&self, event: FiredEvent) -> usize {
        let registrations = self.registrations_for(&event.event_type);
        if registrations.is_empty() {
            self.counters.unhandled.fetch_add(1, Ordering::Relaxed);
            debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No listeners registered; event has no effect"
            );
            return 0;
        }

        let count = registrations.len();
        self.counters.deliveries.fetch_add(1, Ordering::Relaxed);

        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                let delivery = Delivery {
                    registrations,
                    event,
                    permit,
                };
                if let Err(mpsc::error::SendError(delivery)) = self.worker_sender().send(delivery) {
                    warn!("Delivery worker gone; delivering inline");
                    let Delivery {
                        registrations,
                        event,
                        permit,
                    } = delivery;
                    deliver(registrations, event, Arc::clone(&self.counters), Some(permit)).await;
                }
            }
            Err(err) => {
                // The semaphore is never closed; deliver inline rather than drop.
                warn!(%err, "Delivery permits unavailable; delivering inline");
                deliver(registrations, event, Arc::clone(&self.counters), None).await;
            }
        }
        count
    }

    /// Number of events queued or being delivered.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.permits.available_permits())
    }

    /// Configured delivery concurrency limit.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until every queued delivery has finished.
    pub async fn wait_idle(&self) {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        // Holding every permit means nothing is in flight.
        if let Ok(permits) = self.permits.acquire_many(all).await {
            drop(permits);
        }
    }

    /// Cumulative counters.
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Sender for the delivery worker, spawning a fresh worker when none is
    /// running (first use, or its runtime has shut down).
    fn worker_sender(&self) -> mpsc::UnboundedSender<Delivery> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = worker.as_ref().filter(|sender| !sender.is_closed()) {
            return sender.clone();
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(receiver, Arc::clone(&self.counters)));
        *worker = Some(sender.clone());
        sender
    }

    fn registrations_for(&self, event_type: &EventType) -> Vec<Registration> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }
}

/// Drain the delivery queue in order until every sender is dropped.
async fn run_worker(mut receiver: mpsc::UnboundedReceiver<Delivery>, counters: Arc<Counters>) {
    while let Some(delivery) = receiver.recv().await {
        deliver(
            delivery.registrations,
            delivery.event,
            Arc::clone(&counters),
            Some(delivery.permit),
        )
        .await;
    }
}

/// Invoke each listener in order, isolating failures.
async fn deliver(
    registrations: Vec<Registration>,
    event: FiredEvent,
    counters: Arc<Counters>,
    permit: Option<OwnedSemaphorePermit>,
) {
    for registration in registrations {
        let handler = Arc::clone(&registration.handler);
        let invocation = event.clone();
        let outcome = AssertUnwindSafe(async move { handler.handle(invocation).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::Panicked {
                    message: panic_message(panic.as_ref()),
                })
            });

        match outcome {
            Ok(()) => {
                counters.successes.fetch_add(1, Ordering::Relaxed);
            }
            Err(err @ HandlerError::Failed { .. }) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    listener = %registration.name,
                    listener_id = %registration.id,
                    error = %err,
                    "Event handler failed"
                );
            }
            Err(err @ HandlerError::Panicked { .. }) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    listener = %registration.name,
                    listener_id = %registration.id,
                    error = %err,
                    "Event handler panicked"
                );
            }
        }
    }
    drop(permit);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
