//! Typed publish/subscribe event bus.
//!
//! Handlers register per event kind and are dispatched in registration
//! order. `publish` waits for every handler; a handler failure is
//! isolated (remaining handlers still run) and surfaced to the
//! publisher as an aggregate error. `publish_detached` is the
//! fire-and-forget variant: dispatch is spawned onto the runtime and
//! failures are re-published as `HandlerFailed` events so nothing is
//! silently lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::events::{Event, EventKind, EventPayload, SequenceNumber};

/// A subscriber capability invoked for each published event of its
/// registered kind.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and failure events.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &Event) -> DomainResult<()>;
}

/// One handler's failure during a dispatch.
struct HandlerFailure {
    handler: &'static str,
    error: DomainError,
}

/// Central dispatcher all components communicate through.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a handler for an event kind. Handlers for the same
    /// kind run in registration order.
    pub async fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(kind).or_default().push(handler);
        tracing::debug!(kind = %kind, "subscribed handler");
    }

    /// Publish an event and wait for all of its handlers.
    pub async fn publish(&self, event: Event) -> DomainResult<()> {
        let kind = event.kind();
        let (total, failures) = self.dispatch(event).await;
        if failures.is_empty() {
            return Ok(());
        }

        let details = failures
            .iter()
            .map(|f| format!("{}: {}", f.handler, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        Err(DomainError::HandlerFailures {
            kind: kind.to_string(),
            failed: failures.len(),
            total,
            details,
        })
    }

    /// Publish without waiting for handlers. Handler failures are
    /// converted into `HandlerFailed` events on the bus.
    pub fn publish_detached(self: &Arc<Self>, event: Event) {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let kind = event.kind();
            let correlation_id = event.correlation_id;
            let (_, failures) = bus.dispatch(event).await;
            for failure in failures {
                let report = Event::with_correlation(
                    EventPayload::HandlerFailed {
                        kind,
                        handler: failure.handler.to_string(),
                        error: failure.error.to_string(),
                    },
                    correlation_id,
                );
                if let Err(err) = bus.publish(report).await {
                    tracing::error!(kind = %kind, error = %err, "failed to report handler failure");
                }
            }
        });
    }

    /// Sequence number the next published event will receive.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    async fn dispatch(&self, mut event: Event) -> (usize, Vec<HandlerFailure>) {
        event.sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));

        // Snapshot under the read lock so handlers can publish
        // follow-up events without deadlocking the registry.
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let registry = self.handlers.read().await;
            registry.get(&event.kind()).cloned().unwrap_or_default()
        };

        let total = handlers.len();
        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(error) = handler.handle(&event).await {
                tracing::error!(
                    kind = %event.kind(),
                    handler = handler.name(),
                    correlation_id = %event.correlation_id,
                    error = %error,
                    "event handler failed"
                );
                failures.push(HandlerFailure {
                    handler: handler.name(),
                    error,
                });
            }
        }

        tracing::trace!(
            kind = %event.kind(),
            sequence = %event.sequence,
            handlers = total,
            "dispatched event"
        );
        (total, failures)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
