//! # zigquant-bus
//!
//! In-process topic router: publish/subscribe, request/response, and
//! fire-and-forget commands (spec §4.A).
//!
//! Grounded on `barter-integration::channel` (the `Tx`/`ChannelTxDroppable`
//! pattern for a sender that silently disables itself once its receiver is
//! gone) and the reference pack's `event_bus` module (topic strings with a
//! priority/back-pressure policy chosen at subscribe time). The subscriber
//! table is copy-on-write behind a `parking_lot::RwLock<Arc<_>>`: publishers
//! take a snapshot `Arc` clone at the start of a publish and dispatch
//! against it, so registration changes during delivery are only observed
//! on the *next* publish (spec §4.A, §5).

pub mod topic;

use parking_lot::RwLock;
use std::{
    cell::Cell,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use topic::Topic;
use tracing::{debug, error, warn};
use zigquant_core::Event;

/// Maximum re-entrant `publish` call depth before the bus refuses to
/// recurse further (spec §4.A, §9 open question #1: resolved as
/// depth-first dispatch with a stack-depth cap).
pub const REENTRANCY_DEPTH_CAP: usize = 16;

thread_local! {
    static PUBLISH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no responder registered for topic '{0}'")]
    NoResponder(String),
    #[error("request to '{0}' timed out")]
    Timeout(String),
    #[error("handler returned an error: {0}")]
    Handler(String),
    #[error("handler panicked: {0}")]
    HandlerPanic(String),
    #[error("reentrant publish exceeded depth cap of {REENTRANCY_DEPTH_CAP}")]
    ReentrancyTooDeep,
}

/// Queue-full policy for a bounded subscriber (spec §4.A back-pressure).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BackpressurePolicy {
    /// Default for intra-core wiring: the publisher call itself *is* the
    /// handler invocation, so "blocking" degrades gracefully to running the
    /// handler synchronously to completion.
    BlockPublisher,
    /// Default for telemetry topics.
    DropOldest,
    DropNewest,
    Error,
}

pub type HandlerResult = Result<(), String>;
pub type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;
pub type Responder = Arc<dyn Fn(&Event) -> Result<Event, String> + Send + Sync>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    pattern: Topic,
    handler: Handler,
    is_responder: bool,
    #[allow(dead_code)]
    policy: BackpressurePolicy,
}

/// Handle returned by `subscribe`/`subscribe_responder`. `unsubscribe` is
/// idempotent — calling it twice, or on an id the bus no longer knows
/// about, is a no-op.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Subscription(SubscriptionId);

/// The in-process topic router described in spec §4.A.
pub struct MessageBus {
    table: RwLock<Arc<Vec<Entry>>>,
    next_id: AtomicU64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, entry: Entry) -> Subscription {
        let id = entry.id;
        let mut guard = self.table.write();
        let mut next = (**guard).clone();
        next.push(entry);
        *guard = Arc::new(next);
        Subscription(id)
    }

    /// Registers a handler for `pattern`. Ordering of handlers registered
    /// against the same pattern follows registration order (spec §4.A).
    pub fn subscribe<F>(&self, pattern: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_with_policy(pattern, BackpressurePolicy::BlockPublisher, handler)
    }

    pub fn subscribe_with_policy<F>(
        &self,
        pattern: impl Into<Topic>,
        policy: BackpressurePolicy,
        handler: F,
    ) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.insert(Entry {
            id,
            pattern: pattern.into(),
            handler: Arc::new(handler),
            is_responder: false,
            policy,
        })
    }

    /// Registers a `request`/`response` responder. Only the first
    /// registered responder for a matching topic is ever invoked by
    /// `request` (spec §4.A: "at most one handler registered as a
    /// responder on that topic").
    pub fn subscribe_responder<F>(&self, pattern: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<Event, String> + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        let responder: Responder = Arc::new(handler);
        self.insert(Entry {
            id,
            pattern: pattern.into(),
            handler: Arc::new(move |event| responder(event).map(|_| ())),
            is_responder: true,
            policy: BackpressurePolicy::BlockPublisher,
        })
    }

    /// Idempotent: removing an id that is not (or no longer) present is a
    /// no-op rather than an error.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut guard = self.table.write();
        if !guard.iter().any(|entry| entry.id == subscription.0) {
            return;
        }
        let next: Vec<Entry> = (**guard)
            .iter()
            .filter(|entry| entry.id != subscription.0)
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    /// Synchronous delivery to every handler subscribed to a pattern
    /// matching `topic`, in registration order. A handler error or panic
    /// is isolated (logged, and re-published on `system.error`) and does
    /// not abort delivery to sibling handlers.
    pub fn publish(&self, topic: impl Into<Topic>, event: Event) {
        self.dispatch(topic.into(), event, true)
    }

    /// Fire-and-forget: identical to `publish`, except the absence of any
    /// matching subscriber is not logged as noteworthy (spec §4.A).
    pub fn command(&self, topic: impl Into<Topic>, event: Event) {
        self.dispatch(topic.into(), event, false)
    }

    fn dispatch(&self, topic: Topic, event: Event, warn_if_unhandled: bool) {
        let depth = PUBLISH_DEPTH.with(|d| d.get());
        if depth >= REENTRANCY_DEPTH_CAP {
            error!(%topic, "publish aborted: {}", BusError::ReentrancyTooDeep);
            return;
        }
        PUBLISH_DEPTH.with(|d| d.set(depth + 1));
        let result = self.dispatch_inner(&topic, &event, warn_if_unhandled);
        PUBLISH_DEPTH.with(|d| d.set(depth));
        result
    }

    fn dispatch_inner(&self, topic: &Topic, event: &Event, warn_if_unhandled: bool) {
        // Copy-on-write snapshot: registration changes made by a handler
        // during this fanout are only visible on the *next* dispatch.
        let snapshot = self.table.read().clone();

        let mut delivered = 0usize;
        for entry in snapshot.iter() {
            if !topic.matches(&entry.pattern) {
                continue;
            }
            delivered += 1;

            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.handler)(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(message)) => {
                    warn!(%topic, subscriber = entry.id.0, %message, "bus handler returned an error");
                    self.emit_system_error(entry.id, message);
                }
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!(%topic, subscriber = entry.id.0, %message, "bus handler panicked");
                    self.emit_system_error(entry.id, message);
                }
            }
        }

        if delivered == 0 && warn_if_unhandled {
            debug!(%topic, "publish had no matching subscribers");
        }
    }

    fn emit_system_error(&self, subscriber: SubscriptionId, message: String) {
        self.dispatch(
            Topic::new("system.error"),
            Event::SystemError(zigquant_core::event::SystemErrorPayload {
                client_id: None,
                reason_code: format!("bus_handler_error::{}", subscriber.0),
                message,
            }),
            false,
        );
    }

    /// Delivers to at most one responder subscribed against a pattern
    /// matching `topic`. `timeout` bounds the call; since handlers in this
    /// bus run synchronously (spec §5: "MessageBus delivery itself is
    /// synchronous and non-suspending"), an overrun is detected only after
    /// the handler returns and is still reported as [`BusError::Timeout`]
    /// so callers can apply the documented retry/alerting policy.
    pub fn request(
        &self,
        topic: impl Into<Topic>,
        event: Event,
        timeout: Duration,
    ) -> Result<Event, BusError> {
        let topic = topic.into();
        let snapshot = self.table.read().clone();

        let entry = snapshot
            .iter()
            .find(|entry| entry.is_responder && topic.matches(&entry.pattern))
            .ok_or_else(|| BusError::NoResponder(topic.to_string()))?;

        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| (entry.handler)(&event)));
        let elapsed = started.elapsed();

        match outcome {
            Err(panic) => Err(BusError::HandlerPanic(panic_message(&panic))),
            Ok(Err(message)) => Err(BusError::Handler(message)),
            Ok(Ok(())) if elapsed > timeout => Err(BusError::Timeout(topic.to_string())),
            Ok(Ok(())) => Ok(event),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.table.read().len()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[test]
    fn publish_delivers_to_all_matching_subscribers_in_order() {
        let bus = MessageBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe("order.*", move |_| {
            o1.write().push(1);
            Ok(())
        });
        let o2 = order.clone();
        bus.subscribe("order.#", move |_| {
            o2.write().push(2);
            Ok(())
        });

        bus.publish("order.filled", Event::Shutdown);
        assert_eq!(*order.read(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = MessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus.subscribe("system.tick", move |_| {
            c.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        });

        bus.unsubscribe(sub);
        bus.unsubscribe(sub); // idempotent: no panic, no effect

        bus.publish("system.tick", Event::Tick { timestamp_ns: 1 });
        assert_eq!(count.load(AtomicOrdering::Relaxed), 0);
    }

    #[test]
    fn handler_error_does_not_abort_sibling_delivery() {
        let bus = MessageBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.subscribe("order.filled", |_| Err("boom".to_string()));
        let d = delivered.clone();
        bus.subscribe("order.filled", move |_| {
            d.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        });

        bus.publish("order.filled", Event::Shutdown);
        assert_eq!(delivered.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn handler_panic_is_isolated() {
        let bus = MessageBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.subscribe("order.filled", |_| panic!("handler bug"));
        let d = delivered.clone();
        bus.subscribe("order.filled", move |_| {
            d.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        });

        bus.publish("order.filled", Event::Shutdown);
        assert_eq!(delivered.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn request_with_no_responder_errors() {
        let bus = MessageBus::new();
        let result = bus.request("quote.get", Event::Shutdown, Duration::from_millis(10));
        assert!(matches!(result, Err(BusError::NoResponder(_))));
    }

    #[test]
    fn request_delivers_to_single_responder() {
        let bus = MessageBus::new();
        bus.subscribe_responder("quote.get", |_| Ok(Event::Tick { timestamp_ns: 42 }));
        let result = bus
            .request("quote.get", Event::Shutdown, Duration::from_secs(1))
            .unwrap();
        assert_eq!(result, Event::Tick { timestamp_ns: 42 });
    }

    #[test]
    fn reentrant_publish_is_capped() {
        let bus = Arc::new(MessageBus::new());
        let depth_seen = Arc::new(AtomicUsize::new(0));

        // A handler that republishes to its own topic recursively.
        let bus_clone = bus.clone();
        let d = depth_seen.clone();
        bus.subscribe("loop.me", move |event| {
            d.fetch_add(1, AtomicOrdering::Relaxed);
            bus_clone.publish("loop.me", event.clone());
            Ok(())
        });

        bus.publish("loop.me", Event::Shutdown);

        // Depth cap plus the initial call bounds the total recursive
        // invocations; it must not stack overflow or loop forever.
        assert!(depth_seen.load(AtomicOrdering::Relaxed) <= REENTRANCY_DEPTH_CAP + 1);
    }

    #[test]
    fn sibling_handlers_still_run_when_reentrancy_cap_trips() {
        let bus = Arc::new(MessageBus::new());
        let sibling_ran = Arc::new(AtomicUsize::new(0));

        let bus_clone = bus.clone();
        bus.subscribe("loop.me", move |event| {
            bus_clone.publish("loop.me", event.clone());
            Ok(())
        });
        let s = sibling_ran.clone();
        bus.subscribe("loop.me", move |_| {
            s.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        });

        bus.publish("loop.me", Event::Shutdown);
        assert!(sibling_ran.load(AtomicOrdering::Relaxed) >= 1);
    }
}
