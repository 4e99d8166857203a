//! In-process event bus for the cognitive loop.
//!
//! Producers (heartbeat, user input, plugins) are decoupled from consumers
//! (emotion engine, memory, intent) through string-keyed events. Delivery is
//! synchronous on the publishing thread and follows global registration order,
//! so emotion/memory state stays a pure function of the event stream plus
//! elapsed time.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;

/// How many recently published event ids are remembered for dedupe.
const SEEN_CAPACITY: usize = 4096;

/// An immutable event. Kind is an open string namespace (`user.message`,
/// `memory.stored`, `heartbeat.tick`, `emotion.updated`, plugin-defined kinds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build a new event. An empty kind or the reserved wildcard `"*"` is
    /// rejected with no state change.
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(CoreError::Validation("event kind must not be empty".into()));
        }
        if kind == WILDCARD {
            return Err(CoreError::Validation(
                "event kind '*' is reserved for subscriptions".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            source: source.into(),
            timestamp: Utc::now(),
        })
    }
}

/// Subscription pattern matching every event kind.
pub const WILDCARD: &str = "*";

/// Handler capability. Failures are captured by the bus, never propagated to
/// the publisher.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`], usable for
/// [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// A captured handler failure, retrievable via [`EventBus::take_failures`].
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub subscription: SubscriptionHandle,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

struct Subscription {
    id: u64,
    pattern: String,
    handler: Handler,
}

struct BusInner {
    subs: Vec<Subscription>,
    next_id: u64,
    seen: HashSet<Uuid>,
    seen_order: VecDeque<Uuid>,
    failures: Vec<HandlerFailure>,
}

/// Synchronous publish/subscribe router.
///
/// Delivery order is the global registration order of matching subscriptions
/// (a wildcard subscriber registered before an exact one fires first). No lock
/// is held while handlers run, so handlers may publish follow-up events
/// without deadlocking.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subs: Vec::new(),
                next_id: 0,
                seen: HashSet::new(),
                seen_order: VecDeque::new(),
                failures: Vec::new(),
            }),
        }
    }

    /// Register a handler for an exact kind or the wildcard `"*"`.
    pub fn subscribe(&self, pattern: impl Into<String>, handler: Handler) -> SubscriptionHandle {
        let pattern = pattern.into();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        debug!(pattern = %pattern, subscription = id, "EventBus subscription registered");
        inner.subs.push(Subscription {
            id,
            pattern,
            handler,
        });
        SubscriptionHandle(id)
    }

    /// Remove a subscription. Idempotent: unsubscribing an already-removed
    /// handle is a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.lock();
        inner.subs.retain(|s| s.id != handle.0);
    }

    /// Deliver an event synchronously to every matching handler in
    /// registration order. Returns the number of handlers invoked. A failing
    /// handler is recorded and logged; delivery continues to the rest.
    ///
    /// Re-publishing an event id already seen is suppressed and returns 0.
    pub fn publish(&self, event: &Event) -> usize {
        let matching: Vec<(u64, Handler)> = {
            let mut inner = self.lock();
            if inner.seen.contains(&event.id) {
                debug!(kind = %event.kind, id = %event.id, "Duplicate event suppressed");
                return 0;
            }
            inner.seen.insert(event.id);
            inner.seen_order.push_back(event.id);
            if inner.seen_order.len() > SEEN_CAPACITY {
                if let Some(old) = inner.seen_order.pop_front() {
                    inner.seen.remove(&old);
                }
            }
            inner
                .subs
                .iter()
                .filter(|s| s.pattern == WILDCARD || s.pattern == event.kind)
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect()
        };

        let mut failures = Vec::new();
        for (id, handler) in &matching {
            if let Err(e) = handler(event) {
                warn!(
                    kind = %event.kind,
                    subscription = id,
                    error = %e,
                    "Event handler failed, continuing delivery"
                );
                failures.push(HandlerFailure {
                    subscription: SubscriptionHandle(*id),
                    kind: event.kind.clone(),
                    message: e.to_string(),
                    at: Utc::now(),
                });
            }
        }
        if !failures.is_empty() {
            self.lock().failures.extend(failures);
        }
        matching.len()
    }

    /// Drain captured handler failures since the last call.
    pub fn take_failures(&self) -> Vec<HandlerFailure> {
        std::mem::take(&mut self.lock().failures)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().subs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().expect("event bus lock poisoned")
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: &str) -> Event {
        Event::new(kind, json!({}), "test").unwrap()
    }

    #[test]
    fn test_empty_kind_rejected() {
        assert!(Event::new("", json!({}), "test").is_err());
        assert!(Event::new("  ", json!({}), "test").is_err());
        assert!(Event::new("*", json!({}), "test").is_err());
    }

    #[test]
    fn test_publish_reaches_exact_and_wildcard() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        bus.subscribe(
            "user.message",
            Arc::new(move |_| {
                h1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let h2 = Arc::clone(&hits);
        bus.subscribe(
            WILDCARD,
            Arc::new(move |_| {
                h2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        assert_eq!(bus.publish(&event("user.message")), 2);
        assert_eq!(bus.publish(&event("heartbeat.tick")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delivery_follows_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let o = Arc::clone(&order);
            bus.subscribe(
                "user.message",
                Arc::new(move |_| {
                    o.lock().unwrap().push(tag);
                    Ok(())
                }),
            );
        }

        bus.publish(&event("user.message"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            "user.message",
            Arc::new(|_| Err(anyhow::anyhow!("boom"))),
        );
        let h = Arc::clone(&hits);
        bus.subscribe(
            "user.message",
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        assert_eq!(bus.publish(&event("user.message")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let failures = bus.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, "user.message");
        assert!(bus.take_failures().is_empty());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let gone = bus.subscribe(
            "user.message",
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let h = Arc::clone(&hits);
        bus.subscribe(
            "user.message",
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.unsubscribe(gone);
        bus.unsubscribe(gone);
        assert_eq!(bus.subscription_count(), 1);

        bus.publish(&event("user.message"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_event_id_suppressed() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(
            WILDCARD,
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let ev = event("user.message");
        assert_eq!(bus.publish(&ev), 1);
        assert_eq!(bus.publish(&ev), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_publish_followup() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let b = Arc::clone(&bus);
        bus.subscribe(
            "user.message",
            Arc::new(move |_| {
                let follow = Event::new("emotion.updated", json!({}), "emotion")?;
                b.publish(&follow);
                Ok(())
            }),
        );
        let h = Arc::clone(&hits);
        bus.subscribe(
            "emotion.updated",
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish(&event("user.message"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
