//! Name-keyed fan-out of inbound events to registered handlers.
//!
//! [`EventRouter`] is cheap to clone; clones share the same handler table.
//! Registration returns a [`Subscription`] that removes the handler again.
//! Subscriptions hold only a weak reference to the table, so unsubscribing
//! after the router is gone is a silent no-op.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use crate::event::ServerEvent;

/// Callback invoked for every matching inbound event.
pub type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync + 'static>;

type HandlerTable = HashMap<String, Vec<(Uuid, Handler)>>;

#[derive(Default)]
struct RouterInner {
    handlers: Mutex<HandlerTable>,
}

impl RouterInner {
    fn remove(&self, event: &str, id: Uuid) -> bool {
        let mut table = self.handlers.lock();
        let Some(entries) = table.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            table.remove(event);
        }
        removed
    }
}

/// Routes inbound events to handlers registered by event name.
#[derive(Clone, Default)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `event`.
    ///
    /// Several handlers may share a name; they run in registration order.
    /// Accepts a plain name or an [`EventKind`](crate::event::EventKind).
    pub fn on<F>(&self, event: impl AsRef<str>, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let event = event.as_ref().to_owned();
        let id = Uuid::new_v4();
        self.inner
            .handlers
            .lock()
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(event = %event, "handler registered");
        Subscription {
            event,
            id,
            router: Arc::downgrade(&self.inner),
        }
    }

    /// Remove the handler behind `subscription`. Idempotent.
    pub fn off(&self, subscription: &Subscription) {
        self.inner.remove(&subscription.event, subscription.id);
    }

    /// Number of handlers currently registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner.handlers.lock().get(event).map_or(0, Vec::len)
    }

    /// Invoke every handler registered under the event's name.
    ///
    /// Handlers are snapshotted first, so a handler may (un)subscribe without
    /// deadlocking. A panicking handler is logged and skipped; the remaining
    /// handlers still run. Returns the number of handlers that completed.
    pub(crate) fn emit(&self, event: &ServerEvent) -> usize {
        let handlers: Vec<Handler> = match self.inner.handlers.lock().get(event.name()) {
            Some(entries) => entries.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let mut completed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => completed += 1,
                Err(_) => error!(event = %event.name(), "event handler panicked"),
            }
        }
        completed
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.handlers.lock();
        f.debug_struct("EventRouter")
            .field("events", &table.len())
            .finish()
    }
}

/// Handle returned by [`EventRouter::on`]; removes the handler when asked.
///
/// Dropping a `Subscription` does **not** unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    event: String,
    id: Uuid,
    router: Weak<RouterInner>,
}

impl Subscription {
    /// Event name this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the handler. Safe to call repeatedly and after the router has
    /// been dropped.
    pub fn unsubscribe(&self) {
        if let Some(router) = self.router.upgrade() {
            if router.remove(&self.event, self.id) {
                debug!(event = %self.event, "handler unsubscribed");
            }
        }
    }
}

impl std::fmt::Debug for RouterInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterInner").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn unknown(name: &str, n: i64) -> ServerEvent {
        ServerEvent::Unknown {
            name: name.into(),
            payload: json!(n),
        }
    }

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&'static str) -> Handler) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_for = Arc::clone(&log);
        let make = move |tag: &'static str| -> Handler {
            let log = Arc::clone(&log_for);
            Arc::new(move |ev: &ServerEvent| {
                let ServerEvent::Unknown { payload, .. } = ev else {
                    return;
                };
                log.lock().unwrap().push(format!("{tag}:{payload}"));
            })
        };
        (log, make)
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let router = EventRouter::new();
        let (log, make) = recorder();
        let first = make("a");
        let second = make("b");
        router.on("x", move |ev| first(ev));
        router.on("x", move |ev| second(ev));

        assert_eq!(router.emit(&unknown("x", 1)), 2);
        assert_eq!(router.emit(&unknown("x", 2)), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1", "a:2", "b:2"]);
    }

    #[test]
    fn other_names_are_not_invoked() {
        let router = EventRouter::new();
        let (log, make) = recorder();
        let h = make("a");
        router.on("x", move |ev| h(ev));

        assert_eq!(router.emit(&unknown("y", 1)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let router = EventRouter::new();
        let (log, make) = recorder();
        let h = make("a");
        let sub = router.on("x", move |ev| h(ev));

        router.emit(&unknown("x", 1));
        sub.unsubscribe();
        sub.unsubscribe();
        router.off(&sub);
        router.emit(&unknown("x", 2));

        assert_eq!(*log.lock().unwrap(), vec!["a:1"]);
        assert_eq!(router.handler_count("x"), 0);
    }

    #[test]
    fn unsubscribe_after_router_dropped_is_noop() {
        let router = EventRouter::new();
        let sub = router.on("x", |_| {});
        drop(router);
        sub.unsubscribe();
        sub.unsubscribe();
    }

    #[test]
    fn panicking_handler_does_not_block_siblings() {
        let router = EventRouter::new();
        let (log, make) = recorder();
        let after = make("after");
        router.on("x", |_| panic!("handler failure"));
        router.on("x", move |ev| after(ev));

        assert_eq!(router.emit(&unknown("x", 7)), 1);
        assert_eq!(*log.lock().unwrap(), vec!["after:7"]);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let router = EventRouter::new();
        let slot: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));
        let calls = Arc::new(StdMutex::new(0));

        let slot_in = Arc::clone(&slot);
        let calls_in = Arc::clone(&calls);
        let sub = router.on("x", move |_| {
            *calls_in.lock().unwrap() += 1;
            if let Some(sub) = slot_in.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        router.emit(&unknown("x", 1));
        router.emit(&unknown("x", 2));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn typed_kind_registration_matches_wire_name() {
        let router = EventRouter::new();
        let seen = Arc::new(StdMutex::new(None));
        let seen_in = Arc::clone(&seen);
        router.on(EventKind::UserCount, move |ev| {
            if let ServerEvent::UserCount(n) = ev {
                *seen_in.lock().unwrap() = Some(*n);
            }
        });

        router.emit(&ServerEvent::UserCount(9));
        assert_eq!(*seen.lock().unwrap(), Some(9));
    }
}
