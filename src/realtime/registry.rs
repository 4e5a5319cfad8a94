//! Handler registry keyed by [`EventKind`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use smallvec::SmallVec;

use super::message::{EventKind, RealtimeEvent};

pub type Handler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Token returned by `on`, used to remove that handler later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerList = SmallVec<[(HandlerId, Handler); 4]>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<EventKind, HandlerList>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; handlers for a kind run in registration order.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false when no such handler was registered for `kind`.
    pub fn remove(&self, kind: EventKind, id: HandlerId) -> bool {
        let Some(mut list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;

        if list.is_empty() {
            drop(list);
            self.handlers.remove_if(&kind, |_, list| list.is_empty());
        }
        removed
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(|list| list.len()).unwrap_or(0)
    }

    /// Invoke every handler for the event's kind and return how many ran.
    ///
    /// The handler list is snapshotted first, so handlers may register or
    /// remove handlers without deadlocking. A panicking handler is logged and
    /// the rest still run.
    pub fn dispatch(&self, event: &RealtimeEvent) -> usize {
        let kind = event.kind();
        let snapshot: HandlerList = match self.handlers.get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        for (id, handler) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    event_type = kind.as_str(),
                    handler_id = id.0,
                    "Realtime handler panicked"
                );
            }
        }

        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::message::ServerEvent;
    use std::sync::Mutex;

    fn pong() -> RealtimeEvent {
        RealtimeEvent::Server(ServerEvent::Pong)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            registry.on(EventKind::Pong, move |_| calls.lock().unwrap().push(name));
        }

        assert_eq!(registry.dispatch(&pong()), 3);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_only_targets_one_handler() {
        let registry = HandlerRegistry::new();
        let a = registry.on(EventKind::Pong, |_| {});
        let b = registry.on(EventKind::Pong, |_| {});

        assert!(!registry.remove(EventKind::Typing, a));
        assert!(registry.remove(EventKind::Pong, a));
        assert!(!registry.remove(EventKind::Pong, a));
        assert_eq!(registry.handler_count(EventKind::Pong), 1);

        assert!(registry.remove(EventKind::Pong, b));
        assert_eq!(registry.handler_count(EventKind::Pong), 0);
        assert_eq!(registry.dispatch(&pong()), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let registry = HandlerRegistry::new();
        let reached = Arc::new(Mutex::new(false));

        registry.on(EventKind::Pong, |_| panic!("handler bug"));
        let flag = reached.clone();
        registry.on(EventKind::Pong, move |_| *flag.lock().unwrap() = true);

        assert_eq!(registry.dispatch(&pong()), 2);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_handler_can_unregister_itself() {
        let registry = Arc::new(HandlerRegistry::new());
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let inner = registry.clone();
        let own = slot.clone();
        let id = registry.on(EventKind::Pong, move |_| {
            if let Some(id) = *own.lock().unwrap() {
                inner.remove(EventKind::Pong, id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        registry.dispatch(&pong());
        assert_eq!(registry.handler_count(EventKind::Pong), 0);
    }
}
