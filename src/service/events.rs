//! Status and message broadcast
//!
//! Listeners are called synchronously on the coordinator task, in
//! registration order. Each registration returns a [`ListenerHandle`] that
//! can remove it again. A panicking listener is logged and skipped; the
//! other listeners still receive the event.

use super::registry::panic_message;
use super::state_machine::ConnectionStatus;
use crate::protocol::Payload;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::error;

/// Listener for connection status changes
pub type StatusListener = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Listener for every inbound message, regardless of topic
pub type MessageListener = Arc<dyn Fn(&str, &Payload) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Status,
    Message,
}

#[derive(Default)]
struct Listeners {
    status: Vec<(u64, StatusListener)>,
    message: Vec<(u64, MessageListener)>,
}

/// Fan-out of status and message events to registered listeners
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Listeners>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // Listeners never run while the lock is held, so a poisoned lock only
    // means a panic elsewhere; the list itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn on_status_change(self: &Arc<Self>, listener: StatusListener) -> ListenerHandle {
        let id = self.next_id();
        self.lock().status.push((id, listener));
        ListenerHandle::new(self, id, ListenerKind::Status)
    }

    pub fn on_message(self: &Arc<Self>, listener: MessageListener) -> ListenerHandle {
        let id = self.next_id();
        self.lock().message.push((id, listener));
        ListenerHandle::new(self, id, ListenerKind::Message)
    }

    fn remove(&self, id: u64, kind: ListenerKind) -> bool {
        let mut listeners = self.lock();
        match kind {
            ListenerKind::Status => remove_by_id(&mut listeners.status, id),
            ListenerKind::Message => remove_by_id(&mut listeners.message, id),
        }
    }

    pub fn status_listener_count(&self) -> usize {
        self.lock().status.len()
    }

    pub fn message_listener_count(&self) -> usize {
        self.lock().message.len()
    }

    /// Notify every status listener; returns how many returned normally
    pub fn emit_status(&self, status: &ConnectionStatus) -> usize {
        // Snapshot so listeners may register or remove listeners
        let snapshot: Vec<StatusListener> = self
            .lock()
            .status
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(status))) {
                Ok(()) => delivered += 1,
                Err(panic) => error!(
                    status = %status,
                    panic = %panic_message(panic.as_ref()),
                    "Status listener panicked"
                ),
            }
        }
        delivered
    }

    /// Notify every message listener; returns how many returned normally
    pub fn emit_message(&self, topic: &str, payload: &Payload) -> usize {
        let snapshot: Vec<MessageListener> = self
            .lock()
            .message
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(topic, payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => error!(
                    topic,
                    panic = %panic_message(panic.as_ref()),
                    "Message listener panicked"
                ),
            }
        }
        delivered
    }
}

fn remove_by_id<T>(list: &mut Vec<(u64, T)>, id: u64) -> bool {
    let before = list.len();
    list.retain(|(existing, _)| *existing != id);
    list.len() != before
}

/// Registration of one listener; call [`ListenerHandle::remove`] to unregister
///
/// Dropping the handle leaves the listener registered.
#[derive(Debug)]
#[must_use = "keep the handle to be able to remove the listener"]
pub struct ListenerHandle {
    bus: Weak<EventBus>,
    id: u64,
    kind: ListenerKind,
}

impl ListenerHandle {
    fn new(bus: &Arc<EventBus>, id: u64, kind: ListenerKind) -> Self {
        Self {
            bus: Arc::downgrade(bus),
            id,
            kind,
        }
    }

    /// Unregister the listener; returns false if it was already gone
    pub fn remove(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.id, self.kind),
            None => false,
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("status_listeners", &self.status_listener_count())
            .field("message_listeners", &self.message_listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_recorder(bus: &Arc<EventBus>) -> (Arc<Mutex<Vec<String>>>, ListenerHandle) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = bus.on_status_change(Arc::new(move |status: &ConnectionStatus| {
            sink.lock().unwrap().push(status.to_string());
        }));
        (seen, handle)
    }

    #[test]
    fn test_status_listeners_called_in_order() {
        let bus = Arc::new(EventBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            let _ = bus.on_status_change(Arc::new(move |_: &ConnectionStatus| {
                order.lock().unwrap().push(n);
            }));
        }

        assert_eq!(bus.emit_status(&ConnectionStatus::Connected), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_status_listener_is_isolated() {
        let bus = Arc::new(EventBus::new());
        let (before, _h1) = status_recorder(&bus);
        let _h2 = bus.on_status_change(Arc::new(|_: &ConnectionStatus| panic!("listener bug")));
        let (after, _h3) = status_recorder(&bus);

        let delivered = bus.emit_status(&ConnectionStatus::Disconnected);

        assert_eq!(delivered, 2);
        assert_eq!(*before.lock().unwrap(), vec!["disconnected"]);
        assert_eq!(*after.lock().unwrap(), vec!["disconnected"]);
    }

    #[test]
    fn test_handle_removes_listener() {
        let bus = Arc::new(EventBus::new());
        let (seen, handle) = status_recorder(&bus);

        bus.emit_status(&ConnectionStatus::Connecting);
        assert!(handle.remove());
        bus.emit_status(&ConnectionStatus::Connected);

        assert_eq!(*seen.lock().unwrap(), vec!["connecting"]);
        assert_eq!(bus.status_listener_count(), 0);
    }

    #[test]
    fn test_handle_outliving_bus() {
        let bus = Arc::new(EventBus::new());
        let handle = bus.on_message(Arc::new(|_: &str, _: &Payload| {}));
        drop(bus);
        assert!(!handle.remove());
    }

    #[test]
    fn test_listener_may_register_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = bus.clone();
        let _ = bus.on_status_change(Arc::new(move |_: &ConnectionStatus| {
            let _ = inner_bus.on_status_change(Arc::new(|_: &ConnectionStatus| {}));
        }));

        // Newly added listeners join from the next event on
        assert_eq!(bus.emit_status(&ConnectionStatus::Connecting), 1);
        assert_eq!(bus.status_listener_count(), 2);
    }

    #[test]
    fn test_message_listeners_receive_topic_and_payload() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _ = bus.on_message(Arc::new(move |topic: &str, payload: &Payload| {
            sink.lock().unwrap().push((topic.to_string(), payload.clone()));
        }));

        bus.emit_message("ricebot/alerts", &Payload::Text("hello".to_string()));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(
                "ricebot/alerts".to_string(),
                Payload::Text("hello".to_string())
            )]
        );
    }
}
