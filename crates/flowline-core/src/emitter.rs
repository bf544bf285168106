// In-process event bus
//
// Pub/sub primitive decoupling the execution engine from the streaming
// layer. Subscribers receive events over unbounded channels, so a slow
// or failed consumer never reaches the publisher. Senders are cloned
// under the lock and used outside it.
//
// This is NOT for distributed systems. For horizontal scaling, replace
// with an external broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::events::ExecutionEvent;

/// Receiving half of a subscription
pub type EventReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Global,
    Execution(String),
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    global: HashMap<u64, mpsc::UnboundedSender<ExecutionEvent>>,
    scoped: HashMap<String, HashMap<u64, mpsc::UnboundedSender<ExecutionEvent>>>,
}

/// In-process pub/sub event bus.
///
/// Two subscription scopes: global (every event) and execution-scoped
/// (only events whose execution id matches). Dropping the returned
/// subscription unsubscribes.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(EventBus::default())
    }

    /// Subscribe to all events
    pub fn subscribe_all(self: &Arc<Self>) -> EventSubscription {
        self.register(Scope::Global)
    }

    /// Subscribe to events for a specific execution
    pub fn subscribe(self: &Arc<Self>, execution_id: impl Into<String>) -> EventSubscription {
        self.register(Scope::Execution(execution_id.into()))
    }

    fn register(self: &Arc<Self>, scope: Scope) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let id = inner.next_id;
            inner.next_id += 1;
            match &scope {
                Scope::Global => {
                    inner.global.insert(id, tx);
                }
                Scope::Execution(execution_id) => {
                    inner
                        .scoped
                        .entry(execution_id.clone())
                        .or_default()
                        .insert(id, tx);
                }
            }
            id
        };

        EventSubscription {
            id,
            scope,
            bus: Arc::clone(self),
            receiver: rx,
        }
    }

    /// Emit an event to all matching subscribers.
    ///
    /// Sends to closed channels are collected and pruned; a dead
    /// subscriber never affects the publisher or its peers.
    pub fn emit(&self, event: ExecutionEvent) {
        let targets: Vec<(u64, Option<String>, mpsc::UnboundedSender<ExecutionEvent>)> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

            let mut targets: Vec<_> = inner
                .global
                .iter()
                .map(|(id, tx)| (*id, None, tx.clone()))
                .collect();

            if let Some(scoped) = inner.scoped.get(&event.execution_id) {
                targets.extend(
                    scoped
                        .iter()
                        .map(|(id, tx)| (*id, Some(event.execution_id.clone()), tx.clone())),
                );
            }

            targets
        };

        let mut dead: Vec<(u64, Option<String>)> = Vec::new();
        for (id, execution_id, tx) in targets {
            if tx.send(event.clone()).is_err() {
                dead.push((id, execution_id));
            }
        }

        if !dead.is_empty() {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            for (id, execution_id) in dead {
                match execution_id {
                    None => {
                        inner.global.remove(&id);
                    }
                    Some(execution_id) => {
                        if let Some(scoped) = inner.scoped.get_mut(&execution_id) {
                            scoped.remove(&id);
                            if scoped.is_empty() {
                                inner.scoped.remove(&execution_id);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Remove all execution-scoped subscriptions for an execution
    pub fn clear_execution(&self, execution_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.scoped.remove(execution_id);
    }

    /// Total number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.global.len() + inner.scoped.values().map(|s| s.len()).sum::<usize>()
    }

    fn unregister(&self, id: u64, scope: &Scope) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match scope {
            Scope::Global => {
                inner.global.remove(&id);
            }
            Scope::Execution(execution_id) => {
                if let Some(scoped) = inner.scoped.get_mut(execution_id) {
                    scoped.remove(&id);
                    if scoped.is_empty() {
                        inner.scoped.remove(execution_id);
                    }
                }
            }
        }
    }
}

/// An active subscription. Unsubscribes when dropped.
pub struct EventSubscription {
    id: u64,
    scope: Scope,
    bus: Arc<EventBus>,
    pub receiver: EventReceiver,
}

impl EventSubscription {
    /// Receive the next event, or None once unsubscribed/cleared
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        self.receiver.recv().await
    }

    /// Explicitly unsubscribe (equivalent to dropping)
    pub fn unsubscribe(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.bus.unregister(self.id, &self.scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{node_queued, EventType};

    #[tokio::test]
    async fn test_global_subscription_receives_all_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_all();

        bus.emit(node_queued("exec-1", "a"));
        bus.emit(node_queued("exec-2", "b"));

        assert_eq!(sub.recv().await.unwrap().execution_id, "exec-1");
        assert_eq!(sub.recv().await.unwrap().execution_id, "exec-2");
    }

    #[tokio::test]
    async fn test_scoped_subscription_filters_by_execution() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("exec-1");

        bus.emit(node_queued("exec-2", "x"));
        bus.emit(node_queued("exec-1", "a"));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.execution_id, "exec-1");
        assert_eq!(event.event_type, EventType::NodeQueued);
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_all();

        bus.emit(node_queued("exec-1", "a"));
        assert!(sub.recv().await.is_some());

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        // Emitting into the void must not panic
        bus.emit(node_queued("exec-1", "b"));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_pruned_on_emit() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("exec-1");
        // Simulate a dead consumer without unsubscribing
        sub.receiver.close();

        bus.emit(node_queued("exec-1", "a"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_execution_discards_scoped_handlers() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("exec-1");

        bus.clear_execution("exec-1");
        bus.emit(node_queued("exec-1", "a"));

        // Channel is closed once the sender side is dropped by clear
        assert!(sub.recv().await.is_none());
    }
}
