// WebSocket subscription hub
//
// Tracks authenticated subscriber sessions and routes execution events
// to the sessions subscribed to them. Tenant isolation is enforced at
// subscribe time: a session may only subscribe to executions owned by
// its own tenant, and an unknown execution is indistinguishable from a
// forbidden one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowline_core::{EventBus, ExecutionEvent};
use flowline_engine::ExecutionTenantRegistry;
use flowline_storage::ExecutionStore;

use crate::auth::AuthContext;

/// Outbound sink for one session
type SessionSink = mpsc::UnboundedSender<Value>;

struct Session {
    id: String,
    tenant_id: String,
    #[allow(dead_code)]
    user_id: String,
    sink: SessionSink,
    subscriptions: HashSet<String>,
}

impl Session {
    /// Returns false when the sink is gone (client disconnected)
    fn send(&self, message: Value) -> bool {
        self.sink.send(message).is_ok()
    }

    fn send_ack(&self, action: &str, execution_id: &str) -> bool {
        self.send(json!({
            "event": "ACK",
            "action": action,
            "executionId": execution_id,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }

    fn send_error(&self, error: &str, context: Value) -> bool {
        self.send(json!({
            "event": "ERROR",
            "error": error,
            "context": context,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<String, Session>,
    /// execution id -> session ids
    execution_subscribers: HashMap<String, HashSet<String>>,
    /// execution id -> tenant id, registered at execution creation
    execution_tenants: HashMap<String, String>,
}

/// Manages subscriber sessions and event routing
pub struct SubscriptionHub {
    executions: Arc<ExecutionStore>,
    inner: Mutex<HubInner>,
}

impl SubscriptionHub {
    pub fn new(executions: Arc<ExecutionStore>) -> Arc<Self> {
        Arc::new(SubscriptionHub {
            executions,
            inner: Mutex::new(HubInner::default()),
        })
    }

    /// Subscribe globally to the event bus and relay events to
    /// subscribed sessions until the bus is dropped.
    pub fn start(self: &Arc<Self>, events: &Arc<EventBus>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let mut subscription = events.subscribe_all();

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                hub.route_event(&event);
            }
            debug!("Hub relay task exited");
        })
    }

    /// Register a new session. Returns the session id and the stream
    /// of outbound messages for the transport to pump.
    pub fn connect(&self, auth: &AuthContext) -> (String, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Uuid::now_v7().to_string();

        let session = Session {
            id: session_id.clone(),
            tenant_id: auth.tenant_id.clone(),
            user_id: auth.user_id.clone(),
            sink: tx,
            subscriptions: HashSet::new(),
        };

        session.send(json!({
            "event": "CONNECTED",
            "connectionId": session_id,
            "userId": auth.user_id,
            "tenantId": auth.tenant_id,
            "role": auth.role.as_str(),
        }));

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sessions.insert(session_id.clone(), session);

        info!(session_id = %session_id, tenant_id = %auth.tenant_id, "Subscriber session opened");
        (session_id, rx)
    }

    /// Remove a session and all of its subscriptions
    pub fn disconnect(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let Some(session) = inner.sessions.remove(session_id) else {
            return;
        };

        for execution_id in &session.subscriptions {
            if let Some(subscribers) = inner.execution_subscribers.get_mut(execution_id) {
                subscribers.remove(session_id);
                if subscribers.is_empty() {
                    inner.execution_subscribers.remove(execution_id);
                }
            }
        }

        info!(session_id = %session_id, "Subscriber session closed");
    }

    /// Subscribe a session to an execution's events.
    ///
    /// Denied (with an ERROR message to the session) when the
    /// execution is unknown or belongs to another tenant.
    pub async fn subscribe(&self, session_id: &str, execution_id: &str) -> bool {
        let (session_tenant, cached_tenant) = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(session) = inner.sessions.get(session_id) else {
                return false;
            };
            (
                session.tenant_id.clone(),
                inner.execution_tenants.get(execution_id).cloned(),
            )
        };

        // Fall back to the execution store when the execution was not
        // registered through the side channel
        let execution_tenant = match cached_tenant {
            Some(tenant) => Some(tenant),
            None => self.executions.tenant_id(execution_id).await,
        };

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = inner.sessions.get(session_id) else {
            return false;
        };

        let Some(execution_tenant) = execution_tenant else {
            session.send_error("Execution not found", json!({ "executionId": execution_id }));
            return false;
        };

        if execution_tenant != session_tenant {
            warn!(
                session_id = %session_id,
                execution_id = %execution_id,
                "Cross-tenant subscription denied"
            );
            session.send_error(
                "Access denied: execution belongs to different tenant",
                json!({ "executionId": execution_id }),
            );
            return false;
        }

        inner
            .execution_tenants
            .insert(execution_id.to_string(), execution_tenant);

        let newly_subscribed = match inner.sessions.get_mut(session_id) {
            Some(session) => {
                let newly = session.subscriptions.insert(execution_id.to_string());
                // Re-subscribing acknowledges idempotently
                session.send_ack("subscribe", execution_id);
                newly
            }
            None => return false,
        };

        if newly_subscribed {
            inner
                .execution_subscribers
                .entry(execution_id.to_string())
                .or_default()
                .insert(session_id.to_string());
        }

        true
    }

    /// Unsubscribe a session from an execution's events
    pub fn unsubscribe(&self, session_id: &str, execution_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let Some(session) = inner.sessions.get_mut(session_id) else {
            return false;
        };
        if !session.subscriptions.remove(execution_id) {
            return false;
        }
        session.send_ack("unsubscribe", execution_id);

        if let Some(subscribers) = inner.execution_subscribers.get_mut(execution_id) {
            subscribers.remove(session_id);
            if subscribers.is_empty() {
                inner.execution_subscribers.remove(execution_id);
            }
        }

        true
    }

    /// Handle a client control message:
    /// { "action": "subscribe"|"unsubscribe", "executionId": "..." }
    pub async fn handle_message(&self, session_id: &str, data: Value) {
        let action = data.get("action").and_then(Value::as_str).map(String::from);
        let execution_id = data
            .get("executionId")
            .and_then(Value::as_str)
            .map(String::from);

        let Some(action) = action else {
            self.send_session_error(session_id, "Missing 'action' field", json!({}));
            return;
        };

        match action.as_str() {
            "subscribe" => match execution_id {
                Some(execution_id) => {
                    self.subscribe(session_id, &execution_id).await;
                }
                None => self.send_session_error(
                    session_id,
                    "Missing 'executionId' field",
                    json!({ "action": action }),
                ),
            },
            "unsubscribe" => match execution_id {
                Some(execution_id) => {
                    self.unsubscribe(session_id, &execution_id);
                }
                None => self.send_session_error(
                    session_id,
                    "Missing 'executionId' field",
                    json!({ "action": action }),
                ),
            },
            other => self.send_session_error(
                session_id,
                &format!("Unknown action: {other}"),
                json!({ "validActions": ["subscribe", "unsubscribe"] }),
            ),
        }
    }

    /// Route one event to every session subscribed to its execution.
    /// Sessions whose sink has failed are disconnected.
    fn route_event(&self, event: &ExecutionEvent) {
        let dead: Vec<String> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

            let Some(subscribers) = inner.execution_subscribers.get(&event.execution_id) else {
                return;
            };

            subscribers
                .iter()
                .filter_map(|session_id| inner.sessions.get(session_id))
                .filter(|session| !session.send(event.to_message()))
                .map(|session| session.id.clone())
                .collect()
        };

        for session_id in dead {
            warn!(session_id = %session_id, "Subscriber sink failed, disconnecting");
            self.disconnect(&session_id);
        }
    }

    fn send_session_error(&self, session_id: &str, error: &str, context: Value) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = inner.sessions.get(session_id) {
            session.send_error(error, context);
        }
    }

    /// Side channel used at execution creation so subscribe requests
    /// can be authorized before the first event arrives
    pub fn register_tenant(&self, execution_id: &str, tenant_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .execution_tenants
            .insert(execution_id.to_string(), tenant_id.to_string());
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sessions.len()
    }

    /// Total number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .execution_subscribers
            .values()
            .map(|s| s.len())
            .sum()
    }
}

impl ExecutionTenantRegistry for SubscriptionHub {
    fn register_execution_tenant(&self, execution_id: &str, tenant_id: &str) {
        self.register_tenant(execution_id, tenant_id);
    }
}
