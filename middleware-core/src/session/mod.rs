//! Session/client controller.
//!
//! One controller per remote engine (market-data, order-execution). It
//! owns the connect/handshake/teardown lifecycle: sending the bootstrap
//! app-ID inquiry, qualifying and binding the per-channel queues,
//! publishing the app-info handshake, driving the heartbeat monitor and
//! converting a liveness failure into a full teardown. Reconnecting after
//! a teardown is the caller's responsibility.

use crate::comms::bus::MessageBus;
use crate::comms::envelope::Envelope;
use crate::comms::routing::RoutingTable;
use crate::config::ParamStore;
use crate::correlator::{Correlator, ResponseHandler};
use crate::heartbeat::{HeartbeatMonitor, DEFAULT_GRACE};
use anyhow::Result;
use log::{error, info, warn};
use middleware_api::model::{AppInfo, Channel, InquiryResponse, MessageKind};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    RequestingAppId,
    Connected,
    Disconnecting,
}

/// Static configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Label of the remote engine, used for logging and the inquiry
    /// payload (e.g. "market-data", "order-execution").
    pub engine: String,
    /// Grace period added to the server heartbeat interval before the
    /// connection is declared dead.
    pub grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: "engine".to_string(),
            grace: DEFAULT_GRACE,
        }
    }
}

pub type ConnectedCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type DisconnectedCallback = Arc<dyn Fn() + Send + Sync>;

pub struct SessionController {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    engine: String,
    bus: Arc<dyn MessageBus>,
    params: Mutex<ParamStore>,
    routing: Arc<RwLock<RoutingTable>>,
    correlator: Correlator,
    heartbeat: HeartbeatMonitor,
    state: Mutex<SessionState>,
    app_id: RwLock<Option<String>>,
    server_interval: Mutex<Option<Duration>>,
    on_connected: Mutex<Option<ConnectedCallback>>,
    on_disconnected: Mutex<Option<DisconnectedCallback>>,
}

impl SessionController {
    /// Builds the controller and wires the heartbeat monitor into the
    /// session lifecycle. Must be called within a tokio runtime (the
    /// heartbeat timers live on it).
    pub fn new(
        bus: Arc<dyn MessageBus>,
        params: ParamStore,
        config: SessionConfig,
    ) -> Result<Self> {
        let routing = Arc::new(RwLock::new(RoutingTable::from_params(&params)?));
        let correlator = Correlator::new(Arc::clone(&bus), Arc::clone(&routing));
        let heartbeat = HeartbeatMonitor::new(config.grace);

        let inner = Arc::new(SessionInner {
            engine: config.engine,
            bus,
            params: Mutex::new(params),
            routing,
            correlator,
            heartbeat,
            state: Mutex::new(SessionState::Disconnected),
            app_id: RwLock::new(None),
            server_interval: Mutex::new(None),
            on_connected: Mutex::new(None),
            on_disconnected: Mutex::new(None),
        });

        // The monitor outlives neither the session nor its callbacks;
        // weak references keep teardown acyclic.
        let weak = Arc::downgrade(&inner);
        inner.heartbeat.on_heartbeat_due(Arc::new(move |payload| {
            if let Some(inner) = weak.upgrade() {
                inner.correlator.send_request(
                    MessageKind::Heartbeat,
                    serde_json::to_value(&payload).unwrap_or_default(),
                );
            }
        }));
        let weak = Arc::downgrade(&inner);
        inner.heartbeat.on_connection_lost(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                error!(
                    "Session[{}]: heartbeat validation expired, tearing down",
                    inner.engine
                );
                inner.teardown();
            }
        }));

        Ok(Self { inner })
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    /// The server-assigned application ID, present only while a session
    /// exists. Callers should check this before sending business traffic.
    pub fn app_id(&self) -> Option<String> {
        self.inner.app_id.read().unwrap().clone()
    }

    /// Registers the `ServerConnected` callback (at most one subscriber).
    pub fn on_server_connected(&self, callback: ConnectedCallback) {
        let mut slot = self.inner.on_connected.lock().unwrap();
        if slot.is_some() {
            warn!("ServerConnected already has a subscriber, ignoring");
            return;
        }
        *slot = Some(callback);
    }

    /// Registers the `ServerDisconnected` callback (at most one
    /// subscriber).
    pub fn on_server_disconnected(&self, callback: DisconnectedCallback) {
        let mut slot = self.inner.on_disconnected.lock().unwrap();
        if slot.is_some() {
            warn!("ServerDisconnected already has a subscriber, ignoring");
            return;
        }
        *slot = Some(callback);
    }

    /// Registers a per-kind response callback (executions, ticks, admin
    /// replies). Must be called before `start` so no early message is
    /// dropped.
    pub fn register_response_handler(&self, kind: MessageKind, handler: ResponseHandler) {
        self.inner.correlator.register(kind, handler);
    }

    /// Begins the handshake: binds the process-global inquiry queue and
    /// sends the app-ID inquiry. Completion is signalled through
    /// `ServerConnected`.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SessionState::Disconnected {
                warn!(
                    "Session[{}]: start ignored in state {:?}",
                    self.inner.engine, *state
                );
                return;
            }
            *state = SessionState::RequestingAppId;
        }

        let (queue, key) = {
            let routing = self.inner.routing.read().unwrap();
            (
                routing.inquiry_queue().to_string(),
                routing.inquiry_key().to_string(),
            )
        };
        if let Err(e) = self.inner.bind_queue(&queue, &key) {
            error!(
                "Session[{}]: failed to bind inquiry queue: {:#}",
                self.inner.engine, e
            );
            *self.inner.state.lock().unwrap() = SessionState::Disconnected;
            return;
        }

        info!("Session[{}]: requesting application id", self.inner.engine);
        self.inner.correlator.send_request(
            MessageKind::AppIdInquiry,
            serde_json::json!({ "client": self.inner.engine }),
        );
    }

    /// Sends a business message. Rejected (logged, not sent) unless the
    /// session is Connected; this is an explicit precondition, not a
    /// missing-routing-key accident.
    pub fn send(&self, kind: MessageKind, payload: serde_json::Value) {
        if *self.inner.state.lock().unwrap() != SessionState::Connected {
            warn!(
                "Session[{}]: {} rejected, session not connected",
                self.inner.engine, kind
            );
            return;
        }
        self.inner.correlator.send_request(kind, payload);
    }

    /// Explicit disconnect: stops the heartbeat, destroys the session and
    /// fires `ServerDisconnected`.
    pub fn shutdown(&self) {
        self.inner.teardown();
    }

    /// Re-reads configuration and rewires the routing table without
    /// changing session state or any registered handler. Used to recover
    /// after an external disconnect.
    pub fn initialize(&self, params: ParamStore) -> Result<()> {
        let mut table = RoutingTable::from_params(&params)?;
        if let Some(app_id) = self.inner.app_id.read().unwrap().as_deref() {
            table.qualify(app_id);
        }
        *self.inner.routing.write().unwrap() = table;
        *self.inner.params.lock().unwrap() = params;
        info!("Session[{}]: configuration re-read", self.inner.engine);
        Ok(())
    }
}

impl SessionInner {
    fn bind_queue(self: &Arc<Self>, queue: &str, routing_key: &str) -> Result<()> {
        self.bus.declare_queue(queue, routing_key)?;
        let weak = Arc::downgrade(self);
        self.bus.consume(
            queue,
            Box::new(move |envelope| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_envelope(envelope);
                }
            }),
        )
    }

    /// Inbound dispatch: control messages stay inside the session, the
    /// rest goes through the correlator's per-kind callbacks.
    fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        match envelope.kind {
            MessageKind::AppIdResponse => self.handle_app_id(envelope),
            MessageKind::HeartbeatResponse => {
                let interval = envelope
                    .payload
                    .get("interval_ms")
                    .and_then(|v| v.as_u64())
                    .map(Duration::from_millis)
                    .or(*self.server_interval.lock().unwrap());
                match interval {
                    Some(interval) => self.heartbeat.on_response_received(interval),
                    None => warn!(
                        "Session[{}]: heartbeat response before inquiry, ignored",
                        self.engine
                    ),
                }
            }
            _ => self.correlator.on_response(envelope),
        }
    }

    /// First inquiry response: creates the session.
    fn handle_app_id(self: &Arc<Self>, envelope: Envelope) {
        if *self.state.lock().unwrap() != SessionState::RequestingAppId {
            warn!("Session[{}]: unexpected app-id response, ignored", self.engine);
            return;
        }
        let response: InquiryResponse = match envelope.payload_as() {
            Ok(response) => response,
            Err(e) => {
                error!(
                    "Session[{}]: malformed inquiry response: {}",
                    self.engine, e
                );
                return;
            }
        };

        {
            // At most one session per connection.
            let mut app_id = self.app_id.write().unwrap();
            if app_id.is_some() {
                warn!("Session[{}]: duplicate app-id response, ignored", self.engine);
                return;
            }
            *app_id = Some(response.app_id.clone());
        }
        info!(
            "Session[{}]: assigned app id '{}'",
            self.engine, response.app_id
        );

        // Qualification happens synchronously before any app-scoped
        // consumer is registered.
        self.routing.write().unwrap().qualify(&response.app_id);

        let bindings: Vec<(String, String)> = {
            let routing = self.routing.read().unwrap();
            Channel::ALL
                .iter()
                .filter_map(|&channel| {
                    Some((
                        routing.queue(channel)?.to_string(),
                        routing.inbound(channel)?.to_string(),
                    ))
                })
                .collect()
        };
        for (queue, key) in bindings {
            if let Err(e) = self.bind_queue(&queue, &key) {
                // Protocol-level failure on one channel does not kill the
                // session; sends on it will be skipped.
                error!(
                    "Session[{}]: failed to bind queue '{}': {:#}",
                    self.engine, queue, e
                );
            }
        }

        let interval = Duration::from_millis(response.heartbeat_interval_ms);
        *self.server_interval.lock().unwrap() = Some(interval);

        // Advertise this client's bound queues to the remote engine.
        let app_info = AppInfo {
            app_id: response.app_id.clone(),
            queues: self.routing.read().unwrap().queue_names(),
        };
        self.correlator.send_request(
            MessageKind::AppInfo,
            serde_json::to_value(&app_info).unwrap_or_default(),
        );

        self.heartbeat.start(&response.app_id, interval);

        *self.state.lock().unwrap() = SessionState::Connected;
        info!("Session[{}]: connected", self.engine);
        let callback = self.on_connected.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(&response.app_id);
        }
    }

    /// Shared teardown path for explicit shutdown and heartbeat loss.
    /// Fires `ServerDisconnected` once per established session.
    fn teardown(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Connected && *state != SessionState::RequestingAppId {
                return;
            }
            *state = SessionState::Disconnecting;
        }

        self.heartbeat.stop();
        let had_session = self.app_id.write().unwrap().take().is_some();
        *self.server_interval.lock().unwrap() = None;

        *self.state.lock().unwrap() = SessionState::Disconnected;
        info!("Session[{}]: disconnected", self.engine);

        if had_session {
            let callback = self.on_disconnected.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
    }
}
