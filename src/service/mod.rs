//! MQTT connection service
//!
//! [`MqttService`] is a cheap, cloneable handle to a coordinator task that
//! owns the transport session. Every public operation is a message to that
//! task, so callers on any thread see operations applied in the order they
//! were issued, interleaved with transport events.
//!
//! ```rust,no_run
//! use ricebot_link::config::ClientConfig;
//! use ricebot_link::service::{ConnectionState, MqttService};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let service = MqttService::with_rumqttc(ClientConfig::default());
//! service.connect().await?;
//! service
//!     .wait_for_state(ConnectionState::Connected, Duration::from_secs(10))
//!     .await?;
//! service.publish("ricebot/start_cooking", "hello").await;
//! # Ok::<(), ricebot_link::error::ServiceError>(())
//! # });
//! ```

mod coordinator;
pub mod events;
pub mod registry;
pub mod retry;
pub mod state_machine;

pub use events::{EventBus, ListenerHandle, MessageListener, StatusListener};
pub use registry::{DispatchOutcome, MessageHandlerFn, TopicRegistry};
pub use retry::{ReconnectionDecision, RetryPolicy};
pub use state_machine::{ConnectRequest, ConnectionMachine, ConnectionState, ConnectionStatus, Effect};

use crate::config::{ClientConfig, ConnectionConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::protocol::{OutboundMessage, OutboundPayload, Payload};
use crate::transport::mqtt::RumqttcBinding;
use crate::transport::TransportBinding;
use chrono::{DateTime, Utc};
use coordinator::{Command, Coordinator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info_span, Instrument};

/// Counters kept by the coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Transport sessions started
    pub open_attempts: u64,
    /// Sessions that reached connected
    pub connects: u64,
    /// Established sessions lost without a manual disconnect
    pub connection_losses: u64,
    pub messages_received: u64,
    pub messages_published: u64,
    pub connected_since: Option<DateTime<Utc>>,
}

/// Point-in-time view of the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub state: ConnectionState,
    /// Retries spent since the last successful connect
    pub attempt: u32,
    pub max_attempts: u32,
    /// Delay the next retry would wait
    pub current_delay: Duration,
    pub retry_pending: bool,
    /// Registered topics and their handler counts
    pub subscriptions: BTreeMap<String, usize>,
    pub broker_url: String,
    pub stats: ConnectionStats,
}

/// Handle to a running MQTT connection service
#[derive(Clone)]
pub struct MqttService {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    bus: Arc<EventBus>,
}

impl MqttService {
    /// Spawn the coordinator over `transport`; must be called inside a Tokio runtime
    ///
    /// The service starts disconnected. Nothing touches the network until
    /// [`connect`](Self::connect).
    pub fn start<T: TransportBinding>(
        config: ConnectionConfig,
        retry: RetryPolicy,
        transport: T,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let bus = Arc::new(EventBus::new());

        let span = info_span!("mqtt_service", client_id = %config.client_id);
        let coordinator = Coordinator::new(
            config,
            transport,
            ConnectionMachine::new(retry),
            bus.clone(),
            state_tx,
            events_tx,
        );
        tokio::spawn(coordinator.run(commands_rx, events_rx).instrument(span));

        Self {
            commands: commands_tx,
            state: state_rx,
            bus,
        }
    }

    /// Service over the rumqttc transport
    pub fn with_rumqttc(config: ClientConfig) -> Self {
        let retry = config.reconnect.retry_policy();
        Self::start(config.mqtt, retry, RumqttcBinding::new())
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> ServiceResult<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .map_err(|_| ServiceError::ServiceStopped)?;
        reply_rx.await.map_err(|_| ServiceError::ServiceStopped)
    }

    /// Start a connection attempt
    ///
    /// Returns once the attempt is underway; outcomes arrive as status
    /// events. Only an invalid configuration is reported here.
    pub async fn connect(&self) -> ServiceResult<ConnectRequest> {
        let request = self
            .request(|reply| Command::Connect { reply })
            .await?;
        Ok(request?)
    }

    /// Close the session, cancel any pending retry and forget every subscription
    pub async fn disconnect(&self) -> ServiceResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Replace the connection parameters used by the next attempt
    pub async fn update_config(&self, config: ConnectionConfig) -> ServiceResult<()> {
        config.validate()?;
        self.request(|reply| Command::UpdateConfig { config, reply })
            .await
    }

    /// Register `handler` for messages on exactly `topic`
    ///
    /// Returns false when not connected or the topic is invalid. Subscribing
    /// again to a registered topic adds another handler.
    pub async fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let handler: MessageHandlerFn = Arc::new(handler);
        self.request(|reply| Command::Subscribe {
            topic,
            handler,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Drop every handler for `topic`; returns false if it was not registered
    pub async fn unsubscribe(&self, topic: impl Into<String>) -> bool {
        let topic = topic.into();
        self.request(|reply| Command::Unsubscribe { topic, reply })
            .await
            .unwrap_or(false)
    }

    /// Fire-and-forget publish; returns false when not connected
    pub async fn publish(&self, topic: impl Into<String>, payload: impl Into<OutboundPayload>) -> bool {
        let message = OutboundMessage::new(topic, payload);
        self.request(|reply| Command::Publish { message, reply })
            .await
            .unwrap_or(false)
    }

    /// Serialize `value` as JSON and publish it
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: impl Into<String>,
        value: &T,
    ) -> ServiceResult<bool> {
        let payload = OutboundPayload::json(value)?;
        Ok(self.publish(topic, payload).await)
    }

    pub fn on_status_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.bus.on_status_change(Arc::new(listener))
    }

    /// Listen to every inbound message, after the topic handlers ran
    pub fn on_message<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&str, &Payload) + Send + Sync + 'static,
    {
        self.bus.on_message(Arc::new(listener))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Coarse status for display: `connected`, `connecting` or `disconnected`
    pub fn connection_status(&self) -> &'static str {
        match self.state() {
            ConnectionState::Connected => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Disconnected | ConnectionState::ReconnectFailed => "disconnected",
        }
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the service reaches `target`
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> ServiceResult<()> {
        let mut state = self.state.clone();
        let reached = tokio::time::timeout(timeout, state.wait_for(|current| *current == target))
            .await
            .map(|result| result.map(|_| ()));
        match reached {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ServiceError::ServiceStopped),
            Err(_) => Err(ServiceError::Timeout {
                waited: timeout,
                state: self.state(),
            }),
        }
    }

    pub async fn snapshot(&self) -> ServiceResult<ServiceSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Disconnect and stop the coordinator; every handle becomes inert
    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

impl std::fmt::Debug for MqttService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttService")
            .field("state", &self.state())
            .field("listeners", &self.bus)
            .finish()
    }
}
