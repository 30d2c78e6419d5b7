//! Impure rumqttc binding
//!
//! Each `open` builds a fresh `AsyncClient`/`EventLoop` pair and a poll task
//! that lives for exactly one session. The poll task stops at the first
//! error, so rumqttc never reconnects on its own: retries belong to the
//! connection state machine.

use super::connection::{configure_mqtt_options, MqttError, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ConnectionConfig;
use crate::mqtt_span;
use crate::transport::{EventSink, TransportBinding, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Time given to the poll task to flush DISCONNECT before it is aborted
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Transport binding backed by rumqttc's v3 async client
#[derive(Default)]
pub struct RumqttcBinding {
    client: Option<AsyncClient>,
    poll_task: Option<JoinHandle<()>>,
}

impl RumqttcBinding {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&AsyncClient, MqttError> {
        self.client.as_ref().ok_or(MqttError::NotOpen)
    }

    /// Drive one session until it ends, reporting through the sink
    async fn run_event_loop(mut event_loop: EventLoop, sink: EventSink) {
        let mut established = false;

        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        info!("Broker acknowledged connection");
                        established = true;
                        if !sink.emit(TransportEvent::Connected) {
                            break;
                        }
                    }
                    EventRoute::ConnectionRefused(reason) => {
                        sink.emit(TransportEvent::OpenFailed(format!(
                            "connection refused: {reason}"
                        )));
                        break;
                    }
                    EventRoute::MessageReceived { topic, payload } => {
                        debug!(topic = %topic, bytes = payload.len(), "Message received");
                        if !sink.emit(TransportEvent::MessageArrived { topic, payload }) {
                            break;
                        }
                    }
                    EventRoute::Disconnected => {
                        warn!(established, "Broker sent DISCONNECT");
                        sink.emit(session_ended(established, "broker sent DISCONNECT".to_string()));
                        break;
                    }
                    EventRoute::SubscriptionConfirmed { packet_id, failed } => {
                        if failed {
                            warn!(packet_id, "Broker rejected subscription");
                        } else {
                            debug!(packet_id, "Subscription confirmed");
                        }
                    }
                    EventRoute::InfrastructureEvent(description) => {
                        debug!("MQTT infrastructure event: {}", description);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    let reason = e.to_string();
                    if established {
                        warn!(error = %reason, "MQTT connection lost");
                    } else {
                        warn!(error = %reason, "MQTT connection attempt failed");
                    }
                    sink.emit(session_ended(established, reason));
                    break;
                }
            }
        }

        debug!(session = sink.session(), "MQTT poll task finished");
    }
}

/// Event reported when a session ends; before CONNACK the attempt failed
fn session_ended(established: bool, reason: String) -> TransportEvent {
    if established {
        TransportEvent::ConnectionLost(reason)
    } else {
        TransportEvent::OpenFailed(reason)
    }
}

#[async_trait]
impl TransportBinding for RumqttcBinding {
    type Error = MqttError;

    async fn open(&mut self, config: &ConnectionConfig, sink: EventSink) -> Result<(), MqttError> {
        self.close().await;

        let mqtt_options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let span = mqtt_span!(session = sink.session(), broker = %config.broker_url());
        let handle = tokio::spawn(Self::run_event_loop(event_loop, sink).instrument(span));

        self.client = Some(client);
        self.poll_task = Some(handle);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            // Best effort: the session may already be gone
            if let Err(e) = client.try_disconnect() {
                debug!("Disconnect request not delivered: {}", e);
            }
        }

        if let Some(mut handle) = self.poll_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                debug!("Poll task still running after grace period, aborting");
                handle.abort();
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.client()?
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(MqttError::SubscriptionFailed)
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(MqttError::UnsubscribeFailed)
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(MqttError::PublishFailed)
    }
}

impl Drop for RumqttcBinding {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_task.take() {
            handle.abort();
        }
    }
}
