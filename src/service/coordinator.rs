//! The task that owns the connection
//!
//! One coordinator per service: it holds the state machine, the transport,
//! the topic registry and the single retry timer, and processes transport
//! events, the timer and API commands one at a time. Transport events are
//! polled first so a command always observes every event delivered before it.

use super::events::EventBus;
use super::registry::{MessageHandlerFn, TopicRegistry};
use super::state_machine::{
    ConnectRequest, ConnectionMachine, ConnectionState, ConnectionStatus, Effect,
};
use super::{ConnectionStats, ServiceSnapshot};
use crate::config::{ConfigError, ConnectionConfig};
use crate::protocol::{validate_topic, OutboundMessage, Payload};
use crate::transport::{EventSink, SessionEvent, TransportBinding, TransportEvent};
use crate::{dispatch_span, mqtt_span};
use bytes::Bytes;
use chrono::Utc;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, info, warn, Instrument};

/// Requests sent from `MqttService` handles to the coordinator
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<ConnectRequest, ConfigError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    UpdateConfig {
        config: ConnectionConfig,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        topic: String,
        handler: MessageHandlerFn,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        message: OutboundMessage,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<ServiceSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct Coordinator<T: TransportBinding> {
    config: ConnectionConfig,
    transport: T,
    machine: ConnectionMachine,
    registry: TopicRegistry,
    bus: Arc<EventBus>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Tag of the current transport session; bumped on every open and close
    session: u64,
    retry_timer: Option<Pin<Box<Sleep>>>,
    stats: ConnectionStats,
}

/// Completes when the armed timer fires; pends forever when none is armed
async fn wait_for_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl<T: TransportBinding> Coordinator<T> {
    pub(crate) fn new(
        config: ConnectionConfig,
        transport: T,
        machine: ConnectionMachine,
        bus: Arc<EventBus>,
        state_tx: watch::Sender<ConnectionState>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            transport,
            machine,
            registry: TopicRegistry::new(),
            bus,
            state_tx,
            events_tx,
            session: 0,
            retry_timer: None,
            stats: ConnectionStats::default(),
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        info!(client_id = %self.config.client_id, "MQTT service started");

        loop {
            tokio::select! {
                biased;

                Some(event) = events.recv() => {
                    self.handle_session_event(event).await;
                }

                () = wait_for_timer(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    let effects = self.machine.on_retry_timer();
                    self.apply(effects).await;
                }

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All service handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        info!("MQTT service stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let result = match self.config.validate() {
                    Ok(()) => {
                        let (request, effects) = self.machine.request_connect();
                        self.apply(effects).await;
                        Ok(request)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                let effects = self.machine.request_disconnect();
                self.apply(effects).await;
                let _ = reply.send(());
            }
            Command::UpdateConfig { config, reply } => {
                info!(broker = %config.broker_url(), "Connection config updated for next attempt");
                self.config = config;
                let _ = reply.send(());
            }
            Command::Subscribe {
                topic,
                handler,
                reply,
            } => {
                let accepted = self.subscribe(&topic, handler).await;
                let _ = reply.send(accepted);
            }
            Command::Unsubscribe { topic, reply } => {
                let removed = self.unsubscribe(&topic).await;
                let _ = reply.send(removed);
            }
            Command::Publish { message, reply } => {
                let sent = self.publish(message).await;
                let _ = reply.send(sent);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                // Handled in the run loop
                let _ = reply.send(());
            }
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        if event.session != self.session {
            debug!(
                event_session = event.session,
                current_session = self.session,
                "Ignoring event from superseded session"
            );
            return;
        }

        let effects = match event.event {
            TransportEvent::Connected => {
                self.stats.connects += 1;
                self.stats.connected_since = Some(Utc::now());
                self.machine.on_transport_connected()
            }
            TransportEvent::OpenFailed(reason) => self.machine.on_open_failed(&reason),
            TransportEvent::ConnectionLost(reason) => {
                if self.machine.state() == ConnectionState::Connected {
                    self.stats.connection_losses += 1;
                    self.stats.connected_since = None;
                }
                self.machine.on_connection_lost(&reason)
            }
            TransportEvent::MessageArrived { topic, payload } => {
                self.dispatch(&topic, &payload);
                Vec::new()
            }
        };
        self.apply(effects).await;
    }

    /// Execute effects in order; a synchronous open failure feeds back into
    /// the machine and its effects run next
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::OpenTransport => {
                    self.session += 1;
                    self.stats.open_attempts += 1;
                    let sink = EventSink::new(self.session, self.events_tx.clone());
                    let span = mqtt_span!(op = "open", session = self.session, broker = %self.config.broker_url());
                    let opened = self
                        .transport
                        .open(&self.config, sink)
                        .instrument(span)
                        .await;
                    if let Err(e) = opened {
                        let follow_up = self.machine.on_open_failed(&e.to_string());
                        for effect in follow_up.into_iter().rev() {
                            queue.push_front(effect);
                        }
                    }
                }
                Effect::CloseTransport => {
                    self.session += 1;
                    self.stats.connected_since = None;
                    self.transport
                        .close()
                        .instrument(mqtt_span!(op = "close"))
                        .await;
                }
                Effect::ScheduleRetry { attempt, delay } => {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Retry timer armed");
                    self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Effect::CancelRetry => {
                    debug!("Retry timer cancelled");
                    self.retry_timer = None;
                }
                Effect::Resubscribe => self.resubscribe().await,
                Effect::ClearSubscriptions => {
                    if !self.registry.is_empty() {
                        info!(topics = self.registry.len(), "Clearing subscriptions");
                    }
                    self.registry.clear();
                }
                Effect::Emit(status) => self.emit(status),
            }
        }
    }

    fn emit(&self, status: ConnectionStatus) {
        self.state_tx.send_replace(status.implied_state());
        debug!(status = %status, "Broadcasting connection status");
        self.bus.emit_status(&status);
    }

    async fn resubscribe(&mut self) {
        let topics = self.registry.topics();
        if topics.is_empty() {
            return;
        }

        info!(count = topics.len(), "Re-subscribing to registered topics");
        for topic in topics {
            if let Err(e) = self.transport.subscribe(&topic).await {
                warn!(topic = %topic, error = %e, "Re-subscribe failed");
            }
        }
    }

    async fn subscribe(&mut self, topic: &str, handler: MessageHandlerFn) -> bool {
        if !self.machine.can_transmit() {
            debug!(topic, state = %self.machine.state(), "Subscribe refused: not connected");
            return false;
        }
        if let Err(e) = validate_topic(topic) {
            warn!(topic, error = %e, "Subscribe refused: invalid topic");
            return false;
        }

        if !self.registry.contains(topic) {
            let result = self
                .transport
                .subscribe(topic)
                .instrument(mqtt_span!(op = "subscribe", topic))
                .await;
            if let Err(e) = result {
                warn!(topic, error = %e, "Subscribe failed");
                return false;
            }
            info!(topic, "Subscribed");
        }

        self.registry.add(topic, handler);
        true
    }

    async fn unsubscribe(&mut self, topic: &str) -> bool {
        if !self.registry.remove(topic) {
            debug!(topic, "Unsubscribe ignored: topic not registered");
            return false;
        }

        if self.machine.can_transmit() {
            if let Err(e) = self.transport.unsubscribe(topic).await {
                warn!(topic, error = %e, "Broker unsubscribe failed");
            }
        }
        info!(topic, "Unsubscribed");
        true
    }

    async fn publish(&mut self, message: OutboundMessage) -> bool {
        if !self.machine.can_transmit() {
            debug!(topic = %message.topic, "Publish refused: not connected");
            return false;
        }
        if let Err(e) = validate_topic(&message.topic) {
            warn!(topic = %message.topic, error = %e, "Publish refused: invalid topic");
            return false;
        }

        let bytes = message.payload.to_bytes();
        let result = self
            .transport
            .publish(&message.topic, bytes)
            .instrument(mqtt_span!(op = "publish", topic = %message.topic))
            .await;
        match result {
            Ok(()) => {
                self.stats.messages_published += 1;
                true
            }
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Publish failed");
                false
            }
        }
    }

    fn dispatch(&mut self, topic: &str, raw: &Bytes) {
        if !self.machine.can_transmit() {
            debug!(topic, "Dropping message received while not connected");
            return;
        }

        let _span = dispatch_span!(topic).entered();
        self.stats.messages_received += 1;
        let payload = Payload::from_bytes(raw);

        let outcome = self.registry.dispatch(topic, &payload);
        if outcome.panicked > 0 {
            warn!(topic, panicked = outcome.panicked, "Some handlers panicked");
        }
        self.bus.emit_message(topic, &payload);
    }

    fn snapshot(&self) -> ServiceSnapshot {
        let retry = self.machine.retry_policy();
        ServiceSnapshot {
            state: self.machine.state(),
            attempt: retry.attempt(),
            max_attempts: retry.max_attempts(),
            current_delay: retry.current_delay(),
            retry_pending: self.retry_timer.is_some(),
            subscriptions: self.registry.handler_counts(),
            broker_url: self.config.broker_url(),
            stats: self.stats.clone(),
        }
    }

    async fn shutdown(&mut self) {
        let effects = self.machine.request_disconnect();
        self.apply(effects).await;
    }
}
