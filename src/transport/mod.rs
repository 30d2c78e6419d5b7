//! Transport layer between the connection manager and the broker
//!
//! `TransportBinding` is the only seam the service talks through. The binding
//! opens one session per `open` call and reports what happens to it
//! asynchronously through an `EventSink`; retry policy stays with the service.

use crate::config::ConnectionConfig;
use bytes::Bytes;
use tokio::sync::mpsc;

pub mod mqtt;

/// Something that happened to a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The broker accepted the session
    Connected,
    /// The session never came up
    OpenFailed(String),
    /// An established session dropped
    ConnectionLost(String),
    /// A PUBLISH arrived on a subscribed topic
    MessageArrived { topic: String, payload: Bytes },
}

/// A transport event tagged with the session it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: u64,
    pub event: TransportEvent,
}

/// Handle the binding uses to report events for one session
///
/// Events sent after the service has moved on to a newer session are
/// discarded by the receiver.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Report an event; returns false once the service is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport binding for the connection manager
///
/// This trait provides an abstraction over the MQTT client library so the
/// state machine can be driven by a mock in tests.
#[async_trait::async_trait]
pub trait TransportBinding: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start a connection attempt
    ///
    /// Returns `Err` only when the attempt cannot even be started; the outcome
    /// of a started attempt is reported as `Connected` or `OpenFailed` on the sink.
    async fn open(&mut self, config: &ConnectionConfig, sink: EventSink)
        -> Result<(), Self::Error>;

    /// Tear down the current session. Idempotent, no-op if never opened.
    async fn close(&mut self);

    /// Exact-match QoS-0 subscription on the current session
    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// QoS-0, non-retained publish on the current session
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;
}
