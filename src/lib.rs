//! RiceBot link - MQTT connection management for the RiceBot cooker
//!
//! This crate keeps one MQTT session to the cooker's broker alive and turns
//! it into a small command and feed API for the app.
//!
//! # Overview
//!
//! - [`service::MqttService`]: connection state machine with exponential
//!   backoff, exact-match topic dispatch and status broadcast
//! - [`transport`]: the binding seam, with a rumqttc implementation over
//!   TCP or WebSocket
//! - [`cooking`]: start commands, typed progress/alert/device feeds and a
//!   device simulator
//! - [`testing`]: a scriptable in-memory transport
//!
//! # Quick Start
//!
//! ```rust
//! use ricebot_link::protocol::{CookerTopic, CookingProgress, Payload};
//!
//! // Payloads are decoded JSON-first, falling back to the raw text
//! let payload = Payload::from_bytes(br#"{"progress":40,"status":"soaking"}"#);
//! let progress: CookingProgress = payload.decode().unwrap();
//! assert_eq!(progress.progress, 40);
//!
//! let text = Payload::from_bytes(b"Washing rice...");
//! assert_eq!(text.as_text(), Some("Washing rice..."));
//!
//! assert_eq!(CookerTopic::CookingProgress.as_str(), "ricebot/cooking_progress");
//! ```

pub mod config;
pub mod cooking;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod service;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError, ConnectionConfig, ReconnectConfig, TransportProtocol};
pub use cooking::{DeviceSimulator, RiceCooker};
pub use error::{ServiceError, ServiceResult};
pub use protocol::*;
pub use service::{
    ConnectRequest, ConnectionState, ConnectionStatus, ListenerHandle, MqttService, RetryPolicy,
    ServiceSnapshot,
};
pub use transport::mqtt::RumqttcBinding;
