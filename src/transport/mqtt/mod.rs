//! MQTT binding built on rumqttc
//!
//! Split the same way as the rest of the transport code: pure functions in
//! [`connection`] and [`message_handler`], I/O in [`binding`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use ricebot_link::config::ConnectionConfig;
//! use ricebot_link::transport::mqtt::RumqttcBinding;
//! use ricebot_link::transport::{EventSink, TransportBinding};
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::from_url("mqtt://broker.hivemq.com:1883")?;
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let mut binding = RumqttcBinding::new();
//! binding.open(&config, EventSink::new(1, tx)).await?;
//! let first = rx.recv().await;
//! println!("{first:?}");
//! binding.close().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod binding;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use binding::RumqttcBinding;
pub use connection::{configure_mqtt_options, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
