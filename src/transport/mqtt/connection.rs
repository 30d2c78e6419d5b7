//! Pure MQTT option construction
//!
//! Turns a `ConnectionConfig` into `rumqttc::MqttOptions`. The appliance
//! firmware speaks MQTT 3.1.1, so the v3 client is used throughout.

use crate::config::{ConnectionConfig, TransportProtocol};
use rumqttc::{ClientError, MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// MQTT binding errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed")]
    PublishFailed(#[source] ClientError),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] ClientError),
    #[error("Unsubscribe failed")]
    UnsubscribeFailed(#[source] ClientError),
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("No open session")]
    NotOpen,
}

/// Pure function to configure MQTT options from config
///
/// For WebSocket transports rumqttc expects the full `ws://host:port/path`
/// URL in place of the host.
pub fn configure_mqtt_options(config: &ConnectionConfig) -> Result<MqttOptions, MqttError> {
    config
        .validate()
        .map_err(|e| MqttError::InvalidBrokerAddress(e.to_string()))?;

    let mut mqtt_options = match config.protocol {
        TransportProtocol::Tcp => {
            let mut options =
                MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
            if config.use_tls {
                options.set_transport(RumqttcTransport::tls_with_default_config());
            }
            options
        }
        TransportProtocol::Ws => {
            let mut options =
                MqttOptions::new(config.client_id.clone(), config.broker_url(), config.port);
            if config.use_tls {
                options.set_transport(RumqttcTransport::wss_with_default_config());
            } else {
                options.set_transport(RumqttcTransport::Ws);
            }
            options
        }
    };

    // Credentials come from the environment, never from the file
    if let Some(username) = config.get_mqtt_username() {
        let password = config.get_mqtt_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(config.max_packet_bytes, config.max_packet_bytes);

    Ok(mqtt_options)
}
