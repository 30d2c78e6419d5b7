//! Rice cooker commands and feeds on top of the MQTT service

pub mod simulator;

pub use simulator::{CommandVerdict, DeviceSimulator};

use crate::protocol::{
    Alert, CookerTopic, CookingProgress, DeviceStatus, Payload, StartCookingCommand,
};
use crate::service::MqttService;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

/// App-side view of the cooker
#[derive(Debug, Clone)]
pub struct RiceCooker {
    service: MqttService,
}

impl RiceCooker {
    pub fn new(service: MqttService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MqttService {
        &self.service
    }

    /// Ask the cooker to start a cycle; false when not connected
    pub async fn start_cooking(&self, quantity: &str) -> bool {
        let command = StartCookingCommand::new(quantity);
        match self
            .service
            .publish_json(CookerTopic::StartCooking.as_str(), &command)
            .await
        {
            Ok(true) => {
                info!(quantity, "Start cooking command sent");
                true
            }
            Ok(false) => {
                warn!(quantity, "Start cooking command not sent: not connected");
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to encode start cooking command");
                false
            }
        }
    }

    pub async fn subscribe_to_cooking_progress<F>(&self, callback: F) -> bool
    where
        F: Fn(CookingProgress) + Send + Sync + 'static,
    {
        self.subscribe_typed(CookerTopic::CookingProgress, callback)
            .await
    }

    pub async fn subscribe_to_alerts<F>(&self, callback: F) -> bool
    where
        F: Fn(Alert) + Send + Sync + 'static,
    {
        self.subscribe_typed(CookerTopic::Alerts, callback).await
    }

    pub async fn subscribe_to_device_status<F>(&self, callback: F) -> bool
    where
        F: Fn(DeviceStatus) + Send + Sync + 'static,
    {
        self.subscribe_typed(CookerTopic::DeviceStatus, callback)
            .await
    }

    /// Raw feed; the cooker sends either JSON or plain display text here
    pub async fn subscribe_to_cooking_status<F>(&self, callback: F) -> bool
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.service
            .subscribe(CookerTopic::CookingStatus.as_str(), callback)
            .await
    }

    async fn subscribe_typed<T, F>(&self, topic: CookerTopic, callback: F) -> bool
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.service
            .subscribe(topic.as_str(), move |payload: &Payload| {
                match payload.decode::<T>() {
                    Ok(message) => callback(message),
                    Err(e) => warn!(
                        topic = %topic,
                        error = %e,
                        payload = %payload,
                        "Skipping message that does not match the expected shape"
                    ),
                }
            })
            .await
    }

    /// Stop delivering one feed
    pub async fn unsubscribe(&self, topic: CookerTopic) -> bool {
        let removed = self.service.unsubscribe(topic.as_str()).await;
        debug!(topic = %topic, removed, "Feed unsubscribed");
        removed
    }
}
