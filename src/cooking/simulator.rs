//! Stand-in for the cooker firmware
//!
//! Listens on `ricebot/start_cooking` and plays a cooking cycle: progress in
//! steps of 5 % every tick, device status alongside, alerts at the start, on
//! each stage change and at the end. Commands are validated the way the
//! firmware does it and rejected with the firmware's alert texts.

use crate::protocol::{
    Alert, AlertKind, CookerTopic, CookingProgress, CookingStage, DeviceStatus, Payload,
    StartCookingCommand, Timestamp,
};
use crate::service::MqttService;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};

/// Default interval between progress updates
pub const DEFAULT_TICK: Duration = Duration::from_secs(2);

/// Progress added per tick, in percent
pub const PROGRESS_STEP: u32 = 5;

/// Quantities the cooker accepts, in cups
pub const SUPPORTED_CUPS: [f64; 3] = [1.0, 1.5, 2.0];

pub const MSG_PARSE_FAILED: &str = "Failed to parse start cooking command JSON.";
pub const MSG_INVALID_ACTION: &str = "Invalid action in start cooking command.";
pub const MSG_INVALID_QUANTITY: &str = "Invalid quantity specified.";
pub const MSG_ALREADY_COOKING: &str = "Cooking already in progress.";
pub const MSG_COMPLETED: &str = "Cooking completed! Rice is ready.";

/// What the simulator decided about an incoming start command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandVerdict {
    /// Cycle accepted; the simulator is now busy
    Start { quantity: String },
    /// Command refused with this alert
    Reject(Alert),
}

/// Simulated appliance publishing through an `MqttService`
#[derive(Debug, Clone)]
pub struct DeviceSimulator {
    service: MqttService,
    tick: Duration,
    busy: Arc<AtomicBool>,
}

impl DeviceSimulator {
    pub fn new(service: MqttService) -> Self {
        Self {
            service,
            tick: DEFAULT_TICK,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Stage reported for a progress value below 100
    pub fn stage_for_progress(progress: u32) -> CookingStage {
        match progress {
            0..=25 => CookingStage::Washing,
            26..=50 => CookingStage::Soaking,
            51..=99 => CookingStage::Cooking,
            _ => CookingStage::Done,
        }
    }

    /// Cups in a quantity such as `2`, `1.5` or `"1.5 Cup"`
    pub fn parse_cups(quantity: &Value) -> Option<f64> {
        let cups = match quantity {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.split_whitespace().next()?.parse().ok()?,
            _ => return None,
        };
        SUPPORTED_CUPS.contains(&cups).then_some(cups)
    }

    /// Validate a start command and claim the cooker if it is accepted
    pub fn evaluate_command(&self, payload: &Payload) -> CommandVerdict {
        let Some(body) = payload.as_json() else {
            return CommandVerdict::Reject(Alert::new(AlertKind::Error, MSG_PARSE_FAILED));
        };

        if body.get("action").and_then(Value::as_str) != Some(StartCookingCommand::ACTION) {
            return CommandVerdict::Reject(Alert::new(AlertKind::Error, MSG_INVALID_ACTION));
        }

        if self.is_busy() {
            return CommandVerdict::Reject(Alert::new(AlertKind::Warning, MSG_ALREADY_COOKING));
        }

        let quantity = body.get("quantity").unwrap_or(&Value::Null);
        if Self::parse_cups(quantity).is_none() {
            return CommandVerdict::Reject(Alert::new(AlertKind::Error, MSG_INVALID_QUANTITY));
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return CommandVerdict::Reject(Alert::new(AlertKind::Warning, MSG_ALREADY_COOKING));
        }

        let quantity = match quantity {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        CommandVerdict::Start { quantity }
    }

    /// Subscribe to start commands; false when the service is not connected
    pub async fn listen(&self) -> bool {
        let simulator = self.clone();
        self.service
            .subscribe(CookerTopic::StartCooking.as_str(), move |payload: &Payload| {
                let simulator = simulator.clone();
                match simulator.evaluate_command(payload) {
                    CommandVerdict::Start { quantity } => {
                        let span = tracing::info_span!("cooking_cycle", quantity = %quantity);
                        tokio::spawn(async move { simulator.run_cycle(&quantity).await }.instrument(span));
                    }
                    CommandVerdict::Reject(alert) => {
                        warn!(message = %alert.message, "Start command rejected");
                        tokio::spawn(async move { simulator.publish_alert(alert).await });
                    }
                }
            })
            .await
    }

    /// Run one full cycle; the cooker is released when it ends
    pub async fn run_cycle(&self, quantity: &str) {
        self.busy.store(true, Ordering::SeqCst);
        info!(quantity, "Simulated cooking started");

        self.publish_device_status(true, 0, CookingStage::Washing)
            .await;
        self.publish_alert(Alert::new(
            AlertKind::Info,
            format!("Cooking started for {quantity}"),
        ))
        .await;

        let mut progress = 0;
        let mut stage = CookingStage::Washing;
        // The final step is reported once, as `done`, below
        while progress + PROGRESS_STEP < 100 {
            tokio::time::sleep(self.tick).await;
            progress += PROGRESS_STEP;

            let next_stage = Self::stage_for_progress(progress);
            if next_stage != stage {
                stage = next_stage;
                self.publish_alert(Alert::new(AlertKind::Info, format!("Stage: {stage}")))
                    .await;
            }
            self.publish(CookerTopic::CookingProgress, &CookingProgress::new(progress, stage))
                .await;
            self.publish_device_status(true, progress, stage).await;
        }

        tokio::time::sleep(self.tick).await;
        self.publish(
            CookerTopic::CookingProgress,
            &CookingProgress::new(100, CookingStage::Done),
        )
        .await;
        self.publish_alert(Alert::new(AlertKind::Success, MSG_COMPLETED))
            .await;
        self.publish_device_status(false, 100, CookingStage::Done)
            .await;

        self.busy.store(false, Ordering::SeqCst);
        info!("Simulated cooking completed");
    }

    async fn publish_alert(&self, alert: Alert) {
        self.publish(CookerTopic::Alerts, &alert).await;
    }

    async fn publish_device_status(&self, is_cooking: bool, progress: u32, stage: CookingStage) {
        let status = DeviceStatus {
            wifi: true,
            water_flow: true,
            rice_level: "normal".to_string(),
            temperature: 25.0,
            is_cooking,
            cooking_progress: progress,
            cooking_status: stage.to_string(),
            is_dummy_mode: true,
            timestamp: Some(Timestamp::now()),
        };
        self.publish(CookerTopic::DeviceStatus, &status).await;
    }

    async fn publish<T: Serialize>(&self, topic: CookerTopic, message: &T) {
        match self.service.publish_json(topic.as_str(), message).await {
            Ok(true) => {}
            Ok(false) => warn!(topic = %topic, "Simulator publish dropped: not connected"),
            Err(e) => warn!(topic = %topic, error = %e, "Simulator message encoding failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::service::{ConnectionState, RetryPolicy};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn simulator() -> DeviceSimulator {
        let service = MqttService::start(
            ConnectionConfig::default(),
            RetryPolicy::default(),
            MockTransport::new(),
        );
        DeviceSimulator::new(service)
    }

    fn rejected_with(verdict: CommandVerdict) -> (AlertKind, String) {
        match verdict {
            CommandVerdict::Reject(alert) => (alert.kind, alert.message),
            CommandVerdict::Start { quantity } => panic!("unexpected start for {quantity}"),
        }
    }

    #[test]
    fn test_stage_boundaries() {
        assert_eq!(DeviceSimulator::stage_for_progress(5), CookingStage::Washing);
        assert_eq!(DeviceSimulator::stage_for_progress(25), CookingStage::Washing);
        assert_eq!(DeviceSimulator::stage_for_progress(30), CookingStage::Soaking);
        assert_eq!(DeviceSimulator::stage_for_progress(50), CookingStage::Soaking);
        assert_eq!(DeviceSimulator::stage_for_progress(55), CookingStage::Cooking);
        assert_eq!(DeviceSimulator::stage_for_progress(95), CookingStage::Cooking);
        assert_eq!(DeviceSimulator::stage_for_progress(100), CookingStage::Done);
    }

    #[test]
    fn test_parse_cups() {
        assert_eq!(DeviceSimulator::parse_cups(&json!("1.5 Cup")), Some(1.5));
        assert_eq!(DeviceSimulator::parse_cups(&json!(2)), Some(2.0));
        assert_eq!(DeviceSimulator::parse_cups(&json!("3 Cup")), None);
        assert_eq!(DeviceSimulator::parse_cups(&json!("lots")), None);
        assert_eq!(DeviceSimulator::parse_cups(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_rejections_use_firmware_messages() {
        let sim = simulator();

        let (kind, message) = rejected_with(sim.evaluate_command(&Payload::Text("{".into())));
        assert_eq!((kind, message.as_str()), (AlertKind::Error, MSG_PARSE_FAILED));

        let (kind, message) =
            rejected_with(sim.evaluate_command(&Payload::Json(json!({"action": "stop"}))));
        assert_eq!((kind, message.as_str()), (AlertKind::Error, MSG_INVALID_ACTION));

        let (kind, message) = rejected_with(sim.evaluate_command(&Payload::Json(
            json!({"action": "start_cooking", "quantity": "7 Cup"}),
        )));
        assert_eq!((kind, message.as_str()), (AlertKind::Error, MSG_INVALID_QUANTITY));
        assert!(!sim.is_busy());
    }

    #[tokio::test]
    async fn test_second_command_while_busy_is_warned() {
        let sim = simulator();
        let command = Payload::Json(json!({"action": "start_cooking", "quantity": "2 Cup"}));

        assert_eq!(
            sim.evaluate_command(&command),
            CommandVerdict::Start {
                quantity: "2 Cup".to_string()
            }
        );
        assert!(sim.is_busy());

        let (kind, message) = rejected_with(sim.evaluate_command(&command));
        assert_eq!((kind, message.as_str()), (AlertKind::Warning, MSG_ALREADY_COOKING));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_publishes_progress_and_releases() {
        // Arrange
        let transport = MockTransport::new();
        let service = MqttService::start(
            ConnectionConfig::default(),
            RetryPolicy::default(),
            transport.clone(),
        );
        service.connect().await.unwrap();
        service
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(1))
            .await
            .unwrap();
        let sim = DeviceSimulator::new(service);

        // Act
        sim.run_cycle("1 Cup").await;

        // Assert
        let progress: Vec<CookingProgress> = transport
            .published_on("ricebot/cooking_progress")
            .await
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
            .collect();
        assert_eq!(progress.len(), 20);
        assert_eq!(progress[0].progress, 5);
        assert_eq!(progress[4].stage(), CookingStage::Washing);
        assert_eq!(progress[5].stage(), CookingStage::Soaking);
        assert_eq!(progress[18].progress, 95);
        assert_eq!(progress[18].stage(), CookingStage::Cooking);
        assert_eq!(progress[19].progress, 100);
        assert!(progress[19].is_done());
        assert_eq!(progress.iter().filter(|p| p.progress == 100).count(), 1);

        let last_status: DeviceStatus = serde_json::from_slice(
            transport
                .published_on("ricebot/device_status")
                .await
                .last()
                .unwrap(),
        )
        .unwrap();
        assert!(!last_status.is_cooking);
        assert!(last_status.is_dummy_mode);
        assert!(!sim.is_busy());
    }
}
