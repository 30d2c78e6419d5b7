//! Payload and message types exchanged with the cooker
//!
//! Inbound payloads are decoded JSON-first with a raw-text fallback, so a
//! handler always receives something. The typed messages mirror the JSON the
//! app, the simulator and the ESP32 firmware put on the wire.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Decoded inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Payload parsed as JSON
    Json(Value),
    /// Payload that was not valid JSON, as (lossy) UTF-8 text
    Text(String),
}

impl Payload {
    /// Decode raw bytes: JSON first, falling back to the raw string. Never fails.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(_) => None,
        }
    }

    /// Deserialize a JSON payload into a typed message
    ///
    /// A text payload is tried as a JSON string value, which is what a
    /// publisher sending a bare word intends.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Json(value) => T::deserialize(value),
            Payload::Text(text) => T::deserialize(Value::String(text.clone())),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Json(value) => write!(f, "{value}"),
            Payload::Text(text) => f.write_str(text),
        }
    }
}

/// Outbound payload: strings are sent verbatim, everything else as JSON
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text(String),
    Json(Value),
}

impl OutboundPayload {
    /// Serialize any message as a JSON payload
    pub fn json<T: Serialize>(message: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(message).map(OutboundPayload::Json)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            OutboundPayload::Text(text) => text.as_bytes().to_vec(),
            OutboundPayload::Json(value) => value.to_string().into_bytes(),
        }
    }
}

impl From<&str> for OutboundPayload {
    fn from(text: &str) -> Self {
        OutboundPayload::Text(text.to_string())
    }
}

impl From<String> for OutboundPayload {
    fn from(text: String) -> Self {
        OutboundPayload::Text(text)
    }
}

impl From<Value> for OutboundPayload {
    fn from(value: Value) -> Self {
        OutboundPayload::Json(value)
    }
}

/// A transient QoS-0 message waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: OutboundPayload,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<OutboundPayload>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Message timestamp: ISO-8601 from the app, `millis()` uptime from the firmware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Iso(DateTime<Utc>),
    Millis(u64),
}

impl Timestamp {
    pub fn now() -> Self {
        Timestamp::Iso(Utc::now())
    }

    /// Wall-clock time, when the timestamp carries one
    ///
    /// Firmware millis count from device boot, so they are not converted.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Iso(dt) => Some(*dt),
            Timestamp::Millis(_) => None,
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::Iso(dt)
    }
}

/// Command sent on `ricebot/start_cooking`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartCookingCommand {
    /// Always `start_cooking`
    pub action: String,
    /// Quantity as chosen in the app, e.g. `"2 Cup"`
    pub quantity: String,
    pub timestamp: DateTime<Utc>,
}

impl StartCookingCommand {
    pub const ACTION: &'static str = "start_cooking";

    pub fn new(quantity: impl Into<String>) -> Self {
        Self {
            action: Self::ACTION.to_string(),
            quantity: quantity.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_start(&self) -> bool {
        self.action == Self::ACTION
    }
}

/// Well-known cooking stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookingStage {
    Idle,
    Washing,
    Soaking,
    Cooking,
    Done,
    Error,
    /// Anything else, e.g. a free-form firmware display message
    Other,
}

impl CookingStage {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "idle" => CookingStage::Idle,
            "washing" => CookingStage::Washing,
            "soaking" => CookingStage::Soaking,
            "cooking" => CookingStage::Cooking,
            "done" => CookingStage::Done,
            "error" => CookingStage::Error,
            _ => CookingStage::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CookingStage::Idle => "idle",
            CookingStage::Washing => "washing",
            CookingStage::Soaking => "soaking",
            CookingStage::Cooking => "cooking",
            CookingStage::Done => "done",
            CookingStage::Error => "error",
            CookingStage::Other => "other",
        }
    }
}

impl fmt::Display for CookingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message on `ricebot/cooking_progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookingProgress {
    /// Percentage, 0-100
    pub progress: u32,
    /// Stage name or free-form status text
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl CookingProgress {
    pub fn new(progress: u32, stage: CookingStage) -> Self {
        Self {
            progress,
            status: stage.as_str().to_string(),
            timestamp: Some(Timestamp::now()),
        }
    }

    pub fn stage(&self) -> CookingStage {
        CookingStage::parse(&self.status)
    }

    pub fn is_done(&self) -> bool {
        self.stage() == CookingStage::Done
    }
}

/// Alert severity as sent in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Message on `ricebot/alerts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Some(Timestamp::now()),
        }
    }
}

/// Message on `ricebot/device_status`; fields the sender omits take defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceStatus {
    pub wifi: bool,
    pub water_flow: bool,
    pub rice_level: String,
    pub temperature: f64,
    pub is_cooking: bool,
    pub cooking_progress: u32,
    pub cooking_status: String,
    /// Set by the simulator, never by real hardware
    pub is_dummy_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}
