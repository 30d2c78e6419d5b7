//! Topic names and topic validation for the RiceBot appliance
//!
//! The app and the cooker firmware share a fixed set of topics under the
//! `ricebot/` prefix. Subscriptions are exact-match: wildcard filters are
//! rejected rather than interpreted.

use std::fmt;
use thiserror::Error;

/// Prefix shared by every appliance topic
pub const TOPIC_PREFIX: &str = "ricebot";

/// Maximum MQTT topic length in bytes
pub const MAX_TOPIC_LEN: usize = 65_535;

/// The appliance topics known at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookerTopic {
    /// App → cooker: start a cooking cycle
    StartCooking,
    /// Cooker → app: free-form cooking status
    CookingStatus,
    /// Cooker → app: progress percentage and stage
    CookingProgress,
    /// Cooker → app: user-facing alerts
    Alerts,
    /// Cooker → app: sensor and device snapshot
    DeviceStatus,
}

impl CookerTopic {
    pub const ALL: [CookerTopic; 5] = [
        CookerTopic::StartCooking,
        CookerTopic::CookingStatus,
        CookerTopic::CookingProgress,
        CookerTopic::Alerts,
        CookerTopic::DeviceStatus,
    ];

    /// Full topic string, e.g. `ricebot/cooking_progress`
    pub fn as_str(self) -> &'static str {
        match self {
            CookerTopic::StartCooking => "ricebot/start_cooking",
            CookerTopic::CookingStatus => "ricebot/cooking_status",
            CookerTopic::CookingProgress => "ricebot/cooking_progress",
            CookerTopic::Alerts => "ricebot/alerts",
            CookerTopic::DeviceStatus => "ricebot/device_status",
        }
    }

    /// Look up a topic string among the appliance topics
    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic)
    }
}

impl fmt::Display for CookerTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CookerTopic {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic contains a NUL character")]
    ContainsNul,
    #[error("Topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,
    #[error("Wildcard '{0}' not supported; subscriptions are exact-match")]
    Wildcard(char),
}

/// Validate a topic for exact-match subscribe or publish
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::ContainsNul);
    }
    if let Some(wildcard) = topic.chars().find(|c| *c == '+' || *c == '#') {
        return Err(TopicError::Wildcard(wildcard));
    }
    Ok(())
}
