//! Wire envelope exchanged over the channel.
//!
//! Every text frame carries one JSON object `{type, data, timestamp}`.

use bon::Builder;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::WsError;

/// Envelope `type` of the liveness probe sent by the client.
pub const HEARTBEAT: &str = "heartbeat";

/// One inbound (or outbound) message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct Envelope {
    /// Discriminator used for routing
    #[serde(rename = "type")]
    #[builder(into)]
    pub kind: String,
    /// Event-specific payload
    #[serde(default)]
    #[builder(default)]
    pub data: Map<String, Value>,
    /// ISO-8601 timestamp set by the sender. The review service emits naive local
    /// timestamps, so this is kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub timestamp: Option<String>,
}

impl Envelope {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, WsError> {
        serde_json::from_str(text).map_err(WsError::MessageParse)
    }

    /// The `{type: "heartbeat", timestamp}` probe.
    #[must_use]
    pub fn heartbeat() -> Heartbeat {
        Heartbeat {
            kind: HEARTBEAT,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Try to extract the payload as a detection event.
    #[must_use]
    pub fn as_detection(&self) -> Option<Detection> {
        self.payload_as("new_detection")
    }

    /// Try to extract the payload as a completed review.
    #[must_use]
    pub fn as_review_completed(&self) -> Option<ReviewCompleted> {
        self.payload_as("review_completed")
    }

    /// Try to extract the payload as a system alert.
    #[must_use]
    pub fn as_system_alert(&self) -> Option<SystemAlert> {
        self.payload_as("system_alert")
    }

    /// Try to extract the payload as the server's welcome message.
    #[must_use]
    pub fn as_connection_established(&self) -> Option<ConnectionEstablished> {
        self.payload_as("connection_established")
    }

    fn payload_as<T: serde::de::DeserializeOwned>(&self, kind: &str) -> Option<T> {
        if self.kind == kind {
            serde_json::from_value(Value::Object(self.data.clone())).ok()
        } else {
            None
        }
    }
}

/// Outbound liveness probe. Carries no `data`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: String,
}

/// Severity of a user-visible notification.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Error,
    /// Also the fallback for severities this client does not know
    #[default]
    #[serde(other)]
    Info,
}

/// Toast-style notification handed to the notification sink.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct Notification {
    #[builder(into)]
    pub message: String,
    #[serde(default)]
    #[builder(default)]
    pub severity: Severity,
    #[serde(default)]
    #[builder(default)]
    pub data: Map<String, Value>,
}

/// Payload of `new_detection`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    pub detection_id: Uuid,
    pub is_anomaly: bool,
    pub confidence: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Payload of `review_completed`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReviewCompleted {
    pub review_id: Uuid,
    pub detection_id: Uuid,
    pub verdict: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Payload of `system_alert`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemAlert {
    pub alert_type: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Payload of `connection_established`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionEstablished {
    pub user_id: Uuid,
    pub username: String,
    #[serde(default)]
    pub connected_at: Option<String>,
}
