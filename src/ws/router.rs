//! Classification and dispatch of inbound envelopes.

use serde_json::{Map, Value};

use super::envelope::{Envelope, Notification, Severity};
use super::sink::EventSink;

/// An inbound envelope, classified by its `type`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    ConnectionEstablished(Map<String, Value>),
    HeartbeatAck,
    Notification(Map<String, Value>),
    NewDetection(Map<String, Value>),
    ReviewCompleted(Map<String, Value>),
    SystemAlert(Map<String, Value>),
    Other(Envelope),
}

impl From<Envelope> for Inbound {
    fn from(envelope: Envelope) -> Self {
        match envelope.kind.as_str() {
            "connection_established" => Self::ConnectionEstablished(envelope.data),
            "heartbeat_ack" => Self::HeartbeatAck,
            "notification" => Self::Notification(envelope.data),
            "new_detection" => Self::NewDetection(envelope.data),
            "review_completed" => Self::ReviewCompleted(envelope.data),
            "system_alert" => Self::SystemAlert(envelope.data),
            _ => Self::Other(envelope),
        }
    }
}

/// Hand a classified envelope to the sink.
///
/// Informational kinds (`connection_established`, `heartbeat_ack`) reach no sink.
pub fn dispatch<S: EventSink + ?Sized>(inbound: Inbound, sink: &S) {
    match inbound {
        Inbound::ConnectionEstablished(data) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                username = data.get("username").and_then(serde_json::Value::as_str),
                "Connection established"
            );
            #[cfg(not(feature = "tracing"))]
            let _: Map<String, Value> = data;
        }
        Inbound::HeartbeatAck => {
            #[cfg(feature = "tracing")]
            tracing::trace!("Heartbeat acknowledged");
        }
        Inbound::Notification(data) => sink.on_notification(notification(data)),
        Inbound::NewDetection(data) => {
            let summary = detection_summary(&data);
            sink.on_detection(data);
            sink.on_notification(summary);
        }
        Inbound::ReviewCompleted(data) => {
            let verdict = data
                .get("verdict")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            sink.on_notification(Notification {
                message: format!("Review completed: {verdict}"),
                severity: Severity::Success,
                data,
            });
        }
        Inbound::SystemAlert(data) => {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("System alert")
                .to_owned();
            sink.on_notification(Notification {
                message,
                severity: Severity::Error,
                data,
            });
        }
        Inbound::Other(envelope) => sink.on_message(envelope),
    }
}

/// `notification` payloads are `{message, severity, data}`; missing pieces default.
fn notification(mut data: Map<String, Value>) -> Notification {
    let message = match data.remove("message") {
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let severity = data
        .remove("severity")
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();
    let data = match data.remove("data") {
        Some(Value::Object(inner)) => inner,
        _ => Map::new(),
    };

    Notification {
        message,
        severity,
        data,
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "Confidence is shown to the user as a percentage"
)]
fn detection_summary(data: &Map<String, Value>) -> Notification {
    let is_anomaly = data
        .get("is_anomaly")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let confidence = data
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or_default();

    let (message, severity) = if is_anomaly {
        ("New anomaly detected", Severity::Warning)
    } else {
        ("New detection processed", Severity::Info)
    };

    Notification {
        message: format!("{message} (confidence {:.1}%)", confidence * 100.0),
        severity,
        data: data.clone(),
    }
}
