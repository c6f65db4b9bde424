//! Receivers of channel events.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::envelope::{Envelope, Notification};
use crate::error::Error;

/// Consumer of everything the channel produces.
///
/// Every method defaults to a no-op, so implementors only override what they care
/// about. Methods are called from the connection task and must not block; push into
/// a queue and return.
pub trait EventSink: Send + Sync + 'static {
    /// The transport opened.
    fn on_connect(&self) {}

    /// The transport closed, or `disconnect()` tore it down.
    fn on_disconnect(&self) {}

    /// A transport error, failed open, or heartbeat timeout.
    fn on_error(&self, error: &Error) {
        let _: &Error = error;
    }

    /// A user-visible notification.
    fn on_notification(&self, notification: Notification) {
        let _: Notification = notification;
    }

    /// A `new_detection` payload for the application state store, unmodified.
    fn on_detection(&self, detection: Map<String, Value>) {
        let _: Map<String, Value> = detection;
    }

    /// An envelope whose `type` the router does not know.
    fn on_message(&self, envelope: Envelope) {
        let _: Envelope = envelope;
    }

    /// A reconnect timer was armed.
    fn on_retry_scheduled(&self, attempt: u32, delay: Duration) {
        let _: (u32, Duration) = (attempt, delay);
    }
}

/// Sink that ignores everything.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {}

/// Owned form of every [`EventSink`] callback, for queue-backed consumers.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    /// Rendered error; [`Error`] itself is not `Clone`
    Error(String),
    Notification(Notification),
    Detection(Map<String, Value>),
    Message(Envelope),
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
}

impl EventSink for mpsc::UnboundedSender<ChannelEvent> {
    fn on_connect(&self) {
        _ = self.send(ChannelEvent::Connected);
    }

    fn on_disconnect(&self) {
        _ = self.send(ChannelEvent::Disconnected);
    }

    fn on_error(&self, error: &Error) {
        _ = self.send(ChannelEvent::Error(error.to_string()));
    }

    fn on_notification(&self, notification: Notification) {
        _ = self.send(ChannelEvent::Notification(notification));
    }

    fn on_detection(&self, detection: Map<String, Value>) {
        _ = self.send(ChannelEvent::Detection(detection));
    }

    fn on_message(&self, envelope: Envelope) {
        _ = self.send(ChannelEvent::Message(envelope));
    }

    fn on_retry_scheduled(&self, attempt: u32, delay: Duration) {
        _ = self.send(ChannelEvent::RetryScheduled { attempt, delay });
    }
}
