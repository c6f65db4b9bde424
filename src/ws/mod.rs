//! Persistent WebSocket event channel.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns the connection lifecycle, reconnection and heartbeat
//! - [`ReconnectSchedule`]: exponential retry delays with a ceiling
//! - [`router`]: classifies inbound [`Envelope`]s and hands them to an [`EventSink`]
//!
//! # Example
//!
//! ```ignore
//! struct Toasts;
//!
//! impl EventSink for Toasts {
//!     fn on_notification(&self, notification: Notification) { /* ... */ }
//! }
//!
//! let channel = ConnectionManager::new(endpoint, token, Config::default(), Toasts)?;
//! channel.connect();
//! ```

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
mod heartbeat;
pub mod reconnect;
pub mod router;
pub mod sink;
pub mod state;

pub use config::{Config, ReconnectConfig};
pub use connection::ConnectionManager;
pub use envelope::{Envelope, Notification, Severity};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use reconnect::ReconnectSchedule;
pub use sink::{ChannelEvent, EventSink, NoopSink};
pub use state::{ChannelState, ReadyState};
