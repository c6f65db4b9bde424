//! Live feed from the review service.
//!
//! Connects to the `/ws` endpoint, prints every notification and detection, and
//! shows the channel state as it changes. Stop with Ctrl-C.
//!
//! ```sh
//! REVIEW_WS_URL=ws://localhost:8003/ws REVIEW_TOKEN=... \
//!     RUST_LOG=info,review_channel=debug cargo run --example review_feed
//! ```

use std::time::Duration;

use review_channel::ws::{ChannelEvent, Config, ConnectionManager, ReconnectConfig, Severity};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint =
        std::env::var("REVIEW_WS_URL").unwrap_or_else(|_| "ws://localhost:8003/ws".to_owned());
    let token = SecretString::from(std::env::var("REVIEW_TOKEN")?);

    let config = Config::builder()
        .heartbeat_timeout(Duration::from_secs(10))
        .reconnect(
            ReconnectConfig::builder()
                .max_delay(Duration::from_secs(60))
                .build(),
        )
        .build();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = ConnectionManager::new(&endpoint, token, config, events_tx)?;
    let mut states = channel.state_receiver();

    channel.connect();

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                ChannelEvent::Notification(notification) => match notification.severity {
                    Severity::Error => error!(message = %notification.message, "alert"),
                    Severity::Warning => warn!(message = %notification.message, "notification"),
                    _ => info!(message = %notification.message, "notification"),
                },
                ChannelEvent::Detection(detection) => {
                    info!(id = ?detection.get("detection_id"), "detection");
                }
                ChannelEvent::RetryScheduled { attempt, delay } => {
                    info!(attempt, ?delay, "reconnecting");
                }
                ChannelEvent::Error(message) => warn!(%message, "channel error"),
                other => info!(event = ?other),
            },
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                info!(?state, ready_state = %state.ready_state(), "state");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.disconnect();
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}
