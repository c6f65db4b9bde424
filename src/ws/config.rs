#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

use super::reconnect::ReconnectSchedule;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_CLOSE_TIMEOUT_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for the event channel.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval between `heartbeat` probes while the channel is open
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Maximum time to wait for a `heartbeat_ack` before treating the channel as dead.
    /// `None` disables the check; probes are still sent.
    pub heartbeat_timeout: Option<Duration>,
    /// How long `disconnect()` waits for the server to answer the close handshake
    #[builder(default = DEFAULT_CLOSE_TIMEOUT_DURATION)]
    pub close_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            heartbeat_timeout: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Number of scheduled retries before the channel gives up
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Delay before the first retry; every further retry doubles it
    #[builder(default = DEFAULT_BASE_DELAY_DURATION)]
    pub base_delay: Duration,
    /// Upper bound for a single delay. `None` lets the delay keep doubling.
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY_DURATION,
            max_delay: None,
        }
    }
}

impl From<ReconnectConfig> for ReconnectSchedule {
    fn from(config: ReconnectConfig) -> Self {
        ReconnectSchedule::new(config.max_attempts, config.base_delay)
            .with_max_delay(config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;

    #[test]
    fn default_heartbeat_is_thirty_seconds() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout, None);
    }

    #[test]
    fn default_schedule_gives_up_after_five_retries() {
        let mut schedule: ReconnectSchedule = ReconnectConfig::default().into();

        let delays: Vec<_> = std::iter::from_fn(|| schedule.next_backoff()).collect();

        assert_eq!(
            delays,
            [5, 10, 20, 40, 80].map(Duration::from_secs).to_vec(),
            "default policy retries five times starting at five seconds"
        );
    }

    #[test]
    fn builder_fills_defaults() {
        let config = Config::builder()
            .heartbeat_interval(Duration::from_millis(250))
            .reconnect(
                ReconnectConfig::builder()
                    .base_delay(Duration::from_millis(10))
                    .build(),
            )
            .build();

        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.close_timeout, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(10));
        assert_eq!(config.reconnect.max_delay, None);
    }
}
