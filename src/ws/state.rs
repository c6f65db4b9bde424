//! Channel lifecycle.
//!
//! Every state change of the connection driver goes through [`ChannelState::apply`],
//! which also owns the retry bookkeeping of the [`ReconnectSchedule`].

use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::reconnect::ReconnectSchedule;

/// Lifecycle of the event channel.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not connected and not trying to be
    Idle,
    /// A transport open is in flight
    Connecting {
        /// Retries scheduled before this open; `0` for a caller-initiated connect
        attempt: u32,
    },
    /// Transport is open
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// `disconnect()` was called; waiting for the close handshake
    Closing,
    /// A retry timer is armed
    PendingRetry {
        /// Retry number that will run when the timer fires
        attempt: u32,
        /// Delay the timer was armed with
        delay: Duration,
    },
    /// The retry ceiling was reached; only an explicit `connect()` resumes
    GivenUp {
        /// Retries that were made before giving up
        attempts: u32,
    },
}

impl ChannelState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn ready_state(self) -> ReadyState {
        match self {
            Self::Idle | Self::PendingRetry { .. } | Self::GivenUp { .. } => ReadyState::Closed,
            Self::Connecting { .. } => ReadyState::Connecting,
            Self::Connected { .. } => ReadyState::Open,
            Self::Closing => ReadyState::Closing,
        }
    }

    /// Single transition function of the channel.
    ///
    /// Pairs that have no arrow in the lifecycle leave the state unchanged, which makes
    /// repeated `connect()`/`disconnect()` calls no-ops.
    pub(crate) fn apply(self, transition: Transition, schedule: &mut ReconnectSchedule) -> Self {
        match (self, transition) {
            (Self::Idle | Self::GivenUp { .. }, Transition::Connect) => Self::Connecting {
                attempt: schedule.attempts(),
            },
            (Self::PendingRetry { attempt, .. }, Transition::Connect | Transition::RetryElapsed) => {
                Self::Connecting { attempt }
            }
            (Self::Connecting { .. }, Transition::Opened) => {
                schedule.reset();
                Self::Connected {
                    since: Instant::now(),
                }
            }
            (Self::Connecting { .. }, Transition::OpenFailed) => Self::retry_or_give_up(schedule),
            (Self::Connected { .. }, Transition::Closed { code }) if code == CloseCode::Normal => {
                Self::Idle
            }
            (Self::Connected { .. }, Transition::Closed { .. }) => Self::retry_or_give_up(schedule),
            (Self::Connected { .. }, Transition::Disconnect) => Self::Closing,
            (
                Self::Connecting { .. } | Self::PendingRetry { .. } | Self::GivenUp { .. },
                Transition::Disconnect,
            )
            | (Self::Closing, Transition::TeardownComplete) => {
                schedule.reset();
                Self::Idle
            }
            (state, _) => state,
        }
    }

    fn retry_or_give_up(schedule: &mut ReconnectSchedule) -> Self {
        match schedule.next_backoff() {
            Some(delay) => Self::PendingRetry {
                attempt: schedule.attempts(),
                delay,
            },
            None => Self::GivenUp {
                attempts: schedule.attempts(),
            },
        }
    }
}

/// Coarse transport state, as reported by `ready_state()`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ReadyState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Events that move the channel between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Connect,
    Opened,
    OpenFailed,
    Closed { code: CloseCode },
    RetryElapsed,
    Disconnect,
    TeardownComplete,
}
