use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Periodic liveness ticker.
///
/// The monitor never writes to the socket itself: each tick is delivered through
/// [`HeartbeatMonitor::tick`] and the connection driver sends the probe.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    period: Duration,
    tick_tx: mpsc::UnboundedSender<()>,
    tick_rx: mpsc::UnboundedReceiver<()>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(period: Duration) -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        Self {
            period,
            tick_tx,
            tick_rx,
            task: None,
        }
    }

    /// Start ticking every period, first tick one period from now. No-op when running.
    pub(crate) fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.drain();

        let period = self.period;
        let first = Instant::now() + period;
        let tick_tx = self.tick_tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tick_tx.send(()).is_err() {
                    break;
                }
            }
        }));
    }

    /// Abort the ticking task and discard ticks that were not consumed yet.
    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.drain();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Wait for the next tick. Pending forever while stopped.
    pub(crate) async fn tick(&mut self) {
        if self.task.is_none() {
            std::future::pending::<()>().await;
        }
        // The monitor keeps a sender alive, so the channel never closes.
        _ = self.tick_rx.recv().await;
    }

    fn drain(&mut self) {
        while self.tick_rx.try_recv().is_ok() {}
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{advance, timeout};

    use super::*;

    const PERIOD: Duration = Duration::from_secs(30);

    /// Count ticks that become ready within `window` of virtual time.
    async fn ticks_within(monitor: &mut HeartbeatMonitor, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        let mut count = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, monitor.tick()).await.is_err() {
                break;
            }
            count += 1;
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let mut monitor = HeartbeatMonitor::new(PERIOD);
        monitor.start();

        let early = ticks_within(&mut monitor, PERIOD - Duration::from_secs(1)).await;
        let on_time = ticks_within(&mut monitor, Duration::from_secs(2)).await;

        assert_eq!(early, 0);
        assert_eq!(on_time, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_period() {
        let mut monitor = HeartbeatMonitor::new(PERIOD);
        monitor.start();

        let ticks = ticks_within(&mut monitor, PERIOD * 3 + Duration::from_secs(1)).await;

        assert_eq!(ticks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let mut monitor = HeartbeatMonitor::new(PERIOD);
        monitor.start();
        monitor.start();

        let ticks = ticks_within(&mut monitor, PERIOD * 2 + Duration::from_secs(1)).await;

        assert_eq!(ticks, 2, "a second start must not add a second ticker");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_ticks() {
        let mut monitor = HeartbeatMonitor::new(PERIOD);
        monitor.start();
        advance(PERIOD + Duration::from_secs(1)).await;

        monitor.stop();

        assert!(!monitor.is_running(), "monitor should report stopped");
        assert_eq!(ticks_within(&mut monitor, PERIOD * 3).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_ticks_again() {
        let mut monitor = HeartbeatMonitor::new(PERIOD);
        monitor.start();
        monitor.stop();
        monitor.start();

        let ticks = ticks_within(&mut monitor, PERIOD + Duration::from_secs(1)).await;

        assert_eq!(ticks, 1);
    }
}
