use crate::remote::RemoteService;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, timeout};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct PollerHandle {
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(mut self) {
        self.abort();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Polls the detection endpoint every `period`, starting one period from now,
/// and hands each non-empty label to `on_label`.
pub fn spawn_detection_poller<F>(
    remote: Arc<dyn RemoteService>,
    period: Duration,
    on_label: F,
) -> PollerHandle
where
    F: Fn(String) + Send + 'static,
{
    let period = period.max(MIN_POLL_INTERVAL);

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match timeout(period, remote.poll_detection()).await {
                Ok(Ok(Some(label))) if !label.trim().is_empty() => on_label(label),
                Ok(Ok(_)) => {}
                Ok(Err(err)) => debug!(error = %err, "detection poll failed"),
                Err(_) => debug!(?period, "detection poll timed out"),
            }
        }
    });

    PollerHandle { task: Some(task) }
}
