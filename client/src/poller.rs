use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info};

use fanctl_common::DeviceStatus;

use crate::transport::StatusSource;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Periodically fetches device status and publishes the latest snapshot.
///
/// At most one fetch is in flight: a tick that comes due while a fetch is
/// still running is skipped, not queued. Failed fetches keep the previous
/// snapshot. The background task is aborted on [`stop`](Self::stop) and on
/// drop.
pub struct StatusPoller<S: ?Sized> {
    source: Arc<S>,
    snapshot: Arc<watch::Sender<Option<DeviceStatus>>>,
    task: Option<JoinHandle<()>>,
}

impl<S: StatusSource + ?Sized + 'static> StatusPoller<S> {
    pub fn new(source: Arc<S>) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            source,
            snapshot: Arc::new(snapshot),
            task: None,
        }
    }

    /// Starts polling, the first fetch immediately. Restarts if already
    /// running.
    pub fn start(&mut self, period: Duration) {
        self.stop();

        let period = period.max(MIN_PERIOD);
        let source = Arc::clone(&self.source);
        let snapshot = Arc::clone(&self.snapshot);
        info!(period_ms = period.as_millis() as u64, "status polling started");
        self.task = Some(tokio::spawn(poll_loop(source, snapshot, period)));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("status polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn latest(&self) -> Option<DeviceStatus> {
        *self.snapshot.borrow()
    }

    /// Receiver that is notified on every successful fetch.
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceStatus>> {
        self.snapshot.subscribe()
    }
}

impl<S: ?Sized> Drop for StatusPoller<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_loop<S: StatusSource + ?Sized>(
    source: Arc<S>,
    snapshot: Arc<watch::Sender<Option<DeviceStatus>>>,
    period: Duration,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match source.fetch_status().await {
            Ok(status) => {
                snapshot.send_replace(Some(status));
            }
            Err(err) => debug!("status poll missed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use fanctl_common::{DeviceMode, ReportedMode};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{SessionError, TransportError};

    /// Fetches that take `latency`; every call listed in `failing` errors.
    struct ScriptedSource {
        latency: Duration,
        failing: Vec<usize>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(latency: Duration, failing: Vec<usize>) -> Self {
            Self {
                latency,
                failing,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self) -> Result<DeviceStatus, SessionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&call) {
                return Err(TransportError::Status {
                    path: "/status.json".to_string(),
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                }
                .into());
            }
            Ok(DeviceStatus {
                temperature: Some(20.0 + call as f32),
                mode: Some(ReportedMode::Known(DeviceMode::Auto)),
                ..DeviceStatus::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_is_immediate() {
        let source = Arc::new(ScriptedSource::new(Duration::from_millis(10), Vec::new()));
        let mut poller = StatusPoller::new(Arc::clone(&source));
        let mut updates = poller.subscribe();

        poller.start(Duration::from_secs(60));
        updates.changed().await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(poller.latest().and_then(|status| status.temperature), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetches_never_overlap() {
        let source = Arc::new(ScriptedSource::new(Duration::from_millis(700), Vec::new()));
        let mut poller = StatusPoller::new(Arc::clone(&source));

        poller.start(Duration::from_millis(250));
        time::sleep(Duration::from_millis(2_000)).await;
        poller.stop();

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        // Fetches start at 0, 700 and 1400 ms; the ticks in between are skipped.
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_last_snapshot() {
        let source = Arc::new(ScriptedSource::new(Duration::from_millis(1), vec![1, 2]));
        let mut poller = StatusPoller::new(Arc::clone(&source));

        poller.start(Duration::from_millis(100));
        time::sleep(Duration::from_millis(250)).await;

        assert!(source.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(poller.latest().and_then(|status| status.temperature), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_fetching() {
        let source = Arc::new(ScriptedSource::new(Duration::from_millis(1), Vec::new()));
        let mut poller = StatusPoller::new(Arc::clone(&source));

        poller.start(Duration::from_millis(100));
        time::sleep(Duration::from_millis(150)).await;
        poller.stop();
        let calls = source.calls.load(Ordering::SeqCst);
        time::sleep(Duration::from_secs(5)).await;

        assert!(!poller.is_running());
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }
}
