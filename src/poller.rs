//! Periodic poller for the VATSIM data feed.
//!
//! The first cycle after `start` downloads the status document and caches its
//! list of data mirrors. Later cycles pick one mirror at random, download the
//! pilot list and hand it to every subscriber. A failed cycle is logged and
//! retried on the next tick; the poller itself never stops on errors.
//!
//! Ticks are one-shot and only re-armed once the current cycle has finished, so
//! cycles never overlap. Data is fetched at most once per refresh interval.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SettingsStore;
use crate::endpoint::EndpointSelector;
use crate::vatsim::{PilotReport, PollError, VatsimSource};

/// One downloaded pilot list, shared by every subscriber
pub type PilotBatch = Arc<Vec<PilotReport>>;

/// Receives every published batch.
///
/// Called on the poller's task while the fetch lock is held, so implementations
/// must return quickly. A panicking listener is logged and skipped.
pub trait BatchListener: Send + Sync {
    fn on_batch(&self, batch: &PilotBatch);
}

impl<F> BatchListener for F
where
    F: Fn(&PilotBatch) + Send + Sync,
{
    fn on_batch(&self, batch: &PilotBatch) {
        self(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type StartedListener = Arc<dyn Fn(bool) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&PollError) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    batches: Vec<(SubscriptionId, Arc<dyn BatchListener>)>,
    started: Vec<StartedListener>,
    errors: Vec<ErrorListener>,
}

/// The background task of one start/stop lifetime
struct RunningPoll {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct PollerInner {
    source: Arc<dyn VatsimSource>,
    settings: SettingsStore,
    selector: EndpointSelector,
    running: AtomicBool,
    has_data: AtomicBool,
    task: Mutex<Option<RunningPoll>>,
    /// Serializes fetch cycles
    fetch_lock: tokio::sync::Mutex<()>,
    /// Data mirrors from the status document, cached until `stop`
    data_urls: Mutex<Option<Vec<String>>>,
    listeners: Mutex<Listeners>,
}

/// Cheap to clone; clones share one poller.
#[derive(Clone)]
pub struct FeedPoller {
    inner: Arc<PollerInner>,
}

impl FeedPoller {
    pub fn new(source: Arc<dyn VatsimSource>, settings: SettingsStore) -> Self {
        Self::with_selector(source, settings, EndpointSelector::new())
    }

    pub fn with_selector(
        source: Arc<dyn VatsimSource>,
        settings: SettingsStore,
        selector: EndpointSelector,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                source,
                settings,
                selector,
                running: AtomicBool::new(false),
                has_data: AtomicBool::new(false),
                task: Mutex::new(None),
                fetch_lock: tokio::sync::Mutex::new(()),
                data_urls: Mutex::new(None),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether a batch has been published since the last `start`
    pub fn has_data(&self) -> bool {
        self.inner.has_data.load(Ordering::SeqCst)
    }

    /// Starts polling on the current tokio runtime. No-op when already running.
    pub fn start(&self) {
        {
            let mut task = self.inner.task.lock();
            if task.is_some() {
                return;
            }

            let cancel = CancellationToken::new();
            self.inner.has_data.store(false, Ordering::SeqCst);
            self.inner.running.store(true, Ordering::SeqCst);
            let handle = tokio::spawn(run(Arc::clone(&self.inner), cancel.clone()));
            *task = Some(RunningPoll { cancel, handle });
        }

        info!("VATSIM poller started");
        self.inner.notify_started(true);
    }

    /// Stops polling and forgets the cached mirrors. No-op when already stopped.
    ///
    /// A fetch that is in flight completes in the background but its result is
    /// discarded.
    pub fn stop(&self) {
        if self.stop_task().is_some() {
            info!("VATSIM poller stopped");
            self.inner.notify_started(false);
        }
    }

    /// `stop`, then wait for the background task to exit.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.stop_task() {
            info!("VATSIM poller stopped");
            self.inner.notify_started(false);
            if let Err(e) = handle.await {
                warn!(error = %e, "VATSIM poller task ended abnormally");
            }
        }
    }

    fn stop_task(&self) -> Option<JoinHandle<()>> {
        let running = self.inner.task.lock().take()?;
        running.cancel.cancel();
        self.inner.running.store(false, Ordering::SeqCst);
        *self.inner.data_urls.lock() = None;
        Some(running.handle)
    }

    pub fn subscribe(&self, listener: Arc<dyn BatchListener>) -> SubscriptionId {
        let mut listeners = self.inner.listeners.lock();
        listeners.next_id += 1;
        let id = SubscriptionId(listeners.next_id);
        listeners.batches.push((id, listener));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.batches.len();
        listeners.batches.retain(|(existing, _)| *existing != id);
        listeners.batches.len() != before
    }

    /// Called with the new state whenever the poller starts or stops
    pub fn on_started_changed<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().started.push(Arc::new(listener));
    }

    /// Called for every failed cycle except cancellations
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&PollError) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().errors.push(Arc::new(listener));
    }
}

impl std::fmt::Debug for FeedPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPoller")
            .field("running", &self.is_running())
            .field("has_data", &self.has_data())
            .finish()
    }
}

async fn run(inner: Arc<PollerInner>, cancel: CancellationToken) {
    let mut last_download: Option<Instant> = None;

    loop {
        let settings = inner.settings.current();
        let due = last_download.is_none_or(|at| at.elapsed() >= settings.refresh_interval());

        if due {
            match inner.poll_once(&cancel).await {
                Ok(true) => last_download = Some(Instant::now()),
                Ok(false) => {}
                Err(PollError::Cancelled) => trace!("VATSIM fetch discarded after stop"),
                Err(e) => {
                    metrics::counter!("vatsim.fetch.failed_total").increment(1);
                    warn!(error = %e, "VATSIM fetch failed, retrying on next tick");
                    inner.notify_error(&e);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.tick_interval()) => {}
        }
    }

    debug!("VATSIM poll loop exited");
}

impl PollerInner {
    /// Runs one cycle. Returns true when a batch was published.
    async fn poll_once(&self, cancel: &CancellationToken) -> Result<bool, PollError> {
        let _cycle = self.fetch_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let settings = self.settings.current();
        let cached = self.data_urls.lock().clone();

        let Some(urls) = cached else {
            let status = self.source.fetch_status(&settings.status_url).await?;
            let urls = status.data_urls();
            if urls.is_empty() {
                return Err(PollError::NoDataEndpoints);
            }

            let mut cache = self.data_urls.lock();
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            metrics::counter!("vatsim.status.discovered_total").increment(1);
            debug!(mirrors = urls.len(), "VATSIM data mirrors discovered");
            *cache = Some(urls);
            return Ok(false);
        };

        let url = self.selector.choose_random_url(&urls);
        let data = self.source.fetch_data(&url).await?;

        if cancel.is_cancelled() || !self.running.load(Ordering::SeqCst) {
            return Err(PollError::Cancelled);
        }

        let batch: PilotBatch = Arc::new(data.pilots);
        metrics::counter!("vatsim.fetch.success_total").increment(1);
        metrics::gauge!("vatsim.pilots.received").set(batch.len() as f64);
        trace!(url = %url, pilots = batch.len(), "Publishing VATSIM batch");

        self.has_data.store(true, Ordering::SeqCst);
        self.publish(&batch);
        Ok(true)
    }

    fn publish(&self, batch: &PilotBatch) {
        let subscribers: Vec<Arc<dyn BatchListener>> = self
            .listeners
            .lock()
            .batches
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for subscriber in subscribers {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_batch(batch)));
            if delivered.is_err() {
                metrics::counter!("vatsim.subscriber.panicked_total").increment(1);
                error!("VATSIM batch subscriber panicked, continuing with the next one");
            }
        }
    }

    fn notify_started(&self, started: bool) {
        let listeners = self.listeners.lock().started.clone();
        for listener in listeners {
            listener(started);
        }
    }

    fn notify_error(&self, error: &PollError) {
        let listeners = self.listeners.lock().errors.clone();
        for listener in listeners {
            listener(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VatsimSettings;
    use crate::vatsim::{StatusEndpoints, VatsimData, VatsimStatus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct FakeSource {
        mirrors: Mutex<Vec<String>>,
        fail_data: AtomicBool,
        status_calls: AtomicUsize,
        data_calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeSource {
        fn with_mirrors(mirrors: &[&str]) -> Self {
            Self {
                mirrors: Mutex::new(mirrors.iter().map(|m| m.to_string()).collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl VatsimSource for FakeSource {
        async fn fetch_status(&self, _url: &str) -> Result<VatsimStatus, PollError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(VatsimStatus {
                data: StatusEndpoints {
                    v3: self.mirrors.lock().clone(),
                },
            })
        }

        async fn fetch_data(&self, _url: &str) -> Result<VatsimData, PollError> {
            self.data_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| PollError::Other(e.to_string()))?;
            }
            if self.fail_data.load(Ordering::SeqCst) {
                return Err(PollError::Other("mirror unavailable".to_string()));
            }
            Ok(VatsimData {
                pilots: vec![PilotReport {
                    cid: 1,
                    callsign: "BAW1".to_string(),
                    ..Default::default()
                }],
            })
        }
    }

    struct Recorder {
        batches: Arc<AtomicUsize>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    fn poller_with(source: Arc<FakeSource>, refresh_seconds: u64) -> (FeedPoller, Recorder) {
        let settings = SettingsStore::new(VatsimSettings {
            refresh_seconds,
            ..Default::default()
        });
        let poller = FeedPoller::with_selector(source, settings, EndpointSelector::with_seed(7));

        let batches = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&batches);
        poller.subscribe(Arc::new(move |batch: &PilotBatch| {
            assert_eq!(batch.len(), 1);
            counted.fetch_add(1, Ordering::SeqCst);
        }));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&errors);
        poller.on_error(move |e| recorded.lock().push(e.to_string()));

        (poller, Recorder { batches, errors })
    }

    async fn advance(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovers_mirrors_then_publishes() {
        let source = Arc::new(FakeSource::with_mirrors(&["https://a", "https://b"]));
        let (poller, recorder) = poller_with(Arc::clone(&source), 15);

        poller.start();
        assert!(poller.is_running());
        assert!(!poller.has_data());

        advance(500).await;
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 0);

        advance(1000).await;
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 1);
        assert!(poller.has_data());

        poller.shutdown().await;
        assert!(recorder.errors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_once_per_refresh_interval() {
        let source = Arc::new(FakeSource::with_mirrors(&["https://a"]));
        let (poller, recorder) = poller_with(Arc::clone(&source), 15);

        poller.start();
        advance(1500).await;
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 1);

        advance(10_000).await;
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 1);

        advance(5_000).await;
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 2);
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 1);

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_status_is_retried() {
        let source = Arc::new(FakeSource::default());
        let (poller, recorder) = poller_with(Arc::clone(&source), 15);

        poller.start();
        advance(500).await;
        assert_eq!(recorder.errors.lock().len(), 1);
        assert!(recorder.errors.lock()[0].contains("no data endpoints"));

        *source.mirrors.lock() = vec!["https://a".to_string()];
        advance(2000).await;
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 1);
        assert!(poller.is_running());

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_failures_are_isolated() {
        let source = Arc::new(FakeSource::with_mirrors(&["https://a"]));
        source.fail_data.store(true, Ordering::SeqCst);
        let (poller, recorder) = poller_with(Arc::clone(&source), 15);

        poller.start();
        advance(3500).await;
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.errors.lock().len(), 3);
        assert!(poller.is_running());

        source.fail_data.store(false, Ordering::SeqCst);
        advance(1000).await;
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 1);

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_forces_rediscovery() {
        let source = Arc::new(FakeSource::with_mirrors(&["https://a"]));
        let (poller, _recorder) = poller_with(Arc::clone(&source), 15);

        poller.start();
        advance(1500).await;
        poller.stop();
        assert!(!poller.is_running());

        poller.start();
        assert!(!poller.has_data());
        advance(500).await;
        assert_eq!(source.status_calls.load(Ordering::SeqCst), 2);

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let source = Arc::new(FakeSource::with_mirrors(&["https://a"]));
        let (poller, _recorder) = poller_with(source, 15);

        let changes = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&changes);
        poller.on_started_changed(move |started| recorded.lock().push(started));

        poller.start();
        poller.start();
        poller.stop();
        poller.stop();

        assert_eq!(*changes.lock(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribed_listener_gets_nothing() {
        let source = Arc::new(FakeSource::with_mirrors(&["https://a"]));
        let (poller, recorder) = poller_with(source, 1);

        let extra = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&extra);
        let id = poller.subscribe(Arc::new(move |_: &PilotBatch| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));

        poller.start();
        advance(1500).await;
        assert_eq!(extra.load(Ordering::SeqCst), 1);

        assert!(poller.unsubscribe(id));
        assert!(!poller.unsubscribe(id));
        advance(2000).await;
        assert_eq!(extra.load(Ordering::SeqCst), 1);
        assert!(recorder.batches.load(Ordering::SeqCst) >= 2);

        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_fetch_is_discarded_after_stop() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(FakeSource {
            gate: Some(Arc::clone(&gate)),
            ..FakeSource::with_mirrors(&["https://a"])
        });
        let (poller, recorder) = poller_with(Arc::clone(&source), 15);

        poller.start();
        advance(1500).await;
        assert_eq!(source.data_calls.load(Ordering::SeqCst), 1);

        poller.stop();
        gate.add_permits(1);
        advance(100).await;

        assert_eq!(recorder.batches.load(Ordering::SeqCst), 0);
        assert!(recorder.errors.lock().is_empty());
        assert!(!poller.has_data());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_subscriber_does_not_stop_polling() {
        let source = Arc::new(FakeSource::with_mirrors(&["https://a"]));
        let (poller, recorder) = poller_with(source, 1);
        poller.subscribe(Arc::new(|batch: &PilotBatch| {
            if !batch.is_empty() {
                panic!("subscriber bug");
            }
        }));
        let after = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&after);
        poller.subscribe(Arc::new(move |_: &PilotBatch| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));

        poller.start();
        advance(3500).await;

        assert!(poller.is_running());
        assert!(recorder.batches.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            after.load(Ordering::SeqCst),
            recorder.batches.load(Ordering::SeqCst)
        );

        poller.shutdown().await;
    }
}
