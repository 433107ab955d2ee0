// ── Polling fallback coordinator ──
//
// Runs baseline fetches on fixed intervals while a guard holds: the push
// channel is down, or a tracked process (the scan) is running. Results go
// through the merge engine exactly like push events. When the guard
// clears, polling stops and any fetch in flight is dropped unapplied.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;
use crate::merge::{MergeEngine, Update};
use crate::model::{ConnectionState, SlotValue};

/// Fetches a full snapshot of some part of the backend state.
///
/// Object-safe so sessions can hold heterogeneous fetchers.
pub trait BaselineFetcher: Send + Sync {
    /// Short name for logs (`system`, `scan`, `devices`).
    fn name(&self) -> &str;

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Update>, CoreError>>;
}

/// Condition under which a poll task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollGuard {
    /// The push channel is not open.
    ChannelDown,
    /// The last scan status seen is `running`.
    ProcessRunning,
    Either,
}

impl PollGuard {
    pub fn holds(self, channel_open: bool, process_running: bool) -> bool {
        match self {
            Self::ChannelDown => !channel_open,
            Self::ProcessRunning => process_running,
            Self::Either => !channel_open || process_running,
        }
    }
}

/// One fetcher polled on an interval under a guard.
#[derive(Clone)]
pub struct PollTask {
    pub fetcher: Arc<dyn BaselineFetcher>,
    pub interval: Duration,
    pub guard: PollGuard,
}

impl PollTask {
    pub fn new(fetcher: Arc<dyn BaselineFetcher>, interval: Duration, guard: PollGuard) -> Self {
        Self {
            fetcher,
            interval,
            guard,
        }
    }
}

/// Fetch once and merge the result as a baseline. Returns `true` if the
/// store changed.
pub async fn fetch_baseline(
    engine: &MergeEngine,
    fetcher: &dyn BaselineFetcher,
) -> Result<bool, CoreError> {
    let source = engine.baseline_source();
    let updates = fetcher
        .fetch()
        .await
        .map_err(|e| CoreError::Baseline {
            fetcher: fetcher.name().to_owned(),
            source: Box::new(e),
        })?;
    let changed = engine.apply_all(updates, source);
    engine.store().mark_baseline();
    Ok(changed)
}

async fn poll_once(engine: &MergeEngine, fetcher: &dyn BaselineFetcher) {
    match fetch_baseline(engine, fetcher).await {
        Ok(changed) => debug!(fetcher = fetcher.name(), changed, "baseline polled"),
        Err(e) => debug!(fetcher = fetcher.name(), error = %e, "baseline poll failed"),
    }
}

// ── PollCoordinator ──────────────────────────────────────────────────

/// Owns the poll tasks of one session.
pub struct PollCoordinator {
    engine: Arc<MergeEngine>,
    connection: watch::Receiver<ConnectionState>,
    tasks: Vec<PollTask>,
    on_process_done: Vec<Arc<dyn BaselineFetcher>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PollCoordinator {
    pub fn new(engine: Arc<MergeEngine>, connection: watch::Receiver<ConnectionState>) -> Self {
        Self {
            engine,
            connection,
            tasks: Vec::new(),
            on_process_done: Vec::new(),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_task(mut self, task: PollTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// Fetch this once whenever the scan leaves `running`.
    pub fn on_process_done(mut self, fetcher: Arc<dyn BaselineFetcher>) -> Self {
        self.on_process_done.push(fetcher);
        self
    }

    pub fn tasks(&self) -> &[PollTask] {
        &self.tasks
    }

    /// Spawn every poll task. A no-op if already started or stopped.
    pub fn start(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut handles = lock(&self.handles);
        if !handles.is_empty() {
            return;
        }

        for task in &self.tasks {
            let inputs =
                GuardInputs::new(self.connection.clone(), self.engine.store().scan_receiver());
            let engine = Arc::clone(&self.engine);
            let task = task.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = poll_loop(engine, task, inputs) => {}
                }
            }));
        }

        if !self.on_process_done.is_empty() {
            let engine = Arc::clone(&self.engine);
            let fetchers = self.on_process_done.clone();
            let scan = self.engine.store().scan_receiver();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = completion_loop(engine, fetchers, scan) => {}
                }
            }));
        }
    }

    /// Stop all polling for good.
    pub fn stop(&self) {
        self.cancel.cancel();
        for handle in lock(&self.handles).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for PollCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Guard evaluation ─────────────────────────────────────────────────

/// Scan status values reported by the backend.
const SCAN_RUNNING: &str = "running";
const SCAN_FINISHED: [&str; 2] = ["completed", "stopped"];

/// Last scan status seen on the scan slot.
///
/// The slot is replace-whole, so a bare progress frame (`{progress: 42}`)
/// wipes `status`. Such a value says nothing about the phase and leaves
/// the tracked status as it was.
#[derive(Debug, Default)]
struct ScanTracker {
    status: Option<String>,
}

impl ScanTracker {
    /// Record the slot's status. Returns `true` if the tracked status
    /// changed.
    fn observe(&mut self, slot: Option<&SlotValue>) -> bool {
        let next = match slot {
            None => None,
            Some(value) => match value.status() {
                Some(status) => Some(status),
                None => return false,
            },
        };
        if self.status.as_deref() == next {
            return false;
        }
        self.status = next.map(str::to_owned);
        true
    }

    fn running(&self) -> bool {
        self.status.as_deref() == Some(SCAN_RUNNING)
    }

    fn finished(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| SCAN_FINISHED.contains(&status))
    }
}

struct GuardInputs {
    connection: watch::Receiver<ConnectionState>,
    scan: watch::Receiver<Option<Arc<SlotValue>>>,
    tracker: ScanTracker,
}

impl GuardInputs {
    fn new(
        connection: watch::Receiver<ConnectionState>,
        scan: watch::Receiver<Option<Arc<SlotValue>>>,
    ) -> Self {
        Self {
            connection,
            scan,
            tracker: ScanTracker::default(),
        }
    }

    fn evaluate(&mut self, guard: PollGuard) -> bool {
        let open = self.connection.borrow_and_update().is_open();
        let slot = self.scan.borrow_and_update().clone();
        self.tracker.observe(slot.as_deref());
        guard.holds(open, self.tracker.running())
    }

    /// Resolve once the guard evaluates to `want`.
    async fn wait_for(&mut self, guard: PollGuard, want: bool) {
        loop {
            if self.evaluate(guard) == want {
                return;
            }
            let alive = tokio::select! {
                r = self.connection.changed() => r.is_ok(),
                r = self.scan.changed() => r.is_ok(),
            };
            if !alive {
                // Owner gone; nothing will change any more.
                std::future::pending::<()>().await;
            }
        }
    }
}

// ── Background loops ─────────────────────────────────────────────────

async fn poll_loop(engine: Arc<MergeEngine>, task: PollTask, mut inputs: GuardInputs) {
    loop {
        inputs.wait_for(task.guard, true).await;
        debug!(
            fetcher = task.fetcher.name(),
            interval_ms = u64::try_from(task.interval.as_millis()).unwrap_or(u64::MAX),
            "polling started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + task.interval, task.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = inputs.wait_for(task.guard, false) => break,
                () = async {
                    ticker.tick().await;
                    poll_once(&engine, task.fetcher.as_ref()).await;
                } => {}
            }
        }
        debug!(fetcher = task.fetcher.name(), "polling stopped");
    }
}

/// Refresh once each time the scan reaches a finished status.
async fn completion_loop(
    engine: Arc<MergeEngine>,
    fetchers: Vec<Arc<dyn BaselineFetcher>>,
    mut scan: watch::Receiver<Option<Arc<SlotValue>>>,
) {
    let mut tracker = ScanTracker::default();
    let initial = scan.borrow_and_update().clone();
    tracker.observe(initial.as_deref());

    while scan.changed().await.is_ok() {
        let slot = scan.borrow_and_update().clone();
        if tracker.observe(slot.as_deref()) && tracker.finished() {
            debug!(status = ?tracker.status, "scan finished, refreshing baseline");
            for fetcher in &fetchers {
                poll_once(&engine, fetcher.as_ref()).await;
            }
        }
    }
}
