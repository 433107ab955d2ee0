// ── Connection manager ──
//
// Owns the push channel: one background task per session that connects,
// feeds every text frame to a `FrameSink` in arrival order, and on close
// or error schedules a reconnect from a fixed backoff table. Transport
// errors never leave this module; they only move `ConnectionState`.
//
// State machine:
//
//   idle -> connecting -> open -> closed-reconnecting -> connecting -> ...
//                    \-> closed-reconnecting (connect failed)
//   any  -> disabled (teardown, terminal)

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use totosync_api::endpoint::push_url;
use totosync_api::websocket::redacted;
use totosync_api::{EndpointResolver, PushConnector, TokenProvider};

use crate::config::BackoffSchedule;
use crate::model::{ConnectionState, ConnectionStatus};
use crate::stream::{ConnectionStream, Subscription};

/// Receives raw text frames from the push channel.
///
/// Called from the connection task, one frame at a time, in delivery
/// order. Implementations must not block.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, text: &str);
}

struct Inner {
    connector: Arc<dyn PushConnector>,
    endpoint: Arc<dyn EndpointResolver>,
    token: Arc<dyn TokenProvider>,
    sink: Arc<dyn FrameSink>,
    backoff: BackoffSchedule,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

/// Push-channel lifecycle with bounded backoff.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        endpoint: Arc<dyn EndpointResolver>,
        token: Arc<dyn TokenProvider>,
        sink: Arc<dyn FrameSink>,
        backoff: BackoffSchedule,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(Inner {
                connector,
                endpoint,
                token,
                sink,
                backoff,
                state,
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe(&self) -> ConnectionStream {
        Subscription::new(self.inner.state.subscribe())
    }

    /// Raw state receiver, for wiring into a [`PollCoordinator`](crate::PollCoordinator).
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Start the connection loop. Must be called from within a tokio
    /// runtime.
    ///
    /// A no-op while the loop is already running, and after
    /// [`teardown`](Self::teardown).
    pub fn connect(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run(inner)));
    }

    /// Stop for good: cancel any pending reconnect timer, close the
    /// active channel and move to `disabled`. Does not wait for the
    /// background task; nothing it does afterwards reaches shared state.
    pub fn teardown(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        let changed = self.inner.state.send_if_modified(|state| {
            if state.status == ConnectionStatus::Disabled {
                return false;
            }
            state.status = ConnectionStatus::Disabled;
            true
        });
        if changed {
            info!("Push channel torn down");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Background connection loop ───────────────────────────────────────

/// Main loop: connect -> read -> on close or error, back off -> reconnect.
async fn run(inner: Arc<Inner>) {
    loop {
        if !inner.transition(|state| state.status = ConnectionStatus::Connecting) {
            return;
        }

        let closed = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return,
            reason = inner.open_and_read() => reason,
        };

        let Some(delay) = inner.schedule_reconnect(closed) else {
            return;
        };

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

impl Inner {
    /// Apply `f` unless torn down. Returns `true` if applied.
    fn transition<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut ConnectionState),
    {
        self.state.send_if_modified(|state| {
            if state.status == ConnectionStatus::Disabled || self.cancel.is_cancelled() {
                return false;
            }
            f(state);
            true
        })
    }

    /// Open one channel and pump frames until it ends. Returns the reason
    /// the channel went away.
    async fn open_and_read(&self) -> String {
        let token = self.token.token();
        let url = match self
            .endpoint
            .base_url()
            .and_then(|base| push_url(&base, token.as_ref()))
        {
            Ok(url) => url,
            Err(e) => return e.to_string(),
        };

        let mut frames = match self.connector.open(url.clone()).await {
            Ok(frames) => frames,
            Err(e) => return e.to_string(),
        };

        if !self.transition(|state| {
            state.status = ConnectionStatus::Open;
            state.attempt = 0;
            state.last_error = None;
        }) {
            return "torn down".into();
        }
        info!(url = %redacted(&url), "Push channel open");

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => {
                    if self.cancel.is_cancelled() {
                        return "torn down".into();
                    }
                    self.sink.on_frame(&text);
                }
                Err(e) => return e.to_string(),
            }
        }

        info!("Push channel closed by peer");
        "connection closed by peer".into()
    }

    /// Record the close and compute the reconnect delay from the attempt
    /// count before incrementing it. `None` if torn down meanwhile.
    fn schedule_reconnect(&self, reason: String) -> Option<Duration> {
        let mut scheduled = None;
        self.transition(|state| {
            let delay = self.backoff.delay(state.attempt);
            state.status = ConnectionStatus::ClosedReconnecting;
            state.attempt = state.attempt.saturating_add(1);
            state.last_error = Some(reason.clone());
            scheduled = Some((delay, state.attempt));
        });

        let (delay, attempt) = scheduled?;
        warn!(
            error = %reason,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Push channel down, reconnect scheduled"
        );
        debug!(?delay, "waiting before reconnect");
        Some(delay)
    }
}
