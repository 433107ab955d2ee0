// ── Sync session ──
//
// Full lifecycle for one backend: store, merge engine, dispatcher,
// connection manager and poll coordinator, wired together. This is the
// entry point for consumers.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};

use totosync_api::{
    BaselineClient, EndpointResolver, PushConnector, StaticToken, TokenProvider, TransportConfig,
    WsConnector,
};

use crate::baseline::RestBaseline;
use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::dispatch::{DispatchTable, Dispatcher};
use crate::error::CoreError;
use crate::merge::MergeEngine;
use crate::model::{ConnectionState, EntityKey};
use crate::poll::{BaselineFetcher, PollCoordinator, PollGuard, PollTask, fetch_baseline};
use crate::store::DataStore;
use crate::stream::ConnectionStream;

// ── SyncSession ──────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Created idle; [`start`]
/// loads a baseline and opens the push channel; [`teardown`] stops
/// everything for good.
///
/// [`start`]: Self::start
/// [`teardown`]: Self::teardown
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SyncConfig,
    store: Arc<DataStore>,
    engine: Arc<MergeEngine>,
    dispatcher: Arc<Dispatcher>,
    connection: ConnectionManager,
    poll: PollCoordinator,
    baseline: Vec<Arc<dyn BaselineFetcher>>,
}

impl SyncSession {
    pub fn builder(config: SyncConfig) -> SyncSessionBuilder {
        SyncSessionBuilder::new(config)
    }

    /// Load the initial baseline, then open the push channel and start
    /// the poll tasks.
    ///
    /// The channel is opened even when the baseline fails; the returned
    /// error only reports that failure. Must be called from within a
    /// tokio runtime.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.is_torn_down() {
            return Err(CoreError::SessionClosed);
        }

        let baseline = self.refresh_baseline().await;
        if self.is_torn_down() {
            return Err(CoreError::SessionClosed);
        }
        if let Err(ref e) = baseline {
            warn!(error = %e, "initial baseline failed, continuing with push channel");
        }

        self.inner.connection.connect();
        self.inner.poll.start();
        info!("sync session started");
        baseline.map(|_| ())
    }

    /// Run every baseline fetcher once. All fetchers run even if one
    /// fails; the first failure is returned. `Ok(true)` if the store
    /// changed.
    ///
    /// A fetch that completes after [`teardown`](Self::teardown) is
    /// discarded and the call returns [`CoreError::SessionClosed`].
    pub async fn refresh_baseline(&self) -> Result<bool, CoreError> {
        if self.is_torn_down() {
            return Err(CoreError::SessionClosed);
        }

        let mut changed = false;
        let mut first_error = None;
        for fetcher in &self.inner.baseline {
            match fetch_baseline(&self.inner.engine, fetcher.as_ref()).await {
                Ok(c) => changed |= c,
                Err(e) => {
                    warn!(error = %e, "baseline fetch failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if self.is_torn_down() {
            return Err(CoreError::SessionClosed);
        }
        first_error.map_or(Ok(changed), Err)
    }

    /// Stop for good: cancel reconnect timers, close the channel and stop
    /// polling. Synchronous; nothing mutates the store afterwards, not
    /// even a baseline or optimistic call that was already in flight.
    pub fn teardown(&self) {
        self.inner.poll.stop();
        self.inner.connection.teardown();
        self.inner.store.close();
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.connection.state().is_disabled()
    }

    /// Speculatively patch an entity while `remote` runs. See
    /// [`MergeEngine::optimistic`]. After teardown `remote` still runs but
    /// the store is left alone.
    pub async fn optimistic<T, E, Fut>(
        &self,
        key: impl Into<EntityKey>,
        patch: Map<String, Value>,
        remote: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.inner.engine.optimistic(key, patch, remote).await
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn engine(&self) -> &Arc<MergeEngine> {
        &self.inner.engine
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn subscribe_connection(&self) -> ConnectionStream {
        self.inner.connection.subscribe()
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Assembles a [`SyncSession`] from its collaborators.
pub struct SyncSessionBuilder {
    config: SyncConfig,
    endpoint: Option<Arc<dyn EndpointResolver>>,
    token: Arc<dyn TokenProvider>,
    connector: Arc<dyn PushConnector>,
    baseline: Vec<Arc<dyn BaselineFetcher>>,
    polls: Vec<PollTask>,
    on_process_done: Vec<Arc<dyn BaselineFetcher>>,
}

impl SyncSessionBuilder {
    fn new(config: SyncConfig) -> Self {
        Self {
            config,
            endpoint: None,
            token: Arc::new(StaticToken::none()),
            connector: Arc::new(WsConnector::new()),
            baseline: Vec::new(),
            polls: Vec::new(),
            on_process_done: Vec::new(),
        }
    }

    pub fn endpoint(mut self, endpoint: Arc<dyn EndpointResolver>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn token(mut self, token: Arc<dyn TokenProvider>) -> Self {
        self.token = token;
        self
    }

    /// Replace the WebSocket connector (tests use a scripted one).
    pub fn connector(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Add a fetcher to the initial and on-demand baseline.
    pub fn baseline(mut self, fetcher: Arc<dyn BaselineFetcher>) -> Self {
        self.baseline.push(fetcher);
        self
    }

    pub fn poll(mut self, task: PollTask) -> Self {
        self.polls.push(task);
        self
    }

    /// Fetch this once whenever the scan leaves `running`.
    pub fn on_process_done(mut self, fetcher: Arc<dyn BaselineFetcher>) -> Self {
        self.on_process_done.push(fetcher);
        self
    }

    /// Wire the standard REST baseline: system, scan and entity list
    /// fetchers for the initial baseline; system and entities polled
    /// while the channel is down; scan polled while running or down;
    /// entities refreshed when a scan completes.
    ///
    /// Requires [`endpoint`](Self::endpoint) (and usually
    /// [`token`](Self::token)) to be set first.
    pub fn rest_baseline(self, transport: &TransportConfig) -> Result<Self, CoreError> {
        let endpoint = self.endpoint.clone().ok_or_else(|| CoreError::Config {
            message: "an endpoint is required for the REST baseline".into(),
        })?;
        let client = Arc::new(BaselineClient::new(
            endpoint,
            Arc::clone(&self.token),
            transport,
        )?);

        let system: Arc<dyn BaselineFetcher> = Arc::new(RestBaseline::system(Arc::clone(&client)));
        let scan: Arc<dyn BaselineFetcher> = Arc::new(RestBaseline::scan(Arc::clone(&client)));
        let entities: Arc<dyn BaselineFetcher> = Arc::new(RestBaseline::entities(
            client,
            self.config.entity.clone(),
        ));

        let poll_interval = self.config.poll_interval;
        let scan_interval = self.config.scan_poll_interval;

        Ok(self
            .baseline(Arc::clone(&system))
            .baseline(Arc::clone(&scan))
            .baseline(Arc::clone(&entities))
            .poll(PollTask::new(system, poll_interval, PollGuard::ChannelDown))
            .poll(PollTask::new(
                Arc::clone(&entities),
                poll_interval,
                PollGuard::ChannelDown,
            ))
            .poll(PollTask::new(scan, scan_interval, PollGuard::Either))
            .on_process_done(entities))
    }

    pub fn build(self) -> Result<SyncSession, CoreError> {
        let endpoint = self.endpoint.ok_or_else(|| CoreError::Config {
            message: "an endpoint is required".into(),
        })?;

        let store = Arc::new(DataStore::new());
        let engine = Arc::new(MergeEngine::new(Arc::clone(&store), self.config.ordering));
        let table = DispatchTable::new(
            self.config.entity.clone(),
            self.config.latest_events.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(table, Arc::clone(&engine)));

        let connection = ConnectionManager::new(
            self.connector,
            endpoint,
            self.token,
            Arc::clone(&dispatcher) as Arc<dyn crate::connection::FrameSink>,
            self.config.backoff.clone(),
        );

        let mut poll = PollCoordinator::new(Arc::clone(&engine), connection.state_receiver());
        for task in self.polls {
            poll = poll.with_task(task);
        }
        for fetcher in self.on_process_done {
            poll = poll.on_process_done(fetcher);
        }

        Ok(SyncSession {
            inner: Arc::new(SessionInner {
                config: self.config,
                store,
                engine,
                dispatcher,
                connection,
                poll,
                baseline: self.baseline,
            }),
        })
    }
}
