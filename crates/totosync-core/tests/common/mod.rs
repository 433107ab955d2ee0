// Shared fakes for the core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use totosync_api::websocket::FrameStream;
use totosync_api::{Error, PushConnector};
use totosync_core::{BaselineFetcher, CoreError, FrameSink, SlotId, Update};

// ── Scripted push connector ─────────────────────────────────────────

/// What the next `open` call does.
pub enum Script {
    Refuse,
    /// Accept and serve frames from this receiver until its sender drops.
    Accept(mpsc::UnboundedReceiver<Result<String, Error>>),
}

/// One recorded `open` call.
#[derive(Debug, Clone)]
pub struct OpenCall {
    pub at: Instant,
    pub url: Url,
}

/// Pops one [`Script`] per `open`; refuses once the script runs out.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    calls: mpsc::UnboundedSender<OpenCall>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Script>) -> (Arc<Self>, mpsc::UnboundedReceiver<OpenCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            calls,
        });
        (connector, rx)
    }

    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<OpenCall>) {
        Self::new(Vec::new())
    }
}

impl PushConnector for ScriptedConnector {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<FrameStream, Error>> {
        let _ = self.calls.send(OpenCall {
            at: Instant::now(),
            url,
        });
        let next = self.script.lock().unwrap().pop_front();
        async move {
            match next {
                Some(Script::Accept(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
                Some(Script::Refuse) | None => {
                    Err(Error::WebSocketConnect("connection refused".into()))
                }
            }
        }
        .boxed()
    }
}

/// An accepted channel whose frames the test controls.
pub fn channel() -> (mpsc::UnboundedSender<Result<String, Error>>, Script) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Script::Accept(rx))
}

/// An accepted channel that the peer closes straight away.
pub fn closed_channel() -> Script {
    let (_tx, script) = channel();
    script
}

// ── Frame sink ──────────────────────────────────────────────────────

/// Forwards every frame to a channel.
pub struct RecordingSink(mpsc::UnboundedSender<String>);

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self(tx)), rx)
    }
}

impl FrameSink for RecordingSink {
    fn on_frame(&self, text: &str) {
        let _ = self.0.send(text.to_owned());
    }
}

// ── Baseline fetchers ───────────────────────────────────────────────

/// Replaces one slot with a fixed value, counting fetches.
pub struct SlotFetcher {
    name: String,
    slot: SlotId,
    value: Mutex<Value>,
    fail: Mutex<bool>,
    pub calls: mpsc::UnboundedSender<Instant>,
}

impl SlotFetcher {
    pub fn new(
        name: &str,
        slot: SlotId,
        value: Value,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Instant>) {
        let (calls, rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(Self {
            name: name.to_owned(),
            slot,
            value: Mutex::new(value),
            fail: Mutex::new(false),
            calls,
        });
        (fetcher, rx)
    }

    pub fn set_value(&self, value: Value) {
        *self.value.lock().unwrap() = value;
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl BaselineFetcher for SlotFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Update>, CoreError>> {
        let _ = self.calls.send(Instant::now());
        let fail = *self.fail.lock().unwrap();
        let value = self.value.lock().unwrap().clone();
        async move {
            if fail {
                return Err(CoreError::Timeout);
            }
            Ok(vec![Update::ReplaceSlot {
                slot: self.slot.clone(),
                value,
            }])
        }
        .boxed()
    }
}

/// Never completes until released; records whether it was dropped early.
pub struct GatedFetcher {
    pub gate: Arc<tokio::sync::Notify>,
    pub started: mpsc::UnboundedSender<()>,
    value: Value,
}

impl GatedFetcher {
    pub fn new(value: Value) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (started, rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(Self {
            gate: Arc::new(tokio::sync::Notify::new()),
            started,
            value,
        });
        (fetcher, rx)
    }
}

impl BaselineFetcher for GatedFetcher {
    fn name(&self) -> &str {
        "gated"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<Update>, CoreError>> {
        let _ = self.started.send(());
        let gate = Arc::clone(&self.gate);
        let value = self.value.clone();
        async move {
            gate.notified().await;
            Ok(vec![Update::ReplaceSlot {
                slot: SlotId::System,
                value,
            }])
        }
        .boxed()
    }
}

/// Let spawned tasks run without advancing paused time.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
