// Integration tests for the push-channel connection manager, driven by a
// scripted connector under paused tokio time.
#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio::sync::watch;
use tokio::time::Instant;

use totosync_api::{Error, StaticEndpoint, StaticToken, TokenProvider};
use totosync_core::{BackoffSchedule, ConnectionManager, ConnectionState, ConnectionStatus};

use common::{RecordingSink, Script, ScriptedConnector, channel, closed_channel, settle};

fn manager(connector: Arc<ScriptedConnector>, sink: Arc<RecordingSink>) -> ConnectionManager {
    manager_with(connector, sink, Arc::new(StaticToken::new("secret")))
}

fn manager_with(
    connector: Arc<ScriptedConnector>,
    sink: Arc<RecordingSink>,
    token: Arc<dyn TokenProvider>,
) -> ConnectionManager {
    ConnectionManager::new(
        connector,
        Arc::new(StaticEndpoint::parse("http://192.168.1.1:8080").unwrap()),
        token,
        sink,
        BackoffSchedule::default(),
    )
}

async fn wait_status(rx: &mut watch::Receiver<ConnectionState>, status: ConnectionStatus) {
    rx.wait_for(|s| s.status == status).await.unwrap();
}

fn gaps_ms(at: &[Instant]) -> Vec<u64> {
    at.windows(2)
        .map(|w| u64::try_from((w[1] - w[0]).as_millis()).unwrap())
        .collect()
}

fn assert_gaps(actual: &[u64], expected: &[u64]) {
    assert_eq!(actual.len(), expected.len(), "gaps: {actual:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.abs_diff(*e) <= 2, "gaps {actual:?} != {expected:?}");
    }
}

// ── Backoff ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_delays_follow_backoff_table() {
    let (connector, mut calls) = ScriptedConnector::refusing();
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    manager.connect();

    let mut at = Vec::new();
    for _ in 0..9 {
        at.push(calls.recv().await.unwrap().at);
    }

    assert_gaps(
        &gaps_ms(&at),
        &[500, 1000, 2000, 5000, 8000, 15000, 30000, 30000],
    );
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::ClosedReconnecting);
    assert!(state.last_error.unwrap().contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_backoff() {
    let (connector, mut calls) = ScriptedConnector::new(vec![
        Script::Refuse,
        Script::Refuse,
        closed_channel(),
        Script::Refuse,
    ]);
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    manager.connect();

    let mut at = Vec::new();
    for _ in 0..4 {
        at.push(calls.recv().await.unwrap().at);
    }

    assert_gaps(&gaps_ms(&at), &[500, 1000, 500]);
}

#[tokio::test(start_paused = true)]
async fn open_clears_attempt_and_error() {
    let (tx, script) = channel();
    let (connector, _calls) = ScriptedConnector::new(vec![Script::Refuse, script]);
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    let mut state = manager.state_receiver();
    manager.connect();

    wait_status(&mut state, ConnectionStatus::ClosedReconnecting).await;
    assert_eq!(manager.state().attempt, 1);

    wait_status(&mut state, ConnectionStatus::Open).await;
    assert_eq!(
        manager.state(),
        ConnectionState {
            status: ConnectionStatus::Open,
            attempt: 0,
            last_error: None,
        }
    );
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn peer_close_schedules_reconnect() {
    let (connector, mut calls) = ScriptedConnector::new(vec![closed_channel()]);
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    let mut state = manager.state_receiver();
    manager.connect();

    let first = calls.recv().await.unwrap();
    wait_status(&mut state, ConnectionStatus::ClosedReconnecting).await;
    assert_eq!(
        manager.state().last_error.as_deref(),
        Some("connection closed by peer")
    );

    let second = calls.recv().await.unwrap();
    assert_gaps(&gaps_ms(&[first.at, second.at]), &[500]);
}

#[tokio::test(start_paused = true)]
async fn stream_error_schedules_reconnect() {
    let (tx, script) = channel();
    let (connector, mut calls) = ScriptedConnector::new(vec![script]);
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    let mut state = manager.state_receiver();
    manager.connect();

    wait_status(&mut state, ConnectionStatus::Open).await;
    tx.send(Err(Error::WebSocketClosed {
        code: 1011,
        reason: "internal error".into(),
    }))
    .unwrap();

    wait_status(&mut state, ConnectionStatus::ClosedReconnecting).await;
    assert!(
        manager
            .state()
            .last_error
            .unwrap()
            .contains("internal error")
    );
    calls.recv().await.unwrap();
    calls.recv().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn endpoint_error_schedules_reconnect() {
    let (connector, mut calls) = ScriptedConnector::refusing();
    let (sink, _frames) = RecordingSink::new();
    let manager = ConnectionManager::new(
        connector,
        Arc::new(StaticEndpoint::parse("ftp://192.168.1.1").unwrap()),
        Arc::new(StaticToken::none()),
        sink,
        BackoffSchedule::default(),
    );
    let mut state = manager.state_receiver();
    manager.connect();

    wait_status(&mut state, ConnectionStatus::ClosedReconnecting).await;
    let current = manager.state();
    assert_eq!(current.attempt, 1);
    assert!(current.last_error.unwrap().contains("ftp"));
    assert!(calls.try_recv().is_err());
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn teardown_cancels_pending_reconnect() {
    let (connector, mut calls) = ScriptedConnector::refusing();
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    let mut state = manager.state_receiver();
    manager.connect();

    calls.recv().await.unwrap();
    wait_status(&mut state, ConnectionStatus::ClosedReconnecting).await;

    manager.teardown();
    assert!(manager.state().is_disabled());

    tokio::time::sleep(Duration::from_secs(120)).await;
    settle().await;
    assert!(calls.try_recv().is_err());
    assert_eq!(manager.state().status, ConnectionStatus::Disabled);
}

#[tokio::test(start_paused = true)]
async fn teardown_closes_open_channel() {
    let (tx, script) = channel();
    let (connector, _calls) = ScriptedConnector::new(vec![script]);
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    let mut state = manager.state_receiver();
    manager.connect();

    wait_status(&mut state, ConnectionStatus::Open).await;
    manager.teardown();

    tokio::time::timeout(Duration::from_secs(1), tx.closed())
        .await
        .unwrap();
    assert!(manager.state().is_disabled());
}

#[tokio::test(start_paused = true)]
async fn dropping_manager_tears_down() {
    let (tx, script) = channel();
    let (connector, _calls) = ScriptedConnector::new(vec![script]);
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    let mut state = manager.state_receiver();
    manager.connect();

    wait_status(&mut state, ConnectionStatus::Open).await;
    drop(manager);

    tokio::time::timeout(Duration::from_secs(1), tx.closed())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn connect_after_teardown_is_noop() {
    let (connector, mut calls) = ScriptedConnector::refusing();
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);

    manager.teardown();
    manager.connect();
    settle().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(calls.try_recv().is_err());
    assert_eq!(manager.state().status, ConnectionStatus::Disabled);
}

// ── Frames ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn frames_reach_sink_in_order() {
    let (tx, script) = channel();
    let (connector, _calls) = ScriptedConnector::new(vec![script]);
    let (sink, mut frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    manager.connect();

    for frame in ["a", "b", "c"] {
        tx.send(Ok(frame.to_owned())).unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(frames.recv().await.unwrap());
    }
    assert_eq!(seen, ["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn connect_twice_opens_one_channel() {
    let (tx, script) = channel();
    let (connector, mut calls) = ScriptedConnector::new(vec![script]);
    let (sink, _frames) = RecordingSink::new();
    let manager = manager(connector, sink);
    let mut state = manager.state_receiver();

    manager.connect();
    manager.connect();
    wait_status(&mut state, ConnectionStatus::Open).await;
    manager.connect();
    settle().await;

    calls.recv().await.unwrap();
    assert!(calls.try_recv().is_err());
    drop(tx);
}

// ── Credentials ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn token_is_fetched_once_per_attempt() {
    let fetched = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fetched);
    let token = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Some(SecretString::from(format!("tok-{n}")))
    };

    let (connector, mut calls) = ScriptedConnector::refusing();
    let (sink, _frames) = RecordingSink::new();
    let manager = manager_with(connector, sink, Arc::new(token));
    manager.connect();

    let mut urls = Vec::new();
    for _ in 0..3 {
        urls.push(calls.recv().await.unwrap().url);
    }

    assert_eq!(fetched.load(Ordering::SeqCst), 3);
    assert_eq!(urls[0].as_str(), "ws://192.168.1.1:8080/ws?token=tok-0");
    assert_eq!(urls[2].as_str(), "ws://192.168.1.1:8080/ws?token=tok-2");
}
