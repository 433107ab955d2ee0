//! `watch`: run a sync session and stream state changes as JSON lines.

use std::sync::Arc;

use tracing::{info, warn};

use totosync_core::{EntitySnapshot, SlotFamilySnapshot, SyncSession};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output::{JsonLines, Line, changed};

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    info!(profile = %resolved.name, endpoint = %resolved.profile.endpoint, "starting session");

    let session = SyncSession::builder(resolved.sync)
        .endpoint(Arc::new(resolved.endpoint))
        .token(resolved.token)
        .rest_baseline(&resolved.transport)?
        .build()?;
    let mut out = JsonLines::stdout();

    if args.once {
        let result = session.refresh_baseline().await;
        session.teardown();
        result?;
        return print_snapshot(&session, &mut out);
    }

    let result = stream_changes(&session, &mut out).await;
    session.teardown();
    result
}

/// Print everything currently in the store.
fn print_snapshot<W: std::io::Write>(
    session: &SyncSession,
    out: &mut JsonLines<W>,
) -> Result<(), CliError> {
    let store = session.store();
    if let Some(system) = store.system() {
        out.emit(&Line::System {
            value: &system.value,
        })?;
    }
    if let Some(scan) = store.scan() {
        out.emit(&Line::Scan { value: &scan.value })?;
    }
    emit_services(out, &SlotFamilySnapshot::default(), &store.services_snapshot())?;
    emit_latest(out, &SlotFamilySnapshot::default(), &store.latest_snapshot())?;
    emit_entities(out, &EntitySnapshot::default(), &store.entities_snapshot())
}

/// Start the session and print changes until Ctrl-C.
async fn stream_changes(
    session: &SyncSession,
    out: &mut JsonLines<std::io::Stdout>,
) -> Result<(), CliError> {
    let store = session.store();

    // Subscribe before starting so the first baseline shows up as changes.
    let mut connection = session.subscribe_connection();
    let mut system = store.subscribe_system();
    let mut scan = store.subscribe_scan();
    let mut services = store.subscribe_services();
    let mut latest = store.subscribe_latest();
    let mut entities = store.subscribe_entities();

    let mut services_prev = services.current().clone();
    let mut latest_prev = latest.current().clone();
    let mut entities_prev = entities.current().clone();

    if let Err(e) = session.start().await {
        warn!(error = %e, "initial baseline failed, waiting for the push channel");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                return Ok(());
            }
            Some(state) = connection.changed() => {
                out.emit(&Line::connection(&state))?;
            }
            Some(Some(value)) = system.changed() => {
                out.emit(&Line::System { value: &value.value })?;
            }
            Some(Some(value)) = scan.changed() => {
                out.emit(&Line::Scan { value: &value.value })?;
            }
            Some(next) = services.changed() => {
                emit_services(out, &services_prev, &next)?;
                services_prev = next;
            }
            Some(next) = latest.changed() => {
                emit_latest(out, &latest_prev, &next)?;
                latest_prev = next;
            }
            Some(next) = entities.changed() => {
                emit_entities(out, &entities_prev, &next)?;
                entities_prev = next;
            }
        }
    }
}

fn emit_services<W: std::io::Write>(
    out: &mut JsonLines<W>,
    prev: &SlotFamilySnapshot,
    next: &SlotFamilySnapshot,
) -> Result<(), CliError> {
    for (name, value) in changed(prev, next) {
        out.emit(&Line::Service {
            name: &name,
            value: value.as_ref().map(|v| &v.value),
        })?;
    }
    Ok(())
}

fn emit_latest<W: std::io::Write>(
    out: &mut JsonLines<W>,
    prev: &SlotFamilySnapshot,
    next: &SlotFamilySnapshot,
) -> Result<(), CliError> {
    for (event, value) in changed(prev, next) {
        out.emit(&Line::Latest {
            event: &event,
            value: value.as_ref().map(|v| &v.value),
        })?;
    }
    Ok(())
}

fn emit_entities<W: std::io::Write>(
    out: &mut JsonLines<W>,
    prev: &EntitySnapshot,
    next: &EntitySnapshot,
) -> Result<(), CliError> {
    for (key, record) in changed(prev, next) {
        out.emit(&Line::Entity {
            key: key.as_str(),
            record: record.map(|r| r.to_value()),
        })?;
    }
    Ok(())
}
