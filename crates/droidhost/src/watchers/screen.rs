//! Screen lock watcher.
//!
//! Host-initiated counterpart to the guest suspend request: when logind
//! reports the session as locked or idle, the container is frozen; when
//! it unlocks, the container thaws. The watcher reconnects with a delay
//! when the bus connection drops.

use anyhow::{Context, Result};
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zbus::fdo::PropertiesProxy;
use zbus::zvariant::Value;

use crate::container::{ContainerRuntime, ContainerState};

const LOGIND_DESTINATION: &str = "org.freedesktop.login1";
const SESSION_PATH: &str = "/org/freedesktop/login1/session/auto";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub async fn run(container: Arc<ContainerRuntime>, cancel: CancellationToken) {
    loop {
        if let Err(e) = watch_session(&container, &cancel).await {
            warn!("screen watcher lost logind: {e:#}");
        }
        if cancel.is_cancelled() {
            debug!("screen watcher stopping");
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

async fn watch_session(container: &ContainerRuntime, cancel: &CancellationToken) -> Result<()> {
    let conn = zbus::Connection::system()
        .await
        .context("connecting to the system bus")?;
    let props = PropertiesProxy::builder(&conn)
        .destination(LOGIND_DESTINATION)?
        .path(SESSION_PATH)?
        .build()
        .await
        .context("watching logind session properties")?;
    let mut changes = props.receive_properties_changed().await?;

    info!("watching logind session lock state");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            signal = changes.next() => {
                let Some(signal) = signal else {
                    anyhow::bail!("logind signal stream ended");
                };
                let args = signal.args()?;
                if args.interface_name().as_str() != SESSION_INTERFACE {
                    continue;
                }
                let Some(locked) = lock_state(args.changed_properties()) else {
                    continue;
                };
                apply(container, locked).await;
            }
        }
    }
}

/// Extract the lock state from a property change, if it carries one.
/// Explicit locking and the idle hint both count as the screen going off.
fn lock_state(changed: &HashMap<&str, Value<'_>>) -> Option<bool> {
    for key in ["LockedHint", "IdleHint"] {
        if let Some(Value::Bool(locked)) = changed.get(key) {
            return Some(*locked);
        }
    }
    None
}

async fn apply(container: &ContainerRuntime, locked: bool) {
    let state = match container.status().await {
        Ok(state) => state,
        Err(e) => {
            warn!("could not read container state: {e}");
            return;
        }
    };

    match transition(state, locked) {
        Some(ScreenAction::Freeze) => {
            info!("screen locked, freezing container");
            if let Err(e) = container.freeze().await {
                warn!("freeze on screen lock failed: {e}");
            }
        }
        Some(ScreenAction::Unfreeze) => {
            info!("screen unlocked, thawing container");
            if let Err(e) = container.unfreeze().await {
                warn!("unfreeze on screen unlock failed: {e}");
            }
        }
        None => debug!("no container transition for locked={locked} in state {state}"),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ScreenAction {
    Freeze,
    Unfreeze,
}

/// A lock only freezes a running container and an unlock only thaws a
/// frozen one; a stopped container is left alone either way.
fn transition(state: ContainerState, locked: bool) -> Option<ScreenAction> {
    match (state, locked) {
        (ContainerState::Running, true) => Some(ScreenAction::Freeze),
        (ContainerState::Frozen, false) => Some(ScreenAction::Unfreeze),
        _ => None,
    }
}
