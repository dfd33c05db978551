//! Clipboard relay.
//!
//! Forwards guest clipboard changes to the host compositor through
//! `wl-copy`.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::{EventReceiver, StateEvent};

pub async fn run(mut events: EventReceiver, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("clipboard relay stopping");
                return;
            }
            event = events.recv() => match event {
                Ok(StateEvent::ClipboardChanged { text }) => {
                    if let Err(e) = copy_to_host(&text).await {
                        warn!("clipboard relay failed: {e:#}");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("clipboard relay lagged behind {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

async fn copy_to_host(text: &str) -> Result<()> {
    let mut child = Command::new("wl-copy")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawning wl-copy")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .await
            .context("writing clipboard payload")?;
        // dropping stdin closes the pipe and lets wl-copy finish
    }

    let status = child.wait().await.context("waiting for wl-copy")?;
    if !status.success() {
        bail!("wl-copy exited with {status}");
    }
    debug!("forwarded {} clipboard bytes", text.len());
    Ok(())
}
