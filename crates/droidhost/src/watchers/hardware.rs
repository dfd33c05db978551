//! Hardware request handling.
//!
//! The guest asks the host to suspend or reboot; what suspend means is a
//! host policy decision (`suspend_action` in the config).

use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::SuspendAction;
use crate::container::ContainerRuntime;
use crate::events::{EventReceiver, StateEvent};

pub async fn run(
    container: Arc<ContainerRuntime>,
    action: SuspendAction,
    session_shutdown: CancellationToken,
    mut events: EventReceiver,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("hardware subsystem stopping");
                return;
            }
            event = events.recv() => match event {
                Ok(StateEvent::Suspend) => match action {
                    SuspendAction::Stop => {
                        info!("suspend requested, stopping session");
                        session_shutdown.cancel();
                    }
                    SuspendAction::Freeze => {
                        info!("suspend requested, freezing container");
                        if let Err(e) = container.freeze().await {
                            error!("freeze failed: {e}");
                        }
                    }
                },
                Ok(StateEvent::Reboot) => {
                    info!("reboot requested");
                    if let Err(e) = reboot(&container).await {
                        error!("reboot failed: {e}");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("hardware subsystem lagged behind {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

async fn reboot(container: &ContainerRuntime) -> crate::container::ContainerResult<()> {
    container.stop().await?;
    container.start().await?;
    container.wait_for_running().await
}
