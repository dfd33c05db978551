//! Notification relay.
//!
//! Mirrors guest notifications onto the host desktop. Guest message
//! hashes map to desktop notification handles so updates replace in
//! place and removals close the right popup.

use log::{debug, warn};
use notify_rust::{Notification, NotificationHandle, Timeout, Urgency};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::container::platform::PlatformApi;
use crate::events::{EventReceiver, NotificationEvent, StateEvent};

const NOTIFICATION_TIMEOUT_MS: u32 = 5000;

pub async fn run(
    platform: Arc<dyn PlatformApi>,
    mut events: EventReceiver,
    cancel: CancellationToken,
) {
    let mut relay = NotificationRelay::new(platform);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("notification relay stopping");
                return;
            }
            event = events.recv() => match event {
                Ok(StateEvent::Notification(ev)) => relay.handle(ev).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("notification relay lagged behind {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

struct NotificationRelay {
    platform: Arc<dyn PlatformApi>,
    /// Guest message hash to open desktop notification.
    open: HashMap<String, NotificationHandle>,
}

impl NotificationRelay {
    fn new(platform: Arc<dyn PlatformApi>) -> Self {
        Self {
            platform,
            open: HashMap::new(),
        }
    }

    async fn handle(&mut self, event: NotificationEvent) {
        match event {
            NotificationEvent::New {
                hash,
                package_name,
                ticker,
                title,
                text,
                is_group_summary,
                show_light,
            } => {
                // group summaries duplicate the per-message notifications
                if is_group_summary {
                    return;
                }
                let app_name = self.app_name(&package_name).await;
                match post(&app_name, &ticker, &title, &text, show_light, None) {
                    Ok(handle) => {
                        self.open.insert(hash, handle);
                    }
                    Err(e) => warn!("could not post notification: {e}"),
                }
            }
            NotificationEvent::Update {
                hash,
                replaces_hash,
                package_name,
                ticker,
                title,
                text,
                show_light,
            } => {
                let Some(previous) = self.open.remove(&replaces_hash) else {
                    debug!("update for unknown notification {replaces_hash}");
                    return;
                };
                let app_name = self.app_name(&package_name).await;
                match post(
                    &app_name,
                    &ticker,
                    &title,
                    &text,
                    show_light,
                    Some(previous.id()),
                ) {
                    Ok(handle) => {
                        self.open.insert(hash, handle);
                    }
                    Err(e) => warn!("could not update notification: {e}"),
                }
            }
            NotificationEvent::Delete { hash } => {
                if let Some(handle) = self.open.remove(&hash) {
                    handle.close();
                }
            }
        }
    }

    async fn app_name(&self, package_name: &str) -> String {
        match self.platform.app_info(package_name).await {
            Ok(Some(app)) => app.name,
            _ => package_name.to_string(),
        }
    }
}

fn post(
    app_name: &str,
    ticker: &str,
    title: &str,
    text: &str,
    show_light: bool,
    replaces: Option<u32>,
) -> notify_rust::error::Result<NotificationHandle> {
    // messages without title/text carry everything in the ticker
    let (summary, body) = if title.is_empty() || text.is_empty() {
        ("", ticker)
    } else {
        (title, text)
    };

    let mut notification = Notification::new();
    notification
        .appname(app_name)
        .summary(summary)
        .body(body)
        .timeout(Timeout::Milliseconds(NOTIFICATION_TIMEOUT_MS))
        .urgency(if show_light {
            Urgency::Normal
        } else {
            Urgency::Low
        });
    if let Some(id) = replaces {
        notification.id(id);
    }
    notification.show()
}
