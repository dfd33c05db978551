//! Guest state monitor.
//!
//! Attaches the guest-side `droidplat events` stream and republishes each
//! JSON line on the broadcast channel. The stream is re-attached with a
//! short backoff when it ends; the guest restarts it with the platform
//! service.

use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::container::ContainerRuntime;
use crate::events::{EventSender, NotificationEvent, StateEvent};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Wire format of one guest event line.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    PackageStateChanged {
        mode: u32,
        package_name: String,
    },
    ClipboardChanged {
        text: String,
    },
    GnssStateChanged {
        active: bool,
    },
    NotificationPosted {
        hash: String,
        package_name: String,
        #[serde(default)]
        ticker: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_group_summary: bool,
        #[serde(default)]
        show_light: bool,
    },
    NotificationUpdated {
        hash: String,
        replaces_hash: String,
        package_name: String,
        #[serde(default)]
        ticker: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        show_light: bool,
    },
    NotificationRemoved {
        hash: String,
    },
    SuspendRequested,
    RebootRequested,
}

impl From<WireEvent> for StateEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::PackageStateChanged { mode, package_name } => {
                StateEvent::PackageStateChanged { mode, package_name }
            }
            WireEvent::ClipboardChanged { text } => StateEvent::ClipboardChanged { text },
            WireEvent::GnssStateChanged { active } => StateEvent::GnssActive { active },
            WireEvent::NotificationPosted {
                hash,
                package_name,
                ticker,
                title,
                text,
                is_group_summary,
                show_light,
            } => StateEvent::Notification(NotificationEvent::New {
                hash,
                package_name,
                ticker,
                title,
                text,
                is_group_summary,
                show_light,
            }),
            WireEvent::NotificationUpdated {
                hash,
                replaces_hash,
                package_name,
                ticker,
                title,
                text,
                show_light,
            } => StateEvent::Notification(NotificationEvent::Update {
                hash,
                replaces_hash,
                package_name,
                ticker,
                title,
                text,
                show_light,
            }),
            WireEvent::NotificationRemoved { hash } => {
                StateEvent::Notification(NotificationEvent::Delete { hash })
            }
            WireEvent::SuspendRequested => StateEvent::Suspend,
            WireEvent::RebootRequested => StateEvent::Reboot,
        }
    }
}

pub async fn run(container: Arc<ContainerRuntime>, events: EventSender, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match container.attach_streamed(&["droidplat", "events"]) {
            Ok(mut child) => {
                let Some(stdout) = child.stdout.take() else {
                    warn!("event stream has no stdout");
                    return;
                };
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = child.kill().await;
                            return;
                        }
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => forward(&events, &line),
                            Ok(None) | Err(_) => break,
                        }
                    }
                }
                debug!("event stream ended, reconnecting");
            }
            Err(e) => warn!("could not attach event stream: {e}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

fn forward(events: &EventSender, line: &str) {
    match serde_json::from_str::<WireEvent>(line) {
        Ok(wire) => {
            // send only fails when nobody subscribes, which is fine
            let _ = events.send(wire.into());
        }
        Err(e) => debug!("unparseable guest event: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_event() {
        let line = r#"{"event":"package_state_changed","mode":0,"package_name":"org.example.app"}"#;
        let wire: WireEvent = serde_json::from_str(line).unwrap();
        match StateEvent::from(wire) {
            StateEvent::PackageStateChanged { mode, package_name } => {
                assert_eq!(mode, 0);
                assert_eq!(package_name, "org.example.app");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification_with_missing_fields() {
        let line = r#"{"event":"notification_posted","hash":"abc","package_name":"org.example.app","ticker":"hello"}"#;
        let wire: WireEvent = serde_json::from_str(line).unwrap();
        match StateEvent::from(wire) {
            StateEvent::Notification(NotificationEvent::New {
                hash,
                ticker,
                title,
                is_group_summary,
                ..
            }) => {
                assert_eq!(hash, "abc");
                assert_eq!(ticker, "hello");
                assert_eq!(title, "");
                assert!(!is_group_summary);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_gnss_and_lifecycle_events() {
        let wire: WireEvent =
            serde_json::from_str(r#"{"event":"gnss_state_changed","active":true}"#).unwrap();
        assert!(matches!(
            StateEvent::from(wire),
            StateEvent::GnssActive { active: true }
        ));

        let wire: WireEvent = serde_json::from_str(r#"{"event":"suspend_requested"}"#).unwrap();
        assert!(matches!(StateEvent::from(wire), StateEvent::Suspend));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<WireEvent>(r#"{"event":"mystery"}"#).is_err());
    }
}
