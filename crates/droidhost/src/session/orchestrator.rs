//! Session startup and shutdown sequencing.
//!
//! Start order: preconditions, probes, socket bind (the single-instance
//! lock), container boot, then the subsystems. Stop runs the reverse:
//! subsystems first, container last.

use anyhow::Result;
use log::{error, info, warn};
use std::fs;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::apps::desktop::DesktopEntryStore;
use crate::apps::monitor::AppRegistry;
use crate::config::Config;
use crate::container::platform::PlatformApi;
use crate::container::{ContainerRuntime, DEFAULT_LXC_PATH};
use crate::error::Error;
use crate::events::{self, EventReceiver, EventSender};
use crate::ipc::client::SessionClient;
use crate::ipc::server::{bind_socket, serve_session, SessionServer};
use crate::ipc::session_socket_path;
use crate::watchers;

use super::subsystem::{Subsystem, SubsystemSet};
use super::SessionInfo;

pub struct SessionManager {
    config: Config,
    container: Arc<ContainerRuntime>,
}

/// One receiver per consuming subsystem, all subscribed before the state
/// monitor starts publishing so no early event is lost.
struct EventTaps {
    registry: EventReceiver,
    clipboard: EventReceiver,
    location: EventReceiver,
    notifications: EventReceiver,
    hardware: EventReceiver,
}

impl EventTaps {
    fn new(events: &EventSender) -> Self {
        Self {
            registry: events.subscribe(),
            clipboard: events.subscribe(),
            location: events.subscribe(),
            notifications: events.subscribe(),
            hardware: events.subscribe(),
        }
    }
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let container = Arc::new(ContainerRuntime::new(
            config.container_name.clone(),
            DEFAULT_LXC_PATH,
        ));
        Self { config, container }
    }

    pub fn container(&self) -> &Arc<ContainerRuntime> {
        &self.container
    }

    /// Run the session daemon in the foreground until a stop arrives.
    pub async fn run(&self) -> Result<()> {
        let info = SessionInfo::from_env(&self.config)?;
        info.check_preconditions()?;
        info!(
            "session for {} (density {}, display {})",
            info.user, info.lcd_density, info.display_size
        );

        // joining an existing session is a success
        let socket_path = session_socket_path();
        if SessionClient::new(&socket_path).ping().await.is_ok() {
            info!("session is already running");
            sd_notify_ready();
            return Ok(());
        }

        let listener = bind_socket(&socket_path)?;

        info!("starting container {}", self.container.name());
        self.container.start().await?;
        if let Err(e) = self.container.wait_for_running().await {
            let _ = fs::remove_file(&socket_path);
            return Err(e.into());
        }
        self.push_display_hints(&info).await;

        let shutdown = CancellationToken::new();
        let (events_tx, _) = events::channel();
        let taps = EventTaps::new(&events_tx);

        let mut subsystems = SubsystemSet::new();
        self.start_subsystems(&mut subsystems, &shutdown, events_tx, taps, &info);

        let server = Arc::new(SessionServer {
            container: self.container.clone(),
            data_dir: info.data_dir.clone(),
            lcd_density: info.lcd_density.clone(),
            display_size: info.display_size.clone(),
            shutdown: shutdown.clone(),
        });

        sd_notify_ready();
        info!("session ready on {}", socket_path.display());

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;

        let serve = serve_session(server, listener, shutdown.clone());
        tokio::pin!(serve);

        loop {
            tokio::select! {
                _ = &mut serve => break,
                _ = sigterm.recv() => {
                    info!("received SIGTERM, stopping session");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, stopping session");
                    break;
                }
                _ = sigusr1.recv() => {
                    // suspend preparation: the container stays up
                    info!("received SIGUSR1, stopping subsystems");
                    subsystems.stop_all().await;
                }
            }
        }

        shutdown.cancel();
        subsystems.stop_all().await;
        if let Err(e) = self.container.stop().await {
            warn!("container stop failed: {e}");
        }
        let _ = fs::remove_file(&socket_path);
        info!("session stopped");
        Ok(())
    }

    /// Stop a running session from outside the daemon. Falls back to
    /// stopping the container directly when the daemon is unreachable.
    pub async fn stop(&self) -> Result<()> {
        let client = SessionClient::new(session_socket_path());
        match client.stop().await {
            Ok(()) => {
                info!("session stopping");
                Ok(())
            }
            Err(e) => {
                warn!("session daemon unreachable ({e:#}), stopping container directly");
                self.container.stop().await?;
                Ok(())
            }
        }
    }

    /// Fixed start order; one subsystem failing to come up never takes
    /// the others down. The taps were subscribed before the state monitor
    /// publishes, so subsystems see events from the very first line.
    fn start_subsystems(
        &self,
        set: &mut SubsystemSet,
        shutdown: &CancellationToken,
        events: EventSender,
        taps: EventTaps,
        info: &SessionInfo,
    ) {
        let container = self.container.clone();
        set.push(Subsystem::spawn("state-monitor", shutdown, move |cancel| {
            watchers::state::run(container, events, cancel)
        }));

        match self.start_app_registry(shutdown, taps.registry, info) {
            Ok(subsystem) => set.push(subsystem),
            Err(e) => error!("app registry failed to start: {e}"),
        }

        let rx = taps.clipboard;
        set.push(Subsystem::spawn("clipboard", shutdown, move |cancel| {
            watchers::clipboard::run(rx, cancel)
        }));

        let rx = taps.location;
        set.push(Subsystem::spawn("location", shutdown, move |cancel| {
            watchers::location::run(rx, cancel)
        }));

        let platform: Arc<dyn PlatformApi> = self.container.clone();
        let rx = taps.notifications;
        set.push(Subsystem::spawn("notifications", shutdown, move |cancel| {
            watchers::notifications::run(platform, rx, cancel)
        }));

        let container = self.container.clone();
        let action = self.config.suspend_action;
        let session_shutdown = shutdown.clone();
        let rx = taps.hardware;
        set.push(Subsystem::spawn("hardware", shutdown, move |cancel| {
            watchers::hardware::run(container, action, session_shutdown, rx, cancel)
        }));

        let container = self.container.clone();
        set.push(Subsystem::spawn("screen", shutdown, move |cancel| {
            watchers::screen::run(container, cancel)
        }));
    }

    fn start_app_registry(
        &self,
        shutdown: &CancellationToken,
        rx: EventReceiver,
        info: &SessionInfo,
    ) -> crate::error::Result<Subsystem> {
        let entries_dir = DesktopEntryStore::default_dir();
        fs::create_dir_all(&entries_dir).map_err(|_| Error::SubsystemStart {
            name: "app-registry",
        })?;
        let entries = DesktopEntryStore::new(entries_dir, info.data_dir.join("icons"));
        let platform: Arc<dyn PlatformApi> = self.container.clone();
        let registry = AppRegistry::new(platform, entries);
        Ok(Subsystem::spawn("app-registry", shutdown, move |cancel| {
            registry.run(cancel, rx)
        }))
    }

    /// Best-effort session hints for the guest; it falls back to its own
    /// defaults when the display values are "0".
    async fn push_display_hints(&self, info: &SessionInfo) {
        let pulse_dir = info.pulse_runtime_dir.display().to_string();
        for (key, value) in [
            ("droidhost.lcd_density", info.lcd_density.as_str()),
            ("droidhost.display_size", info.display_size.as_str()),
            ("droidhost.pulse_runtime_path", pulse_dir.as_str()),
        ] {
            if let Err(e) = self.container.set_prop(key, value).await {
                warn!("could not set {key}: {e}");
            }
        }
    }
}

/// Tell systemd we are up, when running under it.
fn sd_notify_ready() {
    let Ok(socket) = std::env::var("NOTIFY_SOCKET") else {
        return;
    };
    match std::os::unix::net::UnixDatagram::unbound() {
        Ok(sock) => {
            if let Err(e) = sock.send_to(b"READY=1", &socket) {
                warn!("sd_notify failed: {e}");
            }
        }
        Err(e) => warn!("sd_notify socket failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StateEvent;

    #[tokio::test]
    async fn test_taps_see_events_published_before_subsystems_spawn() {
        let (events_tx, _) = events::channel();
        let mut taps = EventTaps::new(&events_tx);

        // the state monitor can publish the moment it is spawned, before
        // any consumer task has been scheduled
        events_tx
            .send(StateEvent::ClipboardChanged {
                text: "early".to_string(),
            })
            .unwrap();

        for rx in [
            &mut taps.registry,
            &mut taps.clipboard,
            &mut taps.location,
            &mut taps.notifications,
            &mut taps.hardware,
        ] {
            match rx.recv().await.unwrap() {
                StateEvent::ClipboardChanged { text } => assert_eq!(text, "early"),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
