//! App registry subsystem.
//!
//! Polls the guest app list every two seconds and additionally reacts to
//! targeted package events, both through the same reconcile path.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::container::platform::PlatformApi;
use crate::events::{EventReceiver, StateEvent};

use super::desktop::DesktopEntryStore;
use super::{reconcile, AppSnapshot};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const WARMUP_INTERVAL: Duration = Duration::from_secs(1);

const PACKAGE_ADDED: u32 = 0;
const PACKAGE_REMOVED: u32 = 1;

pub struct AppRegistry {
    platform: Arc<dyn PlatformApi>,
    entries: DesktopEntryStore,
    snapshot: AppSnapshot,
}

impl AppRegistry {
    pub fn new(platform: Arc<dyn PlatformApi>, entries: DesktopEntryStore) -> Self {
        Self {
            platform,
            entries,
            snapshot: AppSnapshot::default(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken, mut events: EventReceiver) {
        if !self.wait_for_initial(&cancel).await {
            return;
        }
        info!("app registry primed with {} apps", self.snapshot.len());

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("app registry stopping");
                    return;
                }
                _ = ticker.tick() => self.refresh().await,
                event = events.recv() => match event {
                    Ok(StateEvent::PackageStateChanged { mode, package_name }) => {
                        self.handle_package_event(mode, &package_name).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("app registry lagged behind {n} events, resyncing");
                        self.refresh().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    /// Poll until the guest reports a believable app list, then take it as
    /// the first snapshot.
    async fn wait_for_initial(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            match self.platform.apps_info().await {
                Ok(apps) => {
                    let current = AppSnapshot::new(apps);
                    if current.is_trusted() {
                        let outcome = reconcile(&self.snapshot, &current);
                        self.entries.apply(&outcome);
                        self.snapshot = current;
                        return true;
                    }
                    debug!("app list not trusted yet ({} entries)", current.len());
                }
                Err(e) => debug!("app list unavailable: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(WARMUP_INTERVAL) => {}
            }
        }
    }

    async fn refresh(&mut self) {
        match self.platform.apps_info().await {
            Ok(apps) => {
                let current = AppSnapshot::new(apps);
                if !current.is_trusted() {
                    warn!(
                        "ignoring implausible app list with {} entries",
                        current.len()
                    );
                    return;
                }
                let outcome = reconcile(&self.snapshot, &current);
                if !outcome.is_empty() {
                    info!(
                        "app list changed: {} added, {} removed, {} updated",
                        outcome.added.len(),
                        outcome.removed.len(),
                        outcome.updated.len()
                    );
                }
                self.entries.apply(&outcome);
                self.snapshot = current;
            }
            Err(e) => debug!("app list refresh failed: {e}"),
        }
    }

    /// Patch the snapshot with one package's new state and reconcile.
    async fn handle_package_event(&mut self, mode: u32, package_name: &str) {
        debug!("package state changed: {package_name} (mode {mode})");

        let mut apps = self.snapshot.apps().to_vec();
        apps.retain(|a| a.package_name != package_name);

        if mode != PACKAGE_REMOVED {
            match self.platform.app_info(package_name).await {
                Ok(Some(info)) => apps.push(info),
                Ok(None) => debug!("{package_name} reported changed but not installed"),
                Err(e) => {
                    // leave the snapshot alone; the next poll converges
                    error!("could not query {package_name}: {e}");
                    return;
                }
            }
        }

        let current = AppSnapshot::new(apps);
        self.entries.apply(&reconcile(&self.snapshot, &current));
        self.snapshot = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::test_app;
    use crate::container::platform::AppInfo;
    use crate::container::{ContainerError, ContainerResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FakePlatform {
        apps: Mutex<Vec<AppInfo>>,
    }

    impl FakePlatform {
        fn new(apps: Vec<AppInfo>) -> Arc<Self> {
            Arc::new(Self {
                apps: Mutex::new(apps),
            })
        }

        fn set(&self, apps: Vec<AppInfo>) {
            *self.apps.lock().unwrap() = apps;
        }
    }

    #[async_trait]
    impl PlatformApi for FakePlatform {
        async fn apps_info(&self) -> ContainerResult<Vec<AppInfo>> {
            Ok(self.apps.lock().unwrap().clone())
        }

        async fn app_info(&self, package_name: &str) -> ContainerResult<Option<AppInfo>> {
            Ok(self
                .apps
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.package_name == package_name)
                .cloned())
        }

        async fn install_app(&self, _guest_path: &str) -> ContainerResult<()> {
            Err(ContainerError::NotRunning)
        }

        async fn remove_app(&self, _package_name: &str) -> ContainerResult<()> {
            Ok(())
        }

        async fn launch_app(&self, _package_name: &str) -> ContainerResult<()> {
            Ok(())
        }
    }

    fn apps(packages: &[&str]) -> Vec<AppInfo> {
        packages.iter().map(|p| test_app(p, true)).collect()
    }

    #[tokio::test]
    async fn test_initial_snapshot_waits_for_trusted_list() {
        let dir = tempdir().unwrap();
        let platform = FakePlatform::new(apps(&["a.one", "b.two", "c.three"]));
        let entries = DesktopEntryStore::new(dir.path().join("apps"), dir.path().join("icons"));
        let mut registry = AppRegistry::new(platform, entries);

        let cancel = CancellationToken::new();
        assert!(registry.wait_for_initial(&cancel).await);
        assert_eq!(registry.snapshot.len(), 3);
        assert!(registry
            .entries
            .entry_path("a.one")
            .exists());
    }

    #[tokio::test]
    async fn test_initial_snapshot_respects_cancellation() {
        let dir = tempdir().unwrap();
        let platform = FakePlatform::new(apps(&["a.one"])); // below threshold
        let entries = DesktopEntryStore::new(dir.path().join("apps"), dir.path().join("icons"));
        let mut registry = AppRegistry::new(platform, entries);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!registry.wait_for_initial(&cancel).await);
        assert!(registry.snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_applies_diff() {
        let dir = tempdir().unwrap();
        let platform = FakePlatform::new(apps(&["a.one", "b.two", "c.three"]));
        let entries = DesktopEntryStore::new(dir.path().join("apps"), dir.path().join("icons"));
        let mut registry = AppRegistry::new(platform.clone(), entries);

        let cancel = CancellationToken::new();
        assert!(registry.wait_for_initial(&cancel).await);

        platform.set(apps(&["b.two", "c.three", "d.four"]));
        registry.refresh().await;

        assert!(!registry.entries.entry_path("a.one").exists());
        assert!(registry.entries.entry_path("d.four").exists());
        assert_eq!(registry.snapshot.len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_rewrites_renamed_app_entry() {
        let dir = tempdir().unwrap();
        let platform = FakePlatform::new(apps(&["a.one", "b.two", "c.three"]));
        let entries = DesktopEntryStore::new(dir.path().join("apps"), dir.path().join("icons"));
        let mut registry = AppRegistry::new(platform.clone(), entries);

        let cancel = CancellationToken::new();
        assert!(registry.wait_for_initial(&cancel).await);

        // same package set, one app renamed by an upgrade
        let mut renamed = apps(&["a.one", "b.two", "c.three"]);
        renamed[1].name = "Two Renamed".to_string();
        platform.set(renamed);
        registry.refresh().await;

        let contents =
            std::fs::read_to_string(registry.entries.entry_path("b.two")).unwrap();
        assert!(contents.contains("Name=Two Renamed"));
    }

    #[tokio::test]
    async fn test_refresh_rejects_untrusted_list() {
        let dir = tempdir().unwrap();
        let platform = FakePlatform::new(apps(&["a.one", "b.two", "c.three"]));
        let entries = DesktopEntryStore::new(dir.path().join("apps"), dir.path().join("icons"));
        let mut registry = AppRegistry::new(platform.clone(), entries);

        let cancel = CancellationToken::new();
        assert!(registry.wait_for_initial(&cancel).await);

        // a collapsed list must not wipe the registry
        platform.set(apps(&["a.one"]));
        registry.refresh().await;
        assert_eq!(registry.snapshot.len(), 3);
        assert!(registry.entries.entry_path("a.one").exists());
    }

    #[tokio::test]
    async fn test_package_event_add_and_remove() {
        let dir = tempdir().unwrap();
        let platform = FakePlatform::new(apps(&["a.one", "b.two", "c.three"]));
        let entries = DesktopEntryStore::new(dir.path().join("apps"), dir.path().join("icons"));
        let mut registry = AppRegistry::new(platform.clone(), entries);

        let cancel = CancellationToken::new();
        assert!(registry.wait_for_initial(&cancel).await);

        platform.set(apps(&["a.one", "b.two", "c.three", "d.four"]));
        registry.handle_package_event(PACKAGE_ADDED, "d.four").await;
        assert!(registry.entries.entry_path("d.four").exists());
        assert_eq!(registry.snapshot.len(), 4);

        registry
            .handle_package_event(PACKAGE_REMOVED, "d.four")
            .await;
        assert!(!registry.entries.entry_path("d.four").exists());
        assert_eq!(registry.snapshot.len(), 3);
    }
}
