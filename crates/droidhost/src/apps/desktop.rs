//! Desktop entry files for launcher apps.
//!
//! Entries live in the XDG applications directory and are named
//! `droidhost.<package>.desktop`. Create and delete are idempotent.

use log::{debug, error, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::container::platform::AppInfo;

use super::{ReconcileOutcome, HIDDEN_PACKAGES};

pub struct DesktopEntryStore {
    dir: PathBuf,
    icon_dir: PathBuf,
}

impl DesktopEntryStore {
    pub fn new(dir: impl Into<PathBuf>, icon_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            icon_dir: icon_dir.into(),
        }
    }

    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/usr/share"))
            .join("applications")
    }

    pub fn entry_path(&self, package_name: &str) -> PathBuf {
        self.dir.join(format!("droidhost.{package_name}.desktop"))
    }

    /// Launcher apps get an entry unless they are hidden system packages.
    pub fn should_materialize(app: &AppInfo) -> bool {
        app.is_launcher_app() && !HIDDEN_PACKAGES.contains(&app.package_name.as_str())
    }

    /// Write the entry for an app. Overwriting an existing entry keeps it
    /// current after updates; returns whether the file was newly created.
    pub fn write(&self, app: &AppInfo) -> io::Result<bool> {
        let path = self.entry_path(&app.package_name);
        let created = !path.exists();
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, self.render(app))?;
        Ok(created)
    }

    /// Delete the entry for a package; returns whether a file was removed.
    pub fn remove(&self, package_name: &str) -> io::Result<bool> {
        let path = self.entry_path(package_name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    /// Apply a reconcile outcome. Individual failures are logged and do
    /// not stop the rest of the batch.
    pub fn apply(&self, outcome: &ReconcileOutcome) {
        for app in &outcome.added {
            if !Self::should_materialize(app) {
                debug!("not materializing {}", app.package_name);
                continue;
            }
            match self.write(app) {
                Ok(true) => info!("created desktop entry for {}", app.package_name),
                Ok(false) => debug!("refreshed desktop entry for {}", app.package_name),
                Err(e) => error!("desktop entry for {} failed: {e}", app.package_name),
            }
        }
        for package_name in &outcome.removed {
            match self.remove(package_name) {
                Ok(true) => info!("removed desktop entry for {package_name}"),
                Ok(false) => {}
                Err(e) => error!("removing desktop entry for {package_name} failed: {e}"),
            }
        }
        for app in &outcome.updated {
            // an update can also drop the launcher category
            if !Self::should_materialize(app) {
                match self.remove(&app.package_name) {
                    Ok(true) => info!("removed desktop entry for {}", app.package_name),
                    Ok(false) => {}
                    Err(e) => {
                        error!("removing desktop entry for {} failed: {e}", app.package_name)
                    }
                }
                continue;
            }
            match self.write(app) {
                Ok(_) => debug!("refreshed desktop entry for {}", app.package_name),
                Err(e) => error!("desktop entry for {} failed: {e}", app.package_name),
            }
        }
    }

    fn render(&self, app: &AppInfo) -> String {
        let icon = self.icon_dir.join(format!("{}.png", app.package_name));
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name={name}\n\
             Exec=droidhost app launch {package}\n\
             Icon={icon}\n\
             Categories=X-Droidhost;Android;\n\
             X-Purism-FormFactor=Workstation;Mobile;\n\
             Actions=app_settings;\n\
             \n\
             [Desktop Action app_settings]\n\
             Name=App Settings\n\
             Exec=droidhost app intent android.settings.APPLICATION_DETAILS_SETTINGS package:{package}\n",
            name = app.name,
            package = app.package_name,
            icon = icon.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::test_app;
    use tempfile::tempdir;

    fn store(dir: &Path) -> DesktopEntryStore {
        DesktopEntryStore::new(dir.join("applications"), dir.join("icons"))
    }

    #[test]
    fn test_write_then_remove_lifecycle() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let app = test_app("org.example.calc", true);

        assert!(store.write(&app).unwrap());
        let path = store.entry_path("org.example.calc");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Exec=droidhost app launch org.example.calc"));
        assert!(contents.contains("Name=calc"));

        // second write refreshes in place
        assert!(!store.write(&app).unwrap());
        assert!(path.exists());

        assert!(store.remove("org.example.calc").unwrap());
        assert!(!path.exists());
        // removing again is a no-op
        assert!(!store.remove("org.example.calc").unwrap());
    }

    #[test]
    fn test_hidden_packages_never_materialize() {
        let app = test_app("com.android.settings", true);
        assert!(!DesktopEntryStore::should_materialize(&app));
    }

    #[test]
    fn test_non_launcher_apps_never_materialize() {
        let app = test_app("org.example.daemon", false);
        assert!(!DesktopEntryStore::should_materialize(&app));
    }

    #[test]
    fn test_apply_skips_hidden_and_removes() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let outcome = ReconcileOutcome {
            added: vec![
                test_app("org.example.app", true),
                test_app("com.google.android.gms", true),
            ],
            removed: vec!["org.gone.app".to_string()],
            updated: vec![],
        };
        store.apply(&outcome);

        assert!(store.entry_path("org.example.app").exists());
        assert!(!store.entry_path("com.google.android.gms").exists());
    }

    #[test]
    fn test_apply_rewrites_updated_entries() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let app = test_app("org.example.app", true);
        assert!(store.write(&app).unwrap());

        let mut renamed = app.clone();
        renamed.name = "Shiny New Name".to_string();
        store.apply(&ReconcileOutcome {
            added: vec![],
            removed: vec![],
            updated: vec![renamed],
        });

        let contents = fs::read_to_string(store.entry_path("org.example.app")).unwrap();
        assert!(contents.contains("Name=Shiny New Name"));
    }

    #[test]
    fn test_apply_removes_entry_when_update_drops_launcher() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let app = test_app("org.example.app", true);
        assert!(store.write(&app).unwrap());

        let demoted = test_app("org.example.app", false);
        store.apply(&ReconcileOutcome {
            added: vec![],
            removed: vec![],
            updated: vec![demoted],
        });
        assert!(!store.entry_path("org.example.app").exists());
    }
}
