//! Session lifecycle.
//!
//! A session is one user's running container plus its supervised
//! subsystems. `SessionInfo` captures everything derived from the user's
//! environment at start time.

pub mod orchestrator;
pub mod subsystem;

pub use orchestrator::SessionManager;
pub use subsystem::{Subsystem, SubsystemSet};

use std::path::PathBuf;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::props;

pub const DEFAULT_WAYLAND_DISPLAY: &str = "wayland-0";

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub runtime_dir: PathBuf,
    pub wayland_display: String,
    /// Pulse/PipeWire runtime dir shared with the guest for audio.
    pub pulse_runtime_dir: PathBuf,
    /// Per-user data dir, bind-mounted as /data inside the guest.
    pub data_dir: PathBuf,
    pub lcd_density: String,
    /// `"W,H"`; `"0,0"` lets the guest pick its own mode.
    pub display_size: String,
}

impl SessionInfo {
    /// Derive the session parameters from the calling user's environment.
    /// The probes are non-fatal; a missing runtime dir is.
    pub fn from_env(config: &Config) -> Result<Self> {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .map_err(|_| Error::Precondition {
                resource: "XDG_RUNTIME_DIR".to_string(),
            })?;
        let wayland_display = std::env::var("WAYLAND_DISPLAY")
            .unwrap_or_else(|_| DEFAULT_WAYLAND_DISPLAY.to_string());
        let pulse_runtime_dir = std::env::var("PULSE_RUNTIME_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| runtime_dir.join("pulse"));
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| runtime_dir.clone())
            .join("droidhost");

        let lcd_density = props::lcd_density(&config.properties);
        let (width, height) = props::display_size(config.display_probe.as_deref());

        Ok(Self {
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            runtime_dir,
            wayland_display,
            pulse_runtime_dir,
            data_dir,
            lcd_density,
            display_size: format!("{width},{height}"),
        })
    }

    pub fn compositor_socket(&self) -> PathBuf {
        self.runtime_dir.join(&self.wayland_display)
    }

    /// Validate the host environment before anything is started. The
    /// data dir is created on demand; the compositor socket and runtime
    /// dir must already exist.
    pub fn check_preconditions(&self) -> Result<()> {
        if !self.runtime_dir.is_dir() {
            return Err(Error::Precondition {
                resource: self.runtime_dir.display().to_string(),
            });
        }
        let socket = self.compositor_socket();
        if !socket.exists() {
            return Err(Error::Precondition {
                resource: socket.display().to_string(),
            });
        }
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn info(runtime_dir: &std::path::Path, data_dir: &std::path::Path) -> SessionInfo {
        SessionInfo {
            user: "tester".to_string(),
            uid: 1000,
            gid: 1000,
            runtime_dir: runtime_dir.to_path_buf(),
            wayland_display: "wayland-0".to_string(),
            pulse_runtime_dir: runtime_dir.join("pulse"),
            data_dir: data_dir.to_path_buf(),
            lcd_density: "0".to_string(),
            display_size: "0,0".to_string(),
        }
    }

    #[test]
    fn test_preconditions_require_compositor_socket() {
        let dir = tempdir().unwrap();
        let info = info(dir.path(), &dir.path().join("data"));

        let err = info.check_preconditions().unwrap_err();
        match err {
            Error::Precondition { resource } => assert!(resource.ends_with("wayland-0")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_preconditions_create_data_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("wayland-0"), b"").unwrap();
        let data_dir = dir.path().join("data");
        let info = info(dir.path(), &data_dir);

        info.check_preconditions().unwrap();
        assert!(data_dir.is_dir());
        // a second run is a no-op
        info.check_preconditions().unwrap();
    }

    #[test]
    fn test_preconditions_require_runtime_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone");
        let info = info(&missing, &dir.path().join("data"));
        assert!(matches!(
            info.check_preconditions(),
            Err(Error::Precondition { .. })
        ));
    }
}
