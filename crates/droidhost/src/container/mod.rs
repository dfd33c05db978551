//! LXC container control.
//!
//! Thin adapter over the `lxc-*` command line tools. The container holds
//! the Android system image; everything the host needs from the guest goes
//! through `lxc-attach`.

pub mod platform;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

pub use platform::{AppInfo, PlatformApi, CATEGORY_LAUNCHER};

pub const DEFAULT_LXC_PATH: &str = "/var/lib/droidhost/lxc";

const RUNNING_PROBES: u32 = 10;
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("{command} failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("container did not reach RUNNING within {0} probes")]
    Unresponsive(u32),

    #[error("container is not running")]
    NotRunning,

    #[error("unexpected container output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Stopped,
    Running,
    Frozen,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerState::Stopped => "STOPPED",
            ContainerState::Running => "RUNNING",
            ContainerState::Frozen => "FROZEN",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ContainerState {
    type Err = ContainerError;

    fn from_str(s: &str) -> ContainerResult<Self> {
        match s.trim() {
            "RUNNING" => Ok(ContainerState::Running),
            "FROZEN" | "FREEZING" => Ok(ContainerState::Frozen),
            "STOPPED" | "" => Ok(ContainerState::Stopped),
            other => Err(ContainerError::Parse(format!(
                "unknown container state {other:?}"
            ))),
        }
    }
}

/// Handle on one named LXC container.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    name: String,
    lxc_path: PathBuf,
}

impl ContainerRuntime {
    pub fn new(name: impl Into<String>, lxc_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            lxc_path: lxc_path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lxc_path(&self) -> &Path {
        &self.lxc_path
    }

    async fn lxc(&self, tool: &str, args: &[&str]) -> ContainerResult<String> {
        let output = Command::new(tool)
            .arg("-P")
            .arg(&self.lxc_path)
            .arg("-n")
            .arg(&self.name)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: tool.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Current container state. A container that `lxc-info` cannot find
    /// counts as stopped.
    pub async fn status(&self) -> ContainerResult<ContainerState> {
        match self.lxc("lxc-info", &["-sH"]).await {
            Ok(state) => state.parse(),
            Err(ContainerError::CommandFailed { .. }) => Ok(ContainerState::Stopped),
            Err(e) => Err(e),
        }
    }

    pub async fn start(&self) -> ContainerResult<()> {
        self.lxc("lxc-start", &["-d"]).await?;
        Ok(())
    }

    pub async fn stop(&self) -> ContainerResult<()> {
        self.lxc("lxc-stop", &["-k"]).await?;
        Ok(())
    }

    pub async fn freeze(&self) -> ContainerResult<()> {
        self.lxc("lxc-freeze", &[]).await?;
        Ok(())
    }

    pub async fn unfreeze(&self) -> ContainerResult<()> {
        self.lxc("lxc-unfreeze", &[]).await?;
        Ok(())
    }

    /// Run a command inside the guest and capture its stdout.
    pub async fn attach(&self, cmd: &[&str]) -> ContainerResult<String> {
        let mut args = vec!["--clear-env", "--"];
        args.extend_from_slice(cmd);
        self.lxc("lxc-attach", &args).await
    }

    /// Run a long-lived command inside the guest with piped stdout.
    /// The child is killed when the handle drops.
    pub fn attach_streamed(&self, cmd: &[&str]) -> ContainerResult<tokio::process::Child> {
        let mut command = Command::new("lxc-attach");
        command
            .arg("-P")
            .arg(&self.lxc_path)
            .arg("-n")
            .arg(&self.name)
            .arg("--clear-env")
            .arg("--")
            .args(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        Ok(command.spawn()?)
    }

    /// Poll until the container reports RUNNING. Ten probes, one second
    /// apart; a container that never comes up is fatal to session start.
    pub async fn wait_for_running(&self) -> ContainerResult<()> {
        for probe in 0..RUNNING_PROBES {
            if self.status().await? == ContainerState::Running {
                return Ok(());
            }
            log::debug!("container not running yet (probe {})", probe + 1);
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
        Err(ContainerError::Unresponsive(RUNNING_PROBES))
    }

    /// Fire an intent inside the guest, e.g. to open an app's settings.
    pub async fn launch_intent(&self, action: &str, uri: &str) -> ContainerResult<()> {
        self.attach(&["droidplat", "intent", action, uri]).await?;
        Ok(())
    }

    pub async fn get_prop(&self, key: &str) -> ContainerResult<String> {
        self.attach(&["getprop", key]).await
    }

    pub async fn set_prop(&self, key: &str, value: &str) -> ContainerResult<()> {
        self.attach(&["setprop", key, value]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!("RUNNING".parse::<ContainerState>().unwrap(), ContainerState::Running);
        assert_eq!("FROZEN".parse::<ContainerState>().unwrap(), ContainerState::Frozen);
        assert_eq!("STOPPED".parse::<ContainerState>().unwrap(), ContainerState::Stopped);
        // lxc-info prints nothing for a container it has never seen
        assert_eq!("".parse::<ContainerState>().unwrap(), ContainerState::Stopped);
        assert!("BANANAS".parse::<ContainerState>().is_err());
    }

    #[test]
    fn test_state_display_round_trips() {
        for state in [
            ContainerState::Stopped,
            ContainerState::Running,
            ContainerState::Frozen,
        ] {
            let parsed: ContainerState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn test_runtime_accessors() {
        let runtime = ContainerRuntime::new("phone", "/var/lib/droidhost/lxc");
        assert_eq!(runtime.name(), "phone");
        assert_eq!(runtime.lxc_path(), Path::new("/var/lib/droidhost/lxc"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_container_is_stopped() {
        // lxc-info is either absent or errors out for a bogus name; both
        // must map to Stopped rather than a hard failure.
        let runtime = ContainerRuntime::new("does-not-exist", "/nonexistent");
        match runtime.status().await {
            Ok(state) => assert_eq!(state, ContainerState::Stopped),
            Err(ContainerError::Io(_)) => {} // lxc tools not installed
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
