//! Location subsystem.
//!
//! When the guest switches GNSS on, a detached tracker process is spawned
//! and its PID recorded; switching GNSS off SIGTERMs it. The tracker runs
//! as a hidden CLI subcommand so it survives a session daemon restart and
//! keeps feeding fixes until told to stop.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::container::{ContainerRuntime, DEFAULT_LXC_PATH};
use crate::events::{EventReceiver, StateEvent};

pub const TRACKER_PID_FILE: &str = "/tmp/droidhost-tracker.pid";

const DEFAULT_PROVIDER: &str = "/usr/libexec/droidhost-geoclue";

pub async fn run(mut events: EventReceiver, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                stop_tracker();
                return;
            }
            event = events.recv() => match event {
                Ok(StateEvent::GnssActive { active: true }) => {
                    if let Err(e) = start_tracker() {
                        warn!("could not start location tracker: {e:#}");
                    }
                }
                Ok(StateEvent::GnssActive { active: false }) => stop_tracker(),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("location subsystem lagged behind {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    stop_tracker();
                    return;
                }
            }
        }
    }
}

fn start_tracker() -> Result<()> {
    if Path::new(TRACKER_PID_FILE).exists() {
        debug!("location tracker already running");
        return Ok(());
    }

    let exe = std::env::current_exe().context("locating droidhost binary")?;
    let child = std::process::Command::new(exe)
        .arg("location-tracker")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawning location tracker")?;

    fs::write(TRACKER_PID_FILE, child.id().to_string())
        .context("writing tracker pid file")?;
    info!("location tracker started (pid {})", child.id());
    Ok(())
}

/// SIGTERM the recorded tracker and drop the PID file, both best-effort.
fn stop_tracker() {
    stop_tracker_at(Path::new(TRACKER_PID_FILE));
}

fn stop_tracker_at(pid_file: &Path) {
    let Ok(contents) = fs::read_to_string(pid_file) else {
        return;
    };
    if let Ok(pid) = contents.trim().parse::<i32>() {
        unsafe {
            libc::kill(pid, libc::SIGTERM);
            // reap so the tracker does not linger as a zombie; fails
            // fast when the pid is not our child
            let mut status = 0;
            libc::waitpid(pid, &mut status, 0);
        }
        info!("location tracker stopped (pid {pid})");
    }
    if let Err(e) = fs::remove_file(pid_file) {
        debug!("could not remove tracker pid file: {e}");
    }
}

/// Entry point of the hidden `location-tracker` subcommand: read fixes
/// from the provider command and push them into guest properties.
pub async fn tracker_main(config: &Config) -> Result<()> {
    let provider = config
        .location_provider
        .clone()
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
    let container = ContainerRuntime::new(config.container_name.clone(), DEFAULT_LXC_PATH);

    let mut parts = provider.split_whitespace();
    let binary = parts
        .next()
        .context("empty location provider command")?
        .to_string();
    let args: Vec<&str> = parts.collect();

    let mut child = tokio::process::Command::new(&binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawning location provider {binary}"))?;

    let stdout = child
        .stdout
        .take()
        .context("location provider has no stdout")?;
    let mut lines = BufReader::new(stdout).lines();

    info!("location tracker feeding fixes from {binary}");
    while let Ok(Some(line)) = lines.next_line().await {
        let Some((lat, lon, alt)) = parse_fix(&line) else {
            debug!("unparseable fix: {line:?}");
            continue;
        };
        for (key, value) in [
            ("droidhost.gnss.latitude", lat),
            ("droidhost.gnss.longitude", lon),
            ("droidhost.gnss.altitude", alt),
        ] {
            if let Err(e) = container.set_prop(key, &value.to_string()).await {
                warn!("could not push {key}: {e}");
            }
        }
    }

    info!("location provider ended");
    Ok(())
}

/// A fix line is `lat lon alt`, whitespace separated.
fn parse_fix(line: &str) -> Option<(f64, f64, f64)> {
    let mut parts = line.split_whitespace();
    let lat = parts.next()?.parse().ok()?;
    let lon = parts.next()?.parse().ok()?;
    let alt = parts.next()?.parse().ok()?;
    Some((lat, lon, alt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stop_tracker_reaps_child() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("tracker.pid");

        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id() as i32;
        fs::write(&pid_file, pid.to_string()).unwrap();

        stop_tracker_at(&pid_file);

        assert!(!pid_file.exists());
        // a zombie would still answer signal 0; a reaped child does not
        assert_eq!(unsafe { libc::kill(pid, 0) }, -1);
    }

    #[test]
    fn test_stop_tracker_without_pid_file_is_a_noop() {
        let dir = tempdir().unwrap();
        stop_tracker_at(&dir.path().join("missing.pid"));
    }

    #[test]
    fn test_parse_fix() {
        assert_eq!(
            parse_fix("52.52 13.405 34.0"),
            Some((52.52, 13.405, 34.0))
        );
        assert_eq!(parse_fix("  -33.86  151.20  5  "), Some((-33.86, 151.20, 5.0)));
        assert_eq!(parse_fix("52.52 13.405"), None);
        assert_eq!(parse_fix("not a fix"), None);
        assert_eq!(parse_fix(""), None);
    }
}
