//! Host-side property probing.
//!
//! Session start derives two guest hints from the host: the LCD density
//! and the active display size. Both degrade gracefully; a failed probe
//! never blocks the session.

use log::debug;
use std::collections::HashMap;
use std::path::Path;

/// Look up a host property: config overrides first, then the host
/// `getprop` binary if one exists.
pub fn host_get(overrides: &HashMap<String, String>, key: &str) -> Option<String> {
    if let Some(value) = overrides.get(key) {
        return Some(value.clone());
    }

    let output = std::process::Command::new("getprop").arg(key).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}

/// Derive the guest LCD density. `"0"` leaves the choice to the guest.
pub fn lcd_density(overrides: &HashMap<String, String>) -> String {
    density_from(
        host_get(overrides, "ro.sf.lcd_density"),
        std::env::var("GRID_UNIT_PX").ok().as_deref(),
    )
}

fn density_from(host_prop: Option<String>, grid_unit_px: Option<&str>) -> String {
    if let Some(density) = host_prop {
        return density;
    }
    if let Some(grid) = grid_unit_px {
        if let Ok(px) = grid.trim().parse::<u32>() {
            return (px * 20).to_string();
        }
    }
    "0".to_string()
}

/// Query the configured probe binary for the active output size.
/// Any failure degrades to `("0", "0")`; the guest picks its own mode.
pub fn display_size(probe: Option<&Path>) -> (String, String) {
    let Some(probe) = probe else {
        return ("0".to_string(), "0".to_string());
    };

    match std::process::Command::new(probe).output() {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_display_size(stdout.trim())
                .unwrap_or_else(|| ("0".to_string(), "0".to_string()))
        }
        Ok(output) => {
            debug!("display probe exited with {}", output.status);
            ("0".to_string(), "0".to_string())
        }
        Err(e) => {
            debug!("display probe {} failed: {e}", probe.display());
            ("0".to_string(), "0".to_string())
        }
    }
}

fn parse_display_size(output: &str) -> Option<(String, String)> {
    let (width, height) = output.split_once('x')?;
    let width = width.trim();
    let height = height.trim();
    if width.parse::<u32>().is_ok() && height.parse::<u32>().is_ok() {
        Some((width.to_string(), height.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_prefers_host_prop() {
        assert_eq!(density_from(Some("320".to_string()), Some("8")), "320");
    }

    #[test]
    fn test_density_derives_from_grid_unit() {
        assert_eq!(density_from(None, Some("8")), "160");
    }

    #[test]
    fn test_density_defaults_to_zero() {
        assert_eq!(density_from(None, None), "0");
        assert_eq!(density_from(None, Some("not a number")), "0");
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = HashMap::new();
        overrides.insert("ro.sf.lcd_density".to_string(), "213".to_string());
        assert_eq!(
            host_get(&overrides, "ro.sf.lcd_density").as_deref(),
            Some("213")
        );
    }

    #[test]
    fn test_parse_display_size() {
        assert_eq!(
            parse_display_size("1920x1080"),
            Some(("1920".to_string(), "1080".to_string()))
        );
        assert_eq!(parse_display_size("garbage"), None);
        assert_eq!(parse_display_size("1920x"), None);
    }

    #[test]
    fn test_missing_probe_degrades() {
        assert_eq!(
            display_size(Some(Path::new("/nonexistent/probe"))),
            ("0".to_string(), "0".to_string())
        );
        assert_eq!(display_size(None), ("0".to_string(), "0".to_string()));
    }
}
