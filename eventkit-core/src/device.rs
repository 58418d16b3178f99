//! Host device metadata used by record enrichment.

use std::env;

use serde::{Deserialize, Serialize};

/// Description of the device the host application runs on.
///
/// [`collect`](DeviceInfo::collect) is a best-effort probe; embedders on
/// other platforms fill the fields themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Hardware board (CPU architecture on desktop hosts)
    pub board: String,
    /// Vendor or OS family
    pub brand: String,
    /// Device codename (hostname on desktop hosts)
    pub device: String,
    /// Display build id
    pub display: String,
    /// Device model
    pub model: String,
    /// Operating system version
    pub os_version: String,
    /// Operating system type constant
    pub os_type: String,
}

impl DeviceInfo {
    /// Collects information about the current device.
    #[must_use]
    pub fn collect() -> Self {
        let os_version = get_os_version();
        Self {
            board: env::consts::ARCH.to_string(),
            brand: env::consts::FAMILY.to_string(),
            device: get_hostname(),
            display: format!("{} {}", env::consts::OS, os_version),
            model: env::consts::OS.to_string(),
            os_version,
            os_type: env::consts::OS.to_string(),
        }
    }
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gets the OS version string.
fn get_os_version() -> String {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("VERSION_ID="))
                    .map(|l| {
                        l.trim_start_matches("VERSION_ID=")
                            .trim_matches('"')
                            .to_string()
                    })
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_fills_every_field() {
        let info = DeviceInfo::collect();
        assert_eq!(info.board, env::consts::ARCH);
        assert_eq!(info.os_type, env::consts::OS);
        assert!(!info.device.is_empty());
        assert!(!info.os_version.is_empty());
        assert!(info.display.starts_with(env::consts::OS));
    }
}
