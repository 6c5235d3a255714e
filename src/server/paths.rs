//! Where Signal Desktop keeps its data on each operating system

use std::path::PathBuf;

use serde::Serialize;

/// Response of `GET /api/default-signal-path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultSignalPath {
    /// Display form of the directory, with the variable left unexpanded
    pub path: Option<String>,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

/// Platform name in the form users know it
pub fn os_name(os: &str) -> String {
    match os {
        "linux" => "Linux".to_string(),
        "macos" => "Darwin".to_string(),
        "windows" => "Windows".to_string(),
        other => other.to_string(),
    }
}

/// Display path and real location of the Signal directory for `os`
pub fn signal_dir_for(os: &str) -> Option<(&'static str, PathBuf)> {
    let home = dirs::home_dir().unwrap_or_default();
    match os {
        "linux" => Some(("$HOME/.config/Signal", home.join(".config").join("Signal"))),
        "macos" => Some((
            "$HOME/Library/Application Support/Signal",
            home.join("Library").join("Application Support").join("Signal"),
        )),
        "windows" => {
            let appdata = std::env::var_os("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join("AppData").join("Roaming"));
            Some(("%APPDATA%\\Signal", appdata.join("Signal")))
        }
        _ => None,
    }
}

pub fn default_signal_path_for(os: &str) -> DefaultSignalPath {
    match signal_dir_for(os) {
        Some((display, dir)) => DefaultSignalPath {
            path: Some(display.to_string()),
            os: os_name(os),
            exists: Some(dir.is_dir()),
        },
        None => DefaultSignalPath {
            path: None,
            os: os_name(os),
            exists: None,
        },
    }
}

pub fn default_signal_path() -> DefaultSignalPath {
    default_signal_path_for(std::env::consts::OS)
}
