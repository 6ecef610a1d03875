//! Terminal settings

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serline_transport::PortSettings;

/// Settings remembered between runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Last port opened and its line settings
    #[serde(default)]
    pub port: PortSettings,
    /// Frame terminator, with escapes (e.g. `\n`, `\r\n`, `}`)
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Print raw chunks instead of frames
    #[serde(default)]
    pub raw: bool,
}

fn default_terminator() -> String {
    "\\n".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            terminator: default_terminator(),
            raw: false,
        }
    }
}

impl Settings {
    /// Get the XDG config directory for serline
    /// Uses $XDG_CONFIG_HOME/serline on Linux/macOS, falls back to ~/.config/serline
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("serline"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("serline"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<(), String> {
        let path =
            Self::settings_path().ok_or_else(|| "Could not determine settings path".to_string())?;
        self.save_to(&path)
    }

    fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("serline-settings-{}-{}", std::process::id(), name))
            .join("settings.json")
    }

    #[test]
    fn test_save_and_load() {
        let path = scratch("roundtrip");
        let settings = Settings {
            port: PortSettings::for_address("/dev/ttyACM1")
                .with_baud_rate(115_200)
                .with_read_timeout(None)
                .with_write_timeout(Some(Duration::from_millis(250))),
            terminator: "}".into(),
            raw: true,
        };

        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"port": {"address": "COM3"}}"#).unwrap();

        assert_eq!(settings.port.address.as_deref(), Some("COM3"));
        assert_eq!(settings.port.baud_rate, 921_600);
        assert_eq!(settings.terminator, "\\n");
        assert!(!settings.raw);
    }

    #[test]
    fn test_unreadable_file_gives_defaults() {
        let path = scratch("garbage");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        assert_eq!(Settings::load_from(&path), Settings::default());
        assert_eq!(Settings::load_from(Path::new("/nonexistent/serline.json")), Settings::default());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
