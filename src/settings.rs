// src/settings.rs
//
// Settings file: where to log and which slcan interfaces to use.
// TOML by default; a `.json` extension switches to JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::SlcanConfig;

const APP_DIR: &str = "slcan-link";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    /// Directory for log files (None = log to stderr only, "" = `default_log_dir()`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<SlcanConfig>,
}

impl Settings {
    /// Find an interface by display name or port
    pub fn interface(&self, name: &str) -> Option<&SlcanConfig> {
        self.interfaces
            .iter()
            .find(|i| i.display_name.as_deref() == Some(name))
            .or_else(|| self.interfaces.iter().find(|i| i.port == name))
    }

    /// Where file logs go: `flag` when given, else `log_dir` from the file.
    /// An empty `log_dir` selects `default_log_dir()`.
    pub fn log_dir_for(&self, flag: Option<&Path>) -> Option<PathBuf> {
        if let Some(dir) = flag {
            return Some(dir.to_path_buf());
        }
        match self.log_dir.as_deref() {
            Some("") => Some(default_log_dir()),
            Some(dir) => Some(PathBuf::from(dir)),
            None => None,
        }
    }

    fn validate(&self) -> Result<(), String> {
        for iface in &self.interfaces {
            iface.validate().map_err(String::from)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum SettingsFormat {
    Toml,
    Json,
}

impl SettingsFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SettingsFormat::Json,
            _ => SettingsFormat::Toml,
        }
    }
}

/// `<config dir>/slcan-link/settings.toml`
pub fn default_settings_path() -> Result<PathBuf, String> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| "Failed to get config dir".to_string())?;
    Ok(config_dir.join(APP_DIR).join(SETTINGS_FILE))
}

/// Default log directory, `<local data dir>/slcan-link/logs`
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("logs")
}

/// Load settings from `path`. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<Settings, String> {
    if !path.exists() {
        tlog!("[settings] {} not found, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings: {}", e))?;

    let settings: Settings = match SettingsFormat::for_path(path) {
        SettingsFormat::Toml => toml::from_str(&content)
            .map_err(|e| format!("Failed to parse settings: {}", e))?,
        SettingsFormat::Json => serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse settings: {}", e))?,
    };

    settings.validate()?;
    tlog!(
        "[settings] Loaded {} interface(s) from {}",
        settings.interfaces.len(),
        path.display()
    );
    Ok(settings)
}

/// Write settings to `path`, creating its directory if needed.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), String> {
    settings.validate()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings dir: {}", e))?;
        }
    }

    let content = match SettingsFormat::for_path(path) {
        SettingsFormat::Toml => toml::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?,
        SettingsFormat::Json => serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?,
    };

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("slcan-link-settings-{}", std::process::id()))
            .join(name)
    }

    fn sample() -> Settings {
        Settings {
            log_dir: Some("/tmp/slcan-logs".to_string()),
            interfaces: vec![
                SlcanConfig {
                    display_name: Some("chassis".to_string()),
                    bitrate: 250_000,
                    ..SlcanConfig::for_port("/dev/ttyACM0")
                },
                SlcanConfig {
                    interface_index: 1,
                    ..SlcanConfig::for_port("/dev/ttyACM1")
                },
            ],
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let path = temp_path("roundtrip.toml");
        save_settings(&path, &sample()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[[interfaces]]"));
        assert_eq!(load_settings(&path).unwrap(), sample());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_json_roundtrip() {
        let path = temp_path("roundtrip.json");
        save_settings(&path, &sample()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.trim_start().starts_with('{'));
        assert_eq!(load_settings(&path).unwrap(), sample());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = load_settings(&temp_path("does-not-exist.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_handwritten_toml_uses_defaults() {
        let path = temp_path("handwritten.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[[interfaces]]\nport = \"COM3\"\nbitrate = 125000\n\n[[interfaces]]\nport = \"COM4\"\ndisplay_name = \"body\"\n",
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.log_dir, None);
        assert_eq!(settings.interfaces.len(), 2);
        assert_eq!(settings.interfaces[0].bitrate, 125_000);
        assert_eq!(settings.interfaces[0].baud_rate, 1_000_000);
        assert_eq!(settings.interface("body").map(|i| i.port.as_str()), Some("COM4"));
        assert_eq!(settings.interface("COM3").map(|i| i.bitrate), Some(125_000));
        assert!(settings.interface("COM9").is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_interface_is_rejected() {
        let path = temp_path("invalid.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[interfaces]]\nport = \"\"\n").unwrap();
        let err = load_settings(&path).unwrap_err();
        assert!(err.contains("port name is empty"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_log_dir_resolution() {
        let mut settings = Settings::default();
        assert_eq!(settings.log_dir_for(None), None);
        assert_eq!(
            settings.log_dir_for(Some(Path::new("/var/log/can"))),
            Some(PathBuf::from("/var/log/can"))
        );

        settings.log_dir = Some("/tmp/slcan-logs".to_string());
        assert_eq!(settings.log_dir_for(None), Some(PathBuf::from("/tmp/slcan-logs")));
        assert_eq!(
            settings.log_dir_for(Some(Path::new("/var/log/can"))),
            Some(PathBuf::from("/var/log/can"))
        );

        settings.log_dir = Some(String::new());
        assert_eq!(settings.log_dir_for(None), Some(default_log_dir()));
    }

    #[test]
    fn test_log_dir_read_from_file() {
        let path = temp_path("logdir.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "log_dir = \"/tmp/slcan-file-logs\"\n").unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(
            settings.log_dir_for(None),
            Some(PathBuf::from("/tmp/slcan-file-logs"))
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_default_settings_path() {
        if let Ok(path) = default_settings_path() {
            assert!(path.ends_with("slcan-link/settings.toml"));
        }
    }
}
