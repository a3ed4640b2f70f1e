use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Output of the tracing subscriber; missing fields take their defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub file_logging_enabled: bool,
    pub console_logging_enabled: bool,
    pub log_dir: String,
    pub file_name_prefix: String,
    pub show_file_line: bool,
    pub show_thread_ids: bool,
    pub show_target: bool,
    pub ansi_colors: bool,
    /// Log file rollover: daily, hourly, minutely or never
    pub rotation: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging_enabled: true,
            console_logging_enabled: true,
            log_dir: "logs".to_string(),
            file_name_prefix: "timer_profile".to_string(),
            show_file_line: true,
            show_thread_ids: false,
            show_target: true,
            ansi_colors: true,
            rotation: "daily".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Connection behaviour
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_true")]
    pub subscribe_on_ready: bool,
    #[serde(default = "default_true")]
    pub read_offset_on_ready: bool,

    // Headless demo server
    #[serde(default = "default_simulated_offset_minutes_ago")]
    pub simulated_offset_minutes_ago: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            auto_connect: default_true(),
            subscribe_on_ready: default_true(),
            read_offset_on_ready: default_true(),
            simulated_offset_minutes_ago: default_simulated_offset_minutes_ago(),
        }
    }
}

fn default_simulated_offset_minutes_ago() -> u32 {
    90
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Settings backed by `path`, falling back to defaults when it is missing or unreadable
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let settings_path = path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings, {} not loaded: {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("TimerProfile");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("timer_profile_{}_{}", name, std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{ "auto_connect": false }"#).unwrap();
        assert!(!settings.auto_connect);
        assert!(settings.subscribe_on_ready);
        assert!(settings.read_offset_on_ready);
        assert_eq!(settings.simulated_offset_minutes_ago, 90);
        assert_eq!(settings.log_settings.file_name_prefix, "timer_profile");
    }

    #[test]
    fn test_partial_log_settings() {
        let settings: Settings =
            serde_json::from_str(r#"{ "log_settings": { "rotation": "hourly" } }"#).unwrap();
        assert_eq!(settings.log_settings.rotation, "hourly");
        assert_eq!(settings.log_settings.level, "info");
        assert!(settings.log_settings.file_logging_enabled);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let service = SettingsService::load_from(scratch_path("missing"));
        assert_eq!(service.get(), &Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_path("save");
        let mut service = SettingsService::load_from(&path);
        service.get_mut().read_offset_on_ready = false;
        service.get_mut().log_settings.level = "debug".to_string();
        service.save().unwrap();

        let reloaded = SettingsService::load_from(&path);
        assert!(!reloaded.get().read_offset_on_ready);
        assert_eq!(reloaded.get().log_settings.level, "debug");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
