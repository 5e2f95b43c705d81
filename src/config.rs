use crate::display::DisplaySetting;
use crate::hotkeys::{HotkeyAction, HotkeyBinding};
use crate::reminder::ReminderConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const APP_NAME: &str = "EyeProtector";
const SETTINGS_FILE: &str = "settings.json";

/// Application settings stored in JSON.
/// Keys missing from the file are filled from [`AppConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub display: DisplaySetting,
    pub reminder: ReminderConfig,
    pub launch_on_login: bool,
    /// Named display presets, applied from the tray menu or a hotkey
    pub profiles: BTreeMap<String, DisplaySetting>,
    #[serde(deserialize_with = "lenient_hotkeys")]
    pub hotkeys: Vec<HotkeyBinding>,
}

/// Keep every binding that parses; a bad entry is logged and skipped
/// instead of failing the whole settings file
fn lenient_hotkeys<'de, D>(deserializer: D) -> std::result::Result<Vec<HotkeyBinding>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<HotkeyBinding>(entry.clone()) {
            Ok(binding) => Some(binding),
            Err(e) => {
                warn!("Skipping hotkey {}: {}", entry, e);
                None
            }
        })
        .collect())
}

impl Default for AppConfig {
    fn default() -> Self {
        let profiles = [
            ("Default", DisplaySetting::new(6500, 80)),
            ("Night Mode", DisplaySetting::new(3500, 40)),
            ("Reading", DisplaySetting::new(4500, 60)),
        ]
        .into_iter()
        .map(|(name, setting)| (name.to_string(), setting))
        .collect();

        Self {
            display: DisplaySetting::default(),
            reminder: ReminderConfig::default(),
            launch_on_login: false,
            profiles,
            hotkeys: vec![
                HotkeyBinding::new("Ctrl+Alt+1", HotkeyAction::Profile("Night Mode".into())),
                HotkeyBinding::new("Ctrl+Alt+2", HotkeyAction::Profile("Reading".into())),
                HotkeyBinding::new("Ctrl+Alt+0", HotkeyAction::Profile("Default".into())),
                HotkeyBinding::new("Ctrl+Alt+R", HotkeyAction::ToggleReminder),
                HotkeyBinding::new("Ctrl+Alt+End", HotkeyAction::ResetDisplay),
                HotkeyBinding::new("Ctrl+Alt+PageUp", HotkeyAction::Cooler),
                HotkeyBinding::new("Ctrl+Alt+PageDown", HotkeyAction::Warmer),
            ],
        }
    }
}

impl AppConfig {
    pub fn profile(&self, name: &str) -> Option<DisplaySetting> {
        self.profiles.get(name).copied()
    }
}

/// Per-user data directory shared by settings, stats and the log file
pub fn data_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_NAME)
}

pub fn config_path() -> PathBuf {
    data_dir().join(SETTINGS_FILE)
}

pub fn load_config() -> AppConfig {
    load_from(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    save_to(&config_path(), config)
}

/// Load settings, never failing: a missing file is created with defaults,
/// an unreadable one is logged and replaced by defaults in memory.
pub fn load_from(path: &Path) -> AppConfig {
    if !path.exists() {
        info!("No settings at {:?}, writing defaults", path);
        let config = AppConfig::default();
        if let Err(e) = save_to(path, &config) {
            warn!("{:#}", e);
        }
        return config;
    }

    match read(path) {
        Ok(config) => {
            info!("Settings loaded from {:?}", path);
            config
        }
        Err(e) => {
            warn!("{:#}; using default settings", e);
            AppConfig::default()
        }
    }
}

fn read(path: &Path) -> Result<AppConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {:?}", path))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse settings in {:?}", path))
}

pub fn save_to(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
    }
    let data = serde_json::to_string_pretty(config).context("Failed to serialize settings")?;
    fs::write(path, data).with_context(|| format!("Failed to write settings to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let config = load_from(&path);
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let mut config = AppConfig::default();
        config.display = DisplaySetting::new(4200, 55);
        config.reminder.enabled = true;
        config.reminder.interval_seconds = 900;
        config.launch_on_login = true;
        save_to(&path, &config).unwrap();

        assert_eq!(load_from(&path), config);
    }

    #[test]
    fn partial_file_is_filled_from_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"{ "display": { "temperature": 3000 }, "reminder": { "enabled": true } }"#,
        )
        .unwrap();

        let config = load_from(&path);
        assert_eq!(config.display.temperature, 3000);
        assert_eq!(config.display.brightness, DisplaySetting::default().brightness);
        assert!(config.reminder.enabled);
        assert_eq!(config.reminder.interval_seconds, crate::reminder::DEFAULT_INTERVAL_SECS);
        assert_eq!(config.profile("Night Mode"), Some(DisplaySetting::new(3500, 40)));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_from(&path), AppConfig::default());
    }

    #[test]
    fn bad_hotkey_entry_keeps_other_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"{
                "display": { "temperature": 3000, "brightness": 50 },
                "profiles": { "Gaming": { "temperature": 5500, "brightness": 90 } },
                "hotkeys": [
                    { "keys": "Ctrl+Alt+9", "action": "toggle_remindr" },
                    { "keys": "Ctrl+Alt+8", "action": "toggle_reminder" },
                    42
                ]
            }"#,
        )
        .unwrap();

        let config = load_from(&path);
        assert_eq!(config.display, DisplaySetting::new(3000, 50));
        assert_eq!(config.profile("Gaming"), Some(DisplaySetting::new(5500, 90)));
        assert_eq!(
            config.hotkeys,
            vec![HotkeyBinding::new("Ctrl+Alt+8", HotkeyAction::ToggleReminder)]
        );
    }

    #[test]
    fn hotkey_actions_serialize_readably() {
        let json = serde_json::to_value(&AppConfig::default().hotkeys).unwrap();
        assert_eq!(json[0]["keys"], "Ctrl+Alt+1");
        assert_eq!(json[0]["action"]["profile"], "Night Mode");
        assert_eq!(json[3]["action"], "toggle_reminder");
    }
}
