use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

pub const DURATION_RANGE: std::ops::RangeInclusive<u32> = 1..=240;
pub const WARNING_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Numeric parameters the engine reads on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Minutes used when a session is started without an explicit duration.
    pub default_duration: u32,
    /// Minutes before the end at which the one-time warning fires.
    pub warning_minutes: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_duration: 25,
            warning_minutes: 2,
        }
    }
}

impl TimerConfig {
    pub fn validate(&self) -> Result<()> {
        if !DURATION_RANGE.contains(&self.default_duration) {
            bail!(
                "default duration must be between {} and {} minutes, got {}",
                DURATION_RANGE.start(),
                DURATION_RANGE.end(),
                self.default_duration
            );
        }
        if !WARNING_RANGE.contains(&self.warning_minutes) {
            bail!(
                "warning minutes must be between {} and {}, got {}",
                WARNING_RANGE.start(),
                WARNING_RANGE.end(),
                self.warning_minutes
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    timer: TimerConfig,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            let parsed: UserSettings = serde_json::from_str(&contents).unwrap_or_default();
            match parsed.timer.validate() {
                Ok(()) => parsed,
                Err(err) => {
                    log::warn!(
                        "Ignoring invalid timer settings in {}: {err}",
                        path.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn timer_config(&self) -> TimerConfig {
        let guard = match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.timer.clone()
    }

    pub fn update_timer_config(&self, config: TimerConfig) -> Result<()> {
        config.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.timer = config;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        data.timer.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.timer_config(), TimerConfig::default());
    }

    #[test]
    fn update_persists_and_reload_reads_it_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let config = TimerConfig {
            default_duration: 50,
            warning_minutes: 5,
        };
        store.update_timer_config(config.clone()).unwrap();
        assert!(path.exists());

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.timer_config(), config);
        reopened.reload().unwrap();
        assert_eq!(reopened.timer_config(), config);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let too_long = TimerConfig {
            default_duration: 241,
            warning_minutes: 2,
        };
        assert!(store.update_timer_config(too_long).is_err());

        let no_warning = TimerConfig {
            default_duration: 25,
            warning_minutes: 0,
        };
        assert!(store.update_timer_config(no_warning).is_err());
        assert_eq!(store.timer_config(), TimerConfig::default());
    }

    #[test]
    fn partial_and_invalid_files_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        fs::write(&path, r#"{ "timer": { "warning_minutes": 4 } }"#).unwrap();
        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.timer_config().default_duration, 25);
        assert_eq!(store.timer_config().warning_minutes, 4);

        fs::write(&path, r#"{ "timer": { "default_duration": 0 } }"#).unwrap();
        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.timer_config(), TimerConfig::default());
    }
}
