use crate::error::{Result, TrackerError};
use crate::storage::atomic_write;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DATA_DIR_NAME: &str = ".medtrack";
pub const DATA_PATH_ENV: &str = "MEDTRACK_PATH";
pub const CONFIG_FILE_NAME: &str = "_config.yaml";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REMINDER_WINDOW_MINUTES: i64 = 10;
pub const DEFAULT_MISSED_GRACE_MINUTES: i64 = 10;

/// Filter used when `RUST_LOG` is not set
pub fn default_log_filter() -> &'static str {
    "medtrack=warn"
}

/// How reminders reach the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Log line and console output
    #[default]
    Log,
    /// `notify-send` desktop popups
    Desktop,
}

impl NotifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Desktop => "desktop",
        }
    }
}

/// Settings stored in `_config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds between reminder sweeps
    pub poll_interval_secs: u64,
    /// Length of the acknowledgment window after a reminder
    pub reminder_window_minutes: i64,
    /// Extra time after the window before a dose counts as missed
    pub missed_grace_minutes: i64,
    /// Record a missed dose for days the scheduler never saw
    pub backfill_missed: bool,
    /// Prune history older than this many days; unset keeps everything
    pub history_retention_days: Option<u32>,
    pub notifier: NotifierKind,
    pub log_filter: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            reminder_window_minutes: DEFAULT_REMINDER_WINDOW_MINUTES,
            missed_grace_minutes: DEFAULT_MISSED_GRACE_MINUTES,
            backfill_missed: true,
            history_retention_days: None,
            notifier: NotifierKind::Log,
            log_filter: default_log_filter().to_string(),
        }
    }
}

pub const CONFIG_KEYS: &[&str] = &[
    "poll_interval_secs",
    "reminder_window_minutes",
    "missed_grace_minutes",
    "backfill_missed",
    "history_retention_days",
    "notifier",
    "log_filter",
];

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TrackerError::Config(format!("invalid value for {}: '{}'", key, value)))
}

impl TrackerConfig {
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "poll_interval_secs" => self.poll_interval_secs.to_string(),
            "reminder_window_minutes" => self.reminder_window_minutes.to_string(),
            "missed_grace_minutes" => self.missed_grace_minutes.to_string(),
            "backfill_missed" => self.backfill_missed.to_string(),
            "history_retention_days" => match self.history_retention_days {
                Some(days) => days.to_string(),
                None => "(keep all)".to_string(),
            },
            "notifier" => self.notifier.as_str().to_string(),
            "log_filter" => self.log_filter.clone(),
            _ => return None,
        };
        Some(value)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "poll_interval_secs" => {
                let secs: u64 = parse_value(key, value)?;
                if secs == 0 {
                    return Err(TrackerError::Config("poll_interval_secs must be positive".into()));
                }
                self.poll_interval_secs = secs;
            }
            "reminder_window_minutes" => self.reminder_window_minutes = parse_minutes(key, value)?,
            "missed_grace_minutes" => self.missed_grace_minutes = parse_minutes(key, value)?,
            "backfill_missed" => self.backfill_missed = parse_value(key, value)?,
            "history_retention_days" => {
                self.history_retention_days = match value.trim() {
                    "" | "none" | "off" => None,
                    v => Some(parse_value(key, v)?),
                }
            }
            "notifier" => {
                self.notifier = match value.trim() {
                    "log" => NotifierKind::Log,
                    "desktop" => NotifierKind::Desktop,
                    _ => {
                        return Err(TrackerError::Config(format!(
                            "notifier must be log or desktop, got '{}'",
                            value
                        )))
                    }
                }
            }
            "log_filter" => self.log_filter = value.trim().to_string(),
            _ => return Err(TrackerError::Config(format!("unknown key: {}", key))),
        }
        Ok(())
    }
}

fn parse_minutes(key: &str, value: &str) -> Result<i64> {
    let minutes: i64 = parse_value(key, value)?;
    if minutes < 0 {
        return Err(TrackerError::Config(format!("{} must not be negative", key)));
    }
    Ok(minutes)
}

/// Configuration manager for a data directory
pub struct ConfigFile {
    config_file: PathBuf,
    config: TrackerConfig,
}

impl ConfigFile {
    pub fn new(data_path: PathBuf) -> Self {
        let mut instance = Self {
            config_file: data_path.join(CONFIG_FILE_NAME),
            config: TrackerConfig::default(),
        };
        instance.load();
        instance
    }

    fn load(&mut self) {
        if self.config_file.exists() {
            match fs::read_to_string(&self.config_file) {
                Ok(content) => match serde_yaml::from_str::<TrackerConfig>(&content) {
                    Ok(config) => self.config = config,
                    Err(e) => {
                        tracing::warn!(path = %self.config_file.display(), error = %e, "Ignoring unreadable config")
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %self.config_file.display(), error = %e, "Failed to read config")
                }
            }
        }
    }

    fn save(&self) -> Result<()> {
        let content = serde_yaml::to_string(&self.config)
            .map_err(|e| TrackerError::Config(format!("failed to serialize config: {}", e)))?;
        atomic_write(&self.config_file, &content).map_err(|source| TrackerError::Io {
            path: self.config_file.clone(),
            source,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.config.set(key, value)?;
        self.save()
    }
}

/// Find the data directory: search upward from the current directory for
/// `.medtrack`, then try `MEDTRACK_PATH`, then the per-user data directory
pub fn find_data_path() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let data = current.join(DATA_DIR_NAME);
        if data.is_dir() {
            return Some(data);
        }

        if !current.pop() {
            break;
        }
    }

    if let Ok(path) = std::env::var(DATA_PATH_ENV) {
        let data = PathBuf::from(path);
        if data.is_dir() {
            return Some(data);
        }
    }

    let fallback = default_data_path();
    fallback.is_dir().then_some(fallback)
}

/// Per-user fallback when no project directory exists
pub fn default_data_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medtrack")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reminder_timing() {
        let config = TrackerConfig::default();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.reminder_window_minutes + config.missed_grace_minutes, 20);
        assert!(config.history_retention_days.is_none());
    }

    #[test]
    fn test_set_validates() {
        let mut config = TrackerConfig::default();
        config.set("poll_interval_secs", "5").unwrap();
        assert_eq!(config.get("poll_interval_secs").unwrap(), "5");

        assert!(config.set("poll_interval_secs", "0").is_err());
        assert!(config.set("missed_grace_minutes", "-3").is_err());
        assert!(config.set("notifier", "pager").is_err());
        assert!(config.set("colour", "blue").is_err());

        config.set("history_retention_days", "90").unwrap();
        assert_eq!(config.history_retention_days, Some(90));
        config.set("history_retention_days", "none").unwrap();
        assert_eq!(config.history_retention_days, None);
    }

    #[test]
    fn test_every_key_is_readable() {
        let config = TrackerConfig::default();
        for key in CONFIG_KEYS {
            assert!(config.get(key).is_some(), "missing getter for {}", key);
        }
    }

    #[test]
    fn test_config_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = ConfigFile::new(dir.path().to_path_buf());
        file.set("notifier", "desktop").unwrap();
        file.set("backfill_missed", "false").unwrap();

        let reloaded = ConfigFile::new(dir.path().to_path_buf());
        assert_eq!(reloaded.config().notifier, NotifierKind::Desktop);
        assert!(!reloaded.config().backfill_missed);
        assert_eq!(reloaded.config().poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_config_save_replaces_file_whole() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("fresh");
        let mut file = ConfigFile::new(data.clone());
        file.set("missed_grace_minutes", "15").unwrap();

        let names: Vec<_> = fs::read_dir(&data)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![CONFIG_FILE_NAME.to_string()]);
        assert_eq!(ConfigFile::new(data).config().missed_grace_minutes, 15);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "poll_interval_secs: 10\n").unwrap();
        let file = ConfigFile::new(dir.path().to_path_buf());
        assert_eq!(file.config().poll_interval_secs, 10);
        assert_eq!(file.config().reminder_window_minutes, DEFAULT_REMINDER_WINDOW_MINUTES);
    }
}
