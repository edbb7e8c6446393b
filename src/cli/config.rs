use crate::config::{find_data_path, ConfigFile, CONFIG_KEYS};
use crate::error::{Result, TrackerError};

/// Run the config command
pub fn run_config(key: Option<&str>, value: Option<&str>) -> Result<()> {
    let data_path = find_data_path().ok_or_else(|| {
        TrackerError::Config("No .medtrack directory found. Run 'medtrack init' first.".into())
    })?;
    let mut config = ConfigFile::new(data_path);

    match (key, value) {
        (None, None) => {
            println!("Current configuration:\n");
            for k in CONFIG_KEYS {
                let v = config.get(k).unwrap_or_else(|| "(not set)".to_string());
                println!("  {}: {}", k, v);
            }
        }
        (Some(k), None) => match config.get(k) {
            Some(v) => println!("{}: {}", k, v),
            None if CONFIG_KEYS.contains(&k) => println!("{}: (not set)", k),
            None => return Err(TrackerError::Config(format!("Unknown config key: {}", k))),
        },
        (Some(k), Some(v)) => {
            config.set(k, v)?;
            println!("Set {} = {}", k, v);
            if k == "poll_interval_secs" || k == "notifier" {
                println!("\nNote: restart 'medtrack watch' for this to take effect.");
            }
        }
        (None, Some(_)) => {
            return Err(TrackerError::Config("Key required when setting a value".into()));
        }
    }

    Ok(())
}
