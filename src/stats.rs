// Daily usage summary: time the app ran and reminders shown, per calendar day

use crate::config;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const STATS_FILE: &str = "stats.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub usage_seconds: u64,
    pub reminders: u32,
}

/// Keyed by ISO date (`YYYY-MM-DD`), which also sorts chronologically
pub type UsageLog = BTreeMap<String, DailyUsage>;

pub fn stats_path() -> PathBuf {
    config::data_dir().join(STATS_FILE)
}

pub fn load(path: &Path) -> Result<UsageLog> {
    if !path.exists() {
        return Ok(UsageLog::new());
    }
    let data =
        fs::read_to_string(path).with_context(|| format!("Failed to read stats from {:?}", path))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse stats in {:?}", path))
}

/// Add a session to the entry for `date`, creating it if needed
pub fn record(path: &Path, date: NaiveDate, usage_seconds: u64, reminders: u32) -> Result<DailyUsage> {
    let mut log = load(path)?;
    let key = date.format("%Y-%m-%d").to_string();
    let entry = log.entry(key).or_default();
    entry.usage_seconds += usage_seconds;
    entry.reminders += reminders;
    let updated = *entry;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create stats directory {:?}", parent))?;
    }
    let data = serde_json::to_string_pretty(&log).context("Failed to serialize stats")?;
    fs::write(path, data).with_context(|| format!("Failed to write stats to {:?}", path))?;

    info!(
        "Usage for {}: {}s, {} reminders",
        date, updated.usage_seconds, updated.reminders
    );
    Ok(updated)
}

pub fn format_usage(seconds: u64) -> String {
    format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn sessions_on_same_day_accumulate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATS_FILE);

        record(&path, day(4), 3600, 3).unwrap();
        let total = record(&path, day(4), 1800, 2).unwrap();
        assert_eq!(
            total,
            DailyUsage {
                usage_seconds: 5400,
                reminders: 5
            }
        );
    }

    #[test]
    fn days_are_kept_apart_and_sorted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATS_FILE);

        record(&path, day(12), 60, 0).unwrap();
        record(&path, day(3), 120, 1).unwrap();

        let log = load(&path).unwrap();
        let keys: Vec<&str> = log.keys().map(String::as_str).collect();
        assert_eq!(keys, ["2024-03-03", "2024-03-12"]);
        assert_eq!(log["2024-03-03"].reminders, 1);
    }

    #[test]
    fn missing_file_is_empty_log() {
        let dir = TempDir::new().unwrap();
        assert!(load(&dir.path().join(STATS_FILE)).unwrap().is_empty());
    }

    #[test]
    fn formats_hours_and_minutes() {
        assert_eq!(format_usage(5400), "1h 30m");
        assert_eq!(format_usage(59), "0h 00m");
    }
}
