use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;

use crate::price::PriceValidator;
use crate::similarity::MatchThresholds;

/// Matching and validation tunables, loaded from an optional YAML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub high_similarity: f64,
    pub mid_similarity: f64,
    pub price_tolerance: f64,
    pub promotion_threshold: u32,
    pub max_drop_ratio: f64,
    pub max_rise_ratio: f64,
    pub min_price: f64,
    pub rise_guard_floor: f64,
    pub id_prefix: String,
    pub platform: String,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            high_similarity: 0.75,
            mid_similarity: 0.5,
            price_tolerance: 1.0,
            promotion_threshold: 3,
            max_drop_ratio: 0.5,
            max_rise_ratio: 5.0,
            min_price: 1.0,
            rise_guard_floor: 10.0,
            id_prefix: "DT".to_string(),
            platform: "DT".to_string(),
        }
    }
}

impl CleaningConfig {
    /// Missing file means defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.mid_similarity)
            || !(0.0..=1.0).contains(&self.high_similarity)
            || self.mid_similarity > self.high_similarity
        {
            bail!(
                "similarity thresholds must satisfy 0 <= mid <= high <= 1 (mid {}, high {})",
                self.mid_similarity,
                self.high_similarity
            );
        }
        if self.promotion_threshold == 0 {
            bail!("promotion_threshold must be at least 1");
        }
        if self.id_prefix.is_empty() {
            bail!("id_prefix cannot be empty");
        }
        Ok(())
    }

    pub fn thresholds(&self) -> MatchThresholds {
        MatchThresholds {
            high: self.high_similarity,
            mid: self.mid_similarity,
            price_tolerance: self.price_tolerance,
        }
    }

    pub fn validator(&self) -> PriceValidator {
        PriceValidator {
            max_drop_ratio: self.max_drop_ratio,
            max_rise_ratio: self.max_rise_ratio,
            min_price: self.min_price,
            rise_guard_floor: self.rise_guard_floor,
        }
    }
}

/// Daily window in local time; start inclusive, end exclusive.
/// A window whose end is before its start wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn whole_day() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start == self.end {
            return true;
        }
        if self.start < self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

impl FromStr for TimeWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .with_context(|| format!("time window {s:?} must look like HH:MM-HH:MM"))?;
        let parse = |part: &str| {
            NaiveTime::parse_from_str(part.trim(), "%H:%M")
                .with_context(|| format!("invalid time {part:?} in window {s:?}"))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub scheduler_enabled: bool,
    pub promote_cron: String,
    pub trends_cron: String,
    pub price_check_cron: String,
    pub job_timeout: Duration,
    pub window: TimeWindow,
    pub bark_url: String,
    pub http_timeout_secs: u64,
    pub web_port: u16,
    pub tuning_path: PathBuf,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let window = match std::env::var("FLASHFOOD_WINDOW") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse::<TimeWindow>().context("FLASHFOOD_WINDOW")?,
            _ => TimeWindow::whole_day(),
        };
        Ok(Self {
            database_url: env_or("DATABASE_URL", "sqlite://./data/flashfood.db?mode=rwc"),
            scheduler_enabled: std::env::var("FLASHFOOD_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            promote_cron: env_or("PROMOTE_CRON", "0 */5 * * * *"),
            trends_cron: env_or("TRENDS_CRON", "0 30 23 * * *"),
            price_check_cron: env_or("PRICE_CHECK_CRON", "0 */10 * * * *"),
            job_timeout: Duration::from_secs(env_parsed("FLASHFOOD_JOB_TIMEOUT_SECS", 300)),
            window,
            bark_url: env_or("BARK_URL", "https://api.day.app"),
            http_timeout_secs: env_parsed("FLASHFOOD_HTTP_TIMEOUT_SECS", 10),
            web_port: env_parsed("FLASHFOOD_WEB_PORT", 8080),
            tuning_path: PathBuf::from(env_or("FLASHFOOD_TUNING", "./cleaning.yaml")),
        })
    }

    pub fn cleaning(&self) -> Result<CleaningConfig> {
        CleaningConfig::load(&self.tuning_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config = CleaningConfig::from_yaml("promotion_threshold: 5\nid_prefix: MT\n").unwrap();
        assert_eq!(config.promotion_threshold, 5);
        assert_eq!(config.id_prefix, "MT");
        assert_eq!(config.high_similarity, 0.75);
        assert_eq!(config.validator(), PriceValidator::default());
        assert_eq!(CleaningConfig::from_yaml("").unwrap(), CleaningConfig::default());
    }

    #[test]
    fn malformed_or_inconsistent_yaml_is_rejected() {
        assert!(CleaningConfig::from_yaml("promotion_threshold: [1, 2]").is_err());
        assert!(CleaningConfig::from_yaml("mid_similarity: 0.9\nhigh_similarity: 0.8").is_err());
        assert!(CleaningConfig::from_yaml("promotion_threshold: 0").is_err());
    }

    #[test]
    fn missing_tuning_file_means_defaults() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("nope.yaml");
        assert_eq!(CleaningConfig::load(&missing).unwrap(), CleaningConfig::default());

        let present = dir.path().join("cleaning.yaml");
        std::fs::write(&present, "max_drop_ratio: 0.3\n").unwrap();
        assert_eq!(CleaningConfig::load(&present).unwrap().max_drop_ratio, 0.3);

        std::fs::write(&present, "max_drop_ratio: [").unwrap();
        assert!(CleaningConfig::load(&present).is_err());
    }

    #[test]
    fn time_window_start_inclusive_end_exclusive() {
        let window: TimeWindow = "08:00-22:00".parse().unwrap();
        assert!(window.contains(hm(8, 0)));
        assert!(window.contains(hm(21, 59)));
        assert!(!window.contains(hm(22, 0)));
        assert!(!window.contains(hm(7, 59)));

        let overnight: TimeWindow = "22:00-06:00".parse().unwrap();
        assert!(overnight.contains(hm(23, 0)));
        assert!(overnight.contains(hm(5, 59)));
        assert!(!overnight.contains(hm(6, 0)));

        assert!(TimeWindow::whole_day().contains(hm(3, 14)));
        assert!("8-22".parse::<TimeWindow>().is_err());
        assert!("08:00".parse::<TimeWindow>().is_err());
    }
}
