use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::logw;

/// Upper bound for `retry.base_delay_minutes` (one day).
pub const MAX_BASE_DELAY_MINUTES: i64 = 24 * 60;
/// Upper bound for `retry.retention_days`.
pub const MAX_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default = "default_schedule_hours")]
    pub schedule_hours: Vec<u8>,
    #[serde(default = "default_daily_video_count")]
    pub daily_video_count: u32,

    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(rename = "elevenlabs_api_key", default)]
    pub elevenlabs_key: String,
    #[serde(default = "default_voice_id")]
    pub eleven_voice_id: String,
    #[serde(default = "default_model_id")]
    pub eleven_model_id: String,
    #[serde(rename = "openai_api_key", default)]
    pub openai_key: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(rename = "pixabay_api_key", default)]
    pub pixabay_key: String,
    /// Fresh Pixabay downloads per day; later videos reuse saved clips.
    #[serde(default = "default_pixabay_daily_limit")]
    pub pixabay_daily_limit: u32,
    #[serde(default)]
    pub youtube_access_token: String,
    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,

    #[serde(default)]
    pub desktop_notifications: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_target_inventory")]
    pub target_inventory: u32,
    #[serde(default = "default_minimum_threshold")]
    pub minimum_threshold: u32,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: u32,
    #[serde(default = "default_refill_batch")]
    pub refill_batch: u32,
    #[serde(default = "default_critical_refill_batch")]
    pub critical_refill_batch: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_minutes")]
    pub base_delay_minutes: i64,
    #[serde(default = "default_upload_max_attempts")]
    pub upload_max_attempts: u32,
    #[serde(default = "default_missed_max_attempts")]
    pub missed_max_attempts: u32,
    #[serde(default = "default_pause_between_secs")]
    pub pause_between_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_schedule_hours() -> Vec<u8> {
    vec![6, 18]
}

fn default_daily_video_count() -> u32 {
    2
}

fn default_voice_id() -> String {
    "JBFqnCBsd6RMkjVDRZzb".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_openai_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_pixabay_daily_limit() -> u32 {
    2
}

fn default_privacy_status() -> String {
    "public".to_string()
}

fn default_target_inventory() -> u32 {
    100
}

fn default_minimum_threshold() -> u32 {
    20
}

fn default_critical_threshold() -> u32 {
    10
}

fn default_refill_batch() -> u32 {
    30
}

fn default_critical_refill_batch() -> u32 {
    50
}

fn default_base_delay_minutes() -> i64 {
    30
}

fn default_upload_max_attempts() -> u32 {
    5
}

fn default_missed_max_attempts() -> u32 {
    3
}

fn default_pause_between_secs() -> u64 {
    2
}

fn default_retention_days() -> i64 {
    7
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            target_inventory: default_target_inventory(),
            minimum_threshold: default_minimum_threshold(),
            critical_threshold: default_critical_threshold(),
            refill_batch: default_refill_batch(),
            critical_refill_batch: default_critical_refill_batch(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_minutes: default_base_delay_minutes(),
            upload_max_attempts: default_upload_max_attempts(),
            missed_max_attempts: default_missed_max_attempts(),
            pause_between_secs: default_pause_between_secs(),
            retention_days: default_retention_days(),
        }
    }
}

impl RetryConfig {
    pub fn pause_between(&self) -> Duration {
        Duration::from_secs(self.pause_between_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            logs_dir: default_logs_dir(),
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
            schedule_hours: default_schedule_hours(),
            daily_video_count: default_daily_video_count(),
            inventory: InventoryConfig::default(),
            retry: RetryConfig::default(),
            elevenlabs_key: String::new(),
            eleven_voice_id: default_voice_id(),
            eleven_model_id: default_model_id(),
            openai_key: String::new(),
            openai_model: default_openai_model(),
            pixabay_key: String::new(),
            pixabay_daily_limit: default_pixabay_daily_limit(),
            youtube_access_token: String::new(),
            privacy_status: default_privacy_status(),
            desktop_notifications: false,
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if fs::metadata(path).await.is_err() {
            logw(format!("{} not found; using default configuration", path.display()));
            let mut config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sorts and dedups the schedule, checks the thresholds are ordered and
    /// keeps the retry timings in a range chrono can represent.
    pub fn validate(&mut self) -> Result<()> {
        if let Some(bad) = self.schedule_hours.iter().find(|h| **h > 23) {
            anyhow::bail!("config.json: schedule_hours contains invalid hour {}", bad);
        }
        self.schedule_hours.sort_unstable();
        self.schedule_hours.dedup();

        if self.inventory.critical_threshold > self.inventory.minimum_threshold {
            anyhow::bail!("config.json: critical_threshold must not exceed minimum_threshold");
        }
        if self.retry.upload_max_attempts == 0 || self.retry.missed_max_attempts == 0 {
            anyhow::bail!("config.json: max attempts must be greater than zero");
        }
        if !(1..=MAX_BASE_DELAY_MINUTES).contains(&self.retry.base_delay_minutes) {
            anyhow::bail!(
                "config.json: retry.base_delay_minutes must be between 1 and {}",
                MAX_BASE_DELAY_MINUTES
            );
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retry.retention_days) {
            anyhow::bail!(
                "config.json: retry.retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            );
        }
        Ok(())
    }

    pub fn require_elevenlabs(&self) -> Result<()> {
        if self.elevenlabs_key.is_empty() {
            anyhow::bail!("config.json: elevenlabs_api_key missing");
        }
        Ok(())
    }

    pub fn require_pixabay(&self) -> Result<()> {
        if self.pixabay_key.is_empty() {
            anyhow::bail!("config.json: pixabay_api_key missing");
        }
        Ok(())
    }

    pub fn require_openai(&self) -> Result<()> {
        if self.openai_key.is_empty() {
            anyhow::bail!("config.json: openai_api_key missing");
        }
        Ok(())
    }
}
