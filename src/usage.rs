//! Daily stock-footage budget.
//!
//! The first `pixabay_daily_limit` videos of a day download a fresh clip;
//! later ones reuse a saved `stock_*.mp4`. A saved clip also stands in when a
//! search finds nothing. Counters live in the `daily_usage` document and reset
//! when the local date changes.

use crate::error::StorageResult;
use crate::pipeline::FootageSource;
use crate::store::{self, DocumentStore};
use crate::{logi, logw};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const USAGE_KEY: &str = "daily_usage";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub pixabay_count: u32,
    pub videos_generated: u32,
    pub last_reset: DateTime<Utc>,
}

impl DailyUsage {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            pixabay_count: 0,
            videos_generated: 0,
            last_reset: Utc::now(),
        }
    }
}

pub struct UsageTracker {
    store: Arc<dyn DocumentStore>,
    daily_limit: u32,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn DocumentStore>, daily_limit: u32) -> Self {
        Self { store, daily_limit }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    pub async fn today(&self) -> StorageResult<DailyUsage> {
        self.today_at(Local::now().date_naive()).await
    }

    /// Counters for `today`. A stored document from another day, or one that
    /// cannot be read, is replaced by zeroed counters.
    pub async fn today_at(&self, today: NaiveDate) -> StorageResult<DailyUsage> {
        let stored = match store::load::<DailyUsage>(self.store.as_ref(), USAGE_KEY).await {
            Ok(stored) => stored,
            Err(err) if err.is_malformed() => {
                warn!(error = %err, "Usage file is malformed; starting a new day");
                None
            }
            Err(err) => return Err(err),
        };

        match stored {
            Some(usage) if usage.date == today => Ok(usage),
            previous => {
                if previous.is_some() {
                    logi("New day, resetting usage counters");
                }
                let usage = DailyUsage::fresh(today);
                store::save(self.store.as_ref(), USAGE_KEY, &usage).await?;
                Ok(usage)
            }
        }
    }

    pub fn allows_download(&self, usage: &DailyUsage) -> bool {
        usage.pixabay_count < self.daily_limit
    }

    /// A video built from a freshly downloaded clip.
    pub async fn record_download_at(&self, today: NaiveDate) -> StorageResult<DailyUsage> {
        let mut usage = self.today_at(today).await?;
        usage.pixabay_count += 1;
        usage.videos_generated += 1;
        store::save(self.store.as_ref(), USAGE_KEY, &usage).await?;
        info!(used = usage.pixabay_count, limit = self.daily_limit, "Recorded Pixabay download");
        Ok(usage)
    }

    /// A video built from a reused clip.
    pub async fn record_reuse_at(&self, today: NaiveDate) -> StorageResult<DailyUsage> {
        let mut usage = self.today_at(today).await?;
        usage.videos_generated += 1;
        store::save(self.store.as_ref(), USAGE_KEY, &usage).await?;
        info!(videos = usage.videos_generated, "Recorded reused clip");
        Ok(usage)
    }
}

/// Saved `stock_*.mp4` clips directly inside `dir`, sorted by name.
pub fn saved_clips(dir: &Path) -> Vec<PathBuf> {
    let mut clips: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with("stock_") && name.ends_with(".mp4")
        })
        .map(|e| e.into_path())
        .collect();
    clips.sort();
    clips
}

fn pick_saved_clip(dir: &Path) -> Option<PathBuf> {
    saved_clips(dir).choose(&mut rand::thread_rng()).cloned()
}

/// Wraps a download source with the daily budget and the reuse fallback.
pub struct BudgetedFootage {
    inner: Arc<dyn FootageSource>,
    tracker: UsageTracker,
}

impl BudgetedFootage {
    pub fn new(inner: Arc<dyn FootageSource>, tracker: UsageTracker) -> Self {
        Self { inner, tracker }
    }

    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    async fn fetch_on(&self, keywords: &[String], dest_dir: &Path, today: NaiveDate) -> Result<PathBuf> {
        let usage = self.tracker.today_at(today).await?;
        info!(
            used = usage.pixabay_count,
            limit = self.tracker.daily_limit(),
            "Pixabay usage today"
        );

        if !self.tracker.allows_download(&usage) {
            if let Some(clip) = pick_saved_clip(dest_dir) {
                logi(format!("Daily Pixabay limit reached, reusing {}", clip.display()));
                self.tracker.record_reuse_at(today).await?;
                return Ok(clip);
            }
            logw("Daily Pixabay limit reached but no saved clips; downloading anyway");
        }

        match self.inner.fetch(keywords, dest_dir).await {
            Ok(path) => {
                self.tracker.record_download_at(today).await?;
                Ok(path)
            }
            Err(err) => {
                let Some(clip) = pick_saved_clip(dest_dir) else {
                    return Err(err);
                };
                logw(format!("Stock search failed ({:#}); reusing {}", err, clip.display()));
                self.tracker.record_reuse_at(today).await?;
                Ok(clip)
            }
        }
    }
}

#[async_trait]
impl FootageSource for BudgetedFootage {
    async fn fetch(&self, keywords: &[String], dest_dir: &Path) -> Result<PathBuf> {
        self.fetch_on(keywords, dest_dir, Local::now().date_naive()).await
    }
}
