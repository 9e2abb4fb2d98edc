//! Video production: script -> narration -> footage -> render -> upload.
//!
//! Every external step sits behind a trait so the orchestration (fallback
//! script, failed-upload enqueueing, recovery ordering) is testable with fakes.
//! [`Pipeline::run`] performs the recovery pass before any new work, then an
//! optional inventory refill, then the requested number of videos.

use crate::config::{Config, InventoryConfig};
use crate::error::StorageResult;
use crate::inventory::{self, ScriptGenerator, ScriptInventory, ScriptRecord};
use crate::metadata::VideoMetadata;
use crate::recovery::{RecoveryReport, RecoverySystem};
use crate::retry::{RetryExecutor, RetryKind, RetryOutcome, RetryQueueItem};
use crate::speech;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[async_trait]
pub trait NarrationEngine: Send + Sync {
    async fn narrate(&self, text: &str, out_mp3: &Path) -> Result<()>;
}

#[async_trait]
pub trait FootageSource: Send + Sync {
    /// Downloads one clip matching `keywords` into `dest_dir` and returns its path.
    async fn fetch(&self, keywords: &[String], dest_dir: &Path) -> Result<PathBuf>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, footage: &Path, narration: &Path, out_mp4: &Path) -> Result<()>;
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Returns the remote video id.
    async fn upload(&self, video: &Path, meta: &VideoMetadata) -> Result<String>;
}

/// Payload stored in the retry queue for a failed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub video_path: PathBuf,
    pub metadata: VideoMetadata,
    pub script_id: u64,
}

pub struct Steps {
    pub narrator: Arc<dyn NarrationEngine>,
    pub footage: Arc<dyn FootageSource>,
    pub renderer: Arc<dyn Renderer>,
    /// `None` disables uploading (`--skip-upload`).
    pub uploader: Option<Arc<dyn UploadTransport>>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub video_count: u32,
    pub skip_recovery: bool,
    /// Stop after script selection and metadata; no narration, render or upload.
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum VideoOutcome {
    Uploaded { video_id: String, video_path: PathBuf },
    Rendered { video_path: PathBuf },
    UploadFailed { job: UploadJob, error: String },
    Previewed { narration: String, metadata: VideoMetadata },
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub recovery: Option<RecoveryReport>,
    pub uploaded: u32,
    pub rendered: u32,
    pub upload_failures: u32,
    pub failed: u32,
}

/// Produces single videos. Shared between the main run and the retry executor,
/// so the inventory sits behind an async mutex.
pub struct Producer {
    inventory: Mutex<ScriptInventory>,
    steps: Steps,
    temp_dir: PathBuf,
    output_dir: PathBuf,
    privacy_status: String,
}

impl Producer {
    pub fn new(inventory: ScriptInventory, steps: Steps, cfg: &Config) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            steps,
            temp_dir: cfg.temp_dir.clone(),
            output_dir: cfg.output_dir.clone(),
            privacy_status: cfg.privacy_status.clone(),
        }
    }

    pub fn inventory(&self) -> &Mutex<ScriptInventory> {
        &self.inventory
    }

    /// Next unused script, or the built-in fallback when the pool is empty.
    async fn take_script(&self) -> StorageResult<ScriptRecord> {
        let mut inventory = self.inventory.lock().await;
        match inventory.next_script().await? {
            Some(script) => Ok(script),
            None => {
                logw("Script inventory exhausted, using fallback script");
                Ok(inventory::fallback_script())
            }
        }
    }

    pub async fn produce_one(&self, dry_run: bool) -> Result<VideoOutcome> {
        let script = self.take_script().await?;
        info!(script_id = script.id, verse = %script.verse, source = %script.source, "Producing video");

        let narration = speech::clean_script_for_speech(&script.text)?;
        let metadata = VideoMetadata::for_script(&script, &self.privacy_status);
        if dry_run {
            return Ok(VideoOutcome::Previewed { narration, metadata });
        }

        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let voice_path = self.temp_dir.join(format!("voice_{}.mp3", stamp));
        let video_path = self.output_dir.join(format!("short_{}_{}.mp4", script.id, stamp));

        self.steps
            .narrator
            .narrate(&narration, &voice_path)
            .await
            .context("Narration failed")?;
        let footage = self
            .steps
            .footage
            .fetch(&script.keywords, &self.temp_dir)
            .await
            .context("Footage fetch failed")?;
        self.steps
            .renderer
            .render(&footage, &voice_path, &video_path)
            .await
            .context("Render failed")?;
        logok(format!("Rendered {}", video_path.display()));

        let Some(uploader) = &self.steps.uploader else {
            return Ok(VideoOutcome::Rendered { video_path });
        };
        match uploader.upload(&video_path, &metadata).await {
            Ok(video_id) => Ok(VideoOutcome::Uploaded { video_id, video_path }),
            Err(err) => Ok(VideoOutcome::UploadFailed {
                job: UploadJob {
                    video_path,
                    metadata,
                    script_id: script.id,
                },
                error: format!("{:#}", err),
            }),
        }
    }

    async fn retry_upload(&self, item: &RetryQueueItem) -> RetryOutcome {
        let Some(uploader) = &self.steps.uploader else {
            return RetryOutcome::Failed("uploads are disabled".to_string());
        };
        let job: UploadJob = match serde_json::from_value(item.payload.clone()) {
            Ok(job) => job,
            Err(err) => return RetryOutcome::Failed(format!("unreadable upload job: {}", err)),
        };
        if !job.video_path.exists() {
            return RetryOutcome::Failed(format!("video file missing: {}", job.video_path.display()));
        }
        match uploader.upload(&job.video_path, &job.metadata).await {
            Ok(video_id) => RetryOutcome::Succeeded {
                remote_id: Some(video_id),
            },
            Err(err) => RetryOutcome::Failed(format!("{:#}", err)),
        }
    }

    /// Catch-up for a missed slot: one fresh video, never re-enqueued.
    async fn catch_up(&self) -> RetryOutcome {
        match self.produce_one(false).await {
            Ok(VideoOutcome::Uploaded { video_id, .. }) => RetryOutcome::Succeeded {
                remote_id: Some(video_id),
            },
            Ok(VideoOutcome::Rendered { .. } | VideoOutcome::Previewed { .. }) => {
                RetryOutcome::Succeeded { remote_id: None }
            }
            Ok(VideoOutcome::UploadFailed { error, .. }) => RetryOutcome::Failed(error),
            Err(err) => RetryOutcome::Failed(format!("{:#}", err)),
        }
    }
}

/// Runs queue items through the same steps as a fresh video.
pub struct PipelineExecutor<'a> {
    producer: &'a Producer,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(producer: &'a Producer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl RetryExecutor for PipelineExecutor<'_> {
    async fn execute(&self, item: &RetryQueueItem) -> RetryOutcome {
        info!(id = %item.id, kind = ?item.kind, attempt = item.attempts + 1, "Retrying queue item");
        match item.kind {
            RetryKind::Upload => self.producer.retry_upload(item).await,
            RetryKind::MissedSlot => self.producer.catch_up().await,
        }
    }
}

pub struct Pipeline {
    producer: Producer,
    recovery: RecoverySystem,
    generator: Option<Arc<dyn ScriptGenerator>>,
    inventory_cfg: InventoryConfig,
}

impl Pipeline {
    pub fn new(
        producer: Producer,
        recovery: RecoverySystem,
        generator: Option<Arc<dyn ScriptGenerator>>,
        cfg: &Config,
    ) -> Self {
        Self {
            producer,
            recovery,
            generator,
            inventory_cfg: cfg.inventory.clone(),
        }
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn recovery(&self) -> &RecoverySystem {
        &self.recovery
    }

    /// Recovery pass only: detect missed slots, drain the queue, clean up.
    pub async fn recover(&mut self) -> Result<RecoveryReport> {
        let executor = PipelineExecutor::new(&self.producer);
        let report = self
            .recovery
            .run(&executor)
            .await
            .context("Upload recovery failed")?;
        logi(format!(
            "Recovery: {} processed, {} succeeded, {} permanently failed, {} cleaned",
            report.drain.processed,
            report.drain.succeeded,
            report.drain.permanently_failed,
            report.cleaned
        ));
        Ok(report)
    }

    pub async fn run(&mut self, opts: &RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if opts.skip_recovery || opts.dry_run {
            logi("Skipping upload recovery");
        } else {
            summary.recovery = Some(self.recover().await?);
        }

        if let (Some(generator), false) = (&self.generator, opts.dry_run) {
            let mut inventory = self.producer.inventory.lock().await;
            if let Err(err) = inventory
                .refill_if_needed(generator.as_ref(), &self.inventory_cfg)
                .await
            {
                warn!(error = %err, "Inventory refill failed");
            }
        }

        for n in 1..=opts.video_count {
            logi(format!("Video {}/{}", n, opts.video_count));
            match self.producer.produce_one(opts.dry_run).await {
                Ok(VideoOutcome::Uploaded { video_id, .. }) => {
                    logok(format!("Uploaded https://youtube.com/shorts/{}", video_id));
                    summary.uploaded += 1;
                }
                Ok(VideoOutcome::Rendered { video_path }) => {
                    logi(format!("Upload skipped for {}", video_path.display()));
                    summary.rendered += 1;
                }
                Ok(VideoOutcome::Previewed { narration, metadata }) => {
                    logi(format!("[dry run] title: {}", metadata.title));
                    logi(format!("[dry run] narration: {}", narration));
                }
                Ok(VideoOutcome::UploadFailed { job, error }) => {
                    summary.upload_failures += 1;
                    let payload = serde_json::to_value(&job)?;
                    self.recovery
                        .enqueue_failed_upload(payload, &format!("Upload failed: {}", error))
                        .await?;
                }
                Err(err) => {
                    warn!(error = %format!("{:#}", err), "Video production failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Persists queue and inventory state; called on shutdown.
    pub async fn flush(&self) -> StorageResult<()> {
        self.recovery.flush().await?;
        self.producer.inventory.lock().await.flush().await
    }
}
