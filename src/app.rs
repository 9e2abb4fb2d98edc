//! Wiring shared by the runner and the CLI: config, store, notifier and the
//! concrete pipeline steps.

use crate::api::elevenlabs::ElevenLabsNarrator;
use crate::api::openai::OpenAiScriptGenerator;
use crate::api::pixabay::PixabayFootage;
use crate::api::youtube::YouTubeUploader;
use crate::config::Config;
use crate::ffmpeg::FfmpegRenderer;
use crate::init;
use crate::inventory::{INVENTORY_KEY, ScriptGenerator, ScriptInventory};
use crate::notify::{DesktopNotifier, LogNotifier, Notifier};
use crate::pipeline::{FootageSource, NarrationEngine, Pipeline, Producer, Renderer, Steps, UploadTransport};
use crate::recovery::RecoverySystem;
use crate::retry::QUEUE_KEY;
use crate::schedule::SCHEDULE_KEY;
use crate::store::{DocumentStore, JsonFileStore, MemoryStore};
use crate::usage::{BudgetedFootage, UsageTracker};
use crate::{api, logi, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

const STATE_KEYS: [&str; 3] = [INVENTORY_KEY, QUEUE_KEY, SCHEDULE_KEY];

pub struct App {
    pub cfg: Config,
    pub store: Arc<dyn DocumentStore>,
    /// Daily usage counters, kept under `logs_dir`.
    pub usage_store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
    pub client: Client,
    dry_run: bool,
}

impl App {
    /// Loads and validates `config_path`, creates the working directories and
    /// opens the state store. A dry run works on an in-memory copy of the state.
    pub async fn bootstrap(config_path: &Path, dry_run: bool) -> Result<Self> {
        let cfg = Config::load(config_path).await?;
        init::ensure_directories(&cfg).await?;

        let disk: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::new(&cfg.data_dir));
        let (store, usage_store) = if dry_run {
            logi("Dry run: state changes stay in memory");
            let usage: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
            (snapshot(disk.as_ref()).await?, usage)
        } else {
            let usage: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::new(&cfg.logs_dir));
            (disk, usage)
        };
        let notifier: Arc<dyn Notifier> = if cfg.desktop_notifications && !dry_run {
            Arc::new(DesktopNotifier)
        } else {
            Arc::new(LogNotifier)
        };

        Ok(Self {
            cfg,
            store,
            usage_store,
            notifier,
            client: api::http_client()?,
            dry_run,
        })
    }

    pub async fn recovery(&self) -> Result<RecoverySystem> {
        RecoverySystem::initialize(self.store.clone(), &self.cfg, self.notifier.clone())
            .await
            .context("Failed to initialize upload recovery")
    }

    pub async fn inventory(&self) -> Result<ScriptInventory> {
        ScriptInventory::load(self.store.clone(), &self.cfg.inventory)
            .await
            .context("Failed to load script inventory")
    }

    pub fn usage(&self) -> UsageTracker {
        UsageTracker::new(self.usage_store.clone(), self.cfg.pixabay_daily_limit)
    }

    /// Script generator for refills; `None` without an OpenAI key.
    pub fn generator(&self) -> Option<Arc<dyn ScriptGenerator>> {
        match OpenAiScriptGenerator::new(self.client.clone(), &self.cfg) {
            Ok(generator) => Some(Arc::new(generator)),
            Err(err) => {
                logw(format!("Inventory refill disabled: {}", err));
                None
            }
        }
    }

    pub fn steps(&self, skip_upload: bool) -> Result<Steps> {
        if self.dry_run {
            return Ok(Steps {
                narrator: Arc::new(Disabled),
                footage: Arc::new(Disabled),
                renderer: Arc::new(Disabled),
                uploader: None,
            });
        }

        let uploader: Option<Arc<dyn UploadTransport>> = if skip_upload {
            None
        } else {
            Some(Arc::new(YouTubeUploader::new(self.client.clone(), &self.cfg)?))
        };
        Ok(Steps {
            narrator: Arc::new(ElevenLabsNarrator::new(self.client.clone(), &self.cfg)?),
            footage: Arc::new(BudgetedFootage::new(
                Arc::new(PixabayFootage::new(self.client.clone(), &self.cfg)?),
                self.usage(),
            )),
            renderer: Arc::new(FfmpegRenderer),
            uploader,
        })
    }

    pub async fn pipeline(&self, skip_upload: bool) -> Result<Pipeline> {
        let producer = Producer::new(self.inventory().await?, self.steps(skip_upload)?, &self.cfg);
        Ok(Pipeline::new(
            producer,
            self.recovery().await?,
            self.generator(),
            &self.cfg,
        ))
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Copies the persisted documents into a fresh [`MemoryStore`].
async fn snapshot(source: &dyn DocumentStore) -> Result<Arc<dyn DocumentStore>> {
    let memory = MemoryStore::new();
    for key in STATE_KEYS {
        if let Some(doc) = source.read(key).await? {
            memory.write(key, &doc).await?;
        }
    }
    Ok(Arc::new(memory))
}

/// Stand-in for external steps during a dry run; never called because the
/// pipeline stops before narration.
struct Disabled;

#[async_trait]
impl NarrationEngine for Disabled {
    async fn narrate(&self, _text: &str, _out_mp3: &Path) -> Result<()> {
        anyhow::bail!("narration disabled in dry run")
    }
}

#[async_trait]
impl FootageSource for Disabled {
    async fn fetch(&self, _keywords: &[String], _dest_dir: &Path) -> Result<PathBuf> {
        anyhow::bail!("footage disabled in dry run")
    }
}

#[async_trait]
impl Renderer for Disabled {
    async fn render(&self, _footage: &Path, _narration: &Path, _out_mp4: &Path) -> Result<()> {
        anyhow::bail!("rendering disabled in dry run")
    }
}
