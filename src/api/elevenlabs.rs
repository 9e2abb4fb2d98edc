use crate::config::Config;
use crate::pipeline::NarrationEngine;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Text-to-speech through ElevenLabs, written as 128k mp3.
pub struct ElevenLabsNarrator {
    client: Client,
    api_key: String,
    voice_id: String,
    model_id: String,
}

impl ElevenLabsNarrator {
    pub fn new(client: Client, cfg: &Config) -> Result<Self> {
        cfg.require_elevenlabs()?;
        Ok(Self {
            client,
            api_key: cfg.elevenlabs_key.clone(),
            voice_id: cfg.eleven_voice_id.clone(),
            model_id: cfg.eleven_model_id.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=mp3_44100_128",
            self.voice_id
        )
    }
}

#[async_trait]
impl NarrationEngine for ElevenLabsNarrator {
    async fn narrate(&self, text: &str, out_mp3: &Path) -> Result<()> {
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .context("ElevenLabs request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("ElevenLabs TTS failed HTTP {}: {}", status.as_u16(), detail.trim());
        }

        let bytes = resp.bytes().await.context("ElevenLabs response read failed")?;
        if bytes.is_empty() {
            anyhow::bail!("ElevenLabs returned empty audio");
        }
        if let Some(parent) = out_mp3.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(out_mp3, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", out_mp3.display()))?;
        Ok(())
    }
}
