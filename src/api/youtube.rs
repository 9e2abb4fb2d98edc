//! YouTube Data API v3 resumable upload with a pre-issued OAuth access token.

use crate::config::Config;
use crate::metadata::VideoMetadata;
use crate::pipeline::UploadTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

const UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status";

pub struct YouTubeUploader {
    client: Client,
    access_token: String,
}

impl YouTubeUploader {
    pub fn new(client: Client, cfg: &Config) -> Result<Self> {
        if cfg.youtube_access_token.is_empty() {
            anyhow::bail!("config.json: youtube_access_token missing");
        }
        Ok(Self {
            client,
            access_token: cfg.youtube_access_token.clone(),
        })
    }
}

fn video_resource(meta: &VideoMetadata) -> Value {
    json!({
        "snippet": {
            "title": meta.title,
            "description": meta.description,
            "tags": meta.tags,
            "categoryId": meta.category_id,
        },
        "status": {
            "privacyStatus": meta.privacy_status,
            "selfDeclaredMadeForKids": false,
        },
    })
}

#[async_trait]
impl UploadTransport for YouTubeUploader {
    async fn upload(&self, video: &Path, meta: &VideoMetadata) -> Result<String> {
        let bytes = fs::read(video)
            .await
            .with_context(|| format!("Failed to read {}", video.display()))?;

        let session = self
            .client
            .post(UPLOAD_URL)
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", bytes.len().to_string())
            .json(&video_resource(meta))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("YouTube upload session request failed")?;

        let status = session.status();
        if !status.is_success() {
            let detail = session.text().await.unwrap_or_default();
            anyhow::bail!("YouTube rejected upload session HTTP {}: {}", status.as_u16(), detail.trim());
        }
        let location = session
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .context("YouTube upload session had no Location header")?
            .to_string();

        let resp = self
            .client
            .put(&location)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, "video/mp4")
            .header(CONTENT_LENGTH, bytes.len().to_string())
            .body(bytes)
            .timeout(Duration::from_secs(900))
            .send()
            .await
            .context("YouTube video upload failed")?;

        let status = resp.status();
        let body: Value = resp.json().await.context("YouTube upload response was not JSON")?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("YouTube upload HTTP {}: {}", status.as_u16(), message);
        }

        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .context("YouTube upload response had no video id")?;
        info!(video_id = id, url = %format!("https://youtube.com/shorts/{id}"), "Upload complete");
        Ok(id.to_string())
    }
}
