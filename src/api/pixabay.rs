//! Stock footage from the Pixabay video API.

use crate::config::Config;
use crate::pipeline::FootageSource;
use crate::{logi, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const SEARCH_URL: &str = "https://pixabay.com/api/videos/";
const FALLBACK_TERMS: &[&str] = &["sunrise", "nature", "sky"];

#[derive(Debug, Clone, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<VideoHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoHit {
    pub id: u64,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub videos: Renditions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Renditions {
    pub large: Option<Rendition>,
    pub medium: Option<Rendition>,
    pub small: Option<Rendition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rendition {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl VideoHit {
    /// Higher is better: vertical framing, 15-60s length, good renditions,
    /// keyword overlap with the clip tags and popularity.
    pub fn score(&self, keywords: &[String]) -> u32 {
        let mut score = 0;

        if let Some(m) = self.videos.medium.as_ref().filter(|m| m.width > 0 && m.height > 0) {
            let aspect = f64::from(m.width) / f64::from(m.height);
            if aspect < 1.0 {
                score += 10;
            } else if aspect < 1.5 {
                score += 5;
            }
        }

        score += match self.duration {
            15..=60 => 8,
            10..=120 => 5,
            _ => 0,
        };

        if self.videos.large.is_some() {
            score += 5;
        }
        if self.videos.medium.is_some() {
            score += 3;
        }

        let tags = self.tags.to_lowercase();
        score += 3 * keywords
            .iter()
            .filter(|k| !k.is_empty() && tags.contains(&k.to_lowercase()))
            .count() as u32;

        if self.views > 1_000 {
            score += 2;
        }
        if self.views > 10_000 {
            score += 3;
        }
        score
    }

    /// Best available rendition URL.
    pub fn download_url(&self) -> Option<&str> {
        [&self.videos.large, &self.videos.medium, &self.videos.small]
            .into_iter()
            .flatten()
            .map(|r| r.url.as_str())
            .find(|url| !url.is_empty())
    }
}

/// Picks the highest scoring hit; earlier hits win ties.
pub fn select_best<'a>(hits: &'a [VideoHit], keywords: &[String]) -> Option<&'a VideoHit> {
    let mut best: Option<(&VideoHit, u32)> = None;
    for hit in hits {
        let score = hit.score(keywords);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((hit, score));
        }
    }
    best.map(|(hit, _)| hit)
}

pub struct PixabayFootage {
    client: Client,
    api_key: String,
}

impl PixabayFootage {
    pub fn new(client: Client, cfg: &Config) -> Result<Self> {
        cfg.require_pixabay()?;
        Ok(Self {
            client,
            api_key: cfg.pixabay_key.clone(),
        })
    }

    async fn search(&self, term: &str) -> Result<Vec<VideoHit>> {
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", term),
                ("video_type", "film"),
                ("orientation", "vertical"),
                ("min_duration", "10"),
                ("max_duration", "120"),
                ("per_page", "10"),
                ("safesearch", "true"),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Pixabay search request failed")?
            .error_for_status()
            .context("Pixabay search rejected")?;

        let body: SearchResponse = resp.json().await.context("Pixabay search parse failed")?;
        Ok(body.hits)
    }

    async fn download(&self, url: &str, out_path: &Path) -> Result<()> {
        let mut resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .context("Pixabay download request failed")?
            .error_for_status()
            .context("Pixabay download rejected")?;

        let mut file = fs::File::create(out_path)
            .await
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        while let Some(chunk) = resp.chunk().await.context("Pixabay download interrupted")? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl FootageSource for PixabayFootage {
    async fn fetch(&self, keywords: &[String], dest_dir: &Path) -> Result<PathBuf> {
        let mut terms: Vec<&str> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .take(3)
            .collect();
        if terms.is_empty() {
            terms.extend_from_slice(FALLBACK_TERMS);
        }

        let mut hits = Vec::new();
        for term in terms {
            match self.search(term).await {
                Ok(found) => hits.extend(found),
                Err(err) => logw(format!("Pixabay search for \"{}\" failed: {:#}", term, err)),
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let best = select_best(&hits, keywords).context("No stock footage found")?;
        let url = best.download_url().context("Selected clip has no download URL")?;
        logi(format!("Using Pixabay clip {} ({}s)", best.id, best.duration));

        fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Failed to create dir {}", dest_dir.display()))?;
        let out_path = dest_dir.join(format!("stock_{}.mp4", Utc::now().format("%Y%m%d_%H%M%S")));
        self.download(url, &out_path).await?;
        Ok(out_path)
    }
}
