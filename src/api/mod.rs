pub mod elevenlabs;
pub mod openai;
pub mod pixabay;
pub mod youtube;

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Shared HTTP client for every adapter; per-request timeouts are set by the callers.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .gzip(true)
        .connect_timeout(Duration::from_secs(15))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}
