pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod inventory;
pub mod metadata;
pub mod notify;
pub mod pipeline;
pub mod platform;
pub mod recovery;
pub mod retry;
pub mod schedule;
pub mod speech;
pub mod store;
pub mod usage;

pub use error::{StorageError, StorageResult};

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!(tag, "{}", message),
        _ => tracing::info!(tag, "{}", message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

/// Installs the fmt subscriber used by both binaries (`RUST_LOG` overrides `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
