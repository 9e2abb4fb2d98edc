//! User-visible notifications for permanent failures and missed uploads.
//!
//! Delivery is best effort: [`deliver`] logs a failed notification and moves on,
//! so a broken notifier can never abort a recovery run.

use crate::platform;
use async_trait::async_trait;
use std::fmt;
use std::sync::Mutex;
use tracing::{error, info, warn};

pub const APP_TITLE: &str = "Devotional Shorts AutoUploader";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
    Info,
}

impl Severity {
    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Success => "✅",
            Severity::Warning => "⚠️",
            Severity::Error => "❌",
            Severity::Info => "💬",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn title(&self) -> String {
        format!("{} {}", self.severity.icon(), APP_TITLE)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.message)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Sends `notification`, logging instead of failing when delivery breaks.
pub async fn deliver(notifier: &dyn Notifier, notification: Notification) {
    if let Err(err) = notifier.notify(&notification).await {
        warn!(error = %err, "Could not show notification");
        info!("{}", notification);
    }
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification.severity {
            Severity::Error => error!(title = %notification.title(), "{}", notification.message),
            Severity::Warning => warn!(title = %notification.title(), "{}", notification.message),
            Severity::Success | Severity::Info => {
                info!(title = %notification.title(), "{}", notification.message)
            }
        }
        Ok(())
    }
}

/// Shows an OS toast and mirrors it to the log.
pub struct DesktopNotifier;

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        LogNotifier.notify(notification).await?;
        platform::show_toast(&notification.title(), &notification.message).await
    }
}

/// Keeps every notification in memory; used by tests and dry runs.
#[derive(Default)]
pub struct CollectingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.sent()
            .iter()
            .filter(|n| n.severity == severity)
            .count()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
            anyhow::bail!("toast service unavailable")
        }
    }

    #[test]
    fn title_carries_severity_icon() {
        let n = Notification::new(Severity::Error, "Upload permanently failed");
        assert_eq!(n.title(), format!("❌ {}", APP_TITLE));
        assert!(n.to_string().ends_with("Upload permanently failed"));
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        deliver(&BrokenNotifier, Notification::new(Severity::Info, "hello")).await;
    }

    #[tokio::test]
    async fn collecting_notifier_records_in_order() {
        let notifier = CollectingNotifier::new();
        deliver(&notifier, Notification::new(Severity::Warning, "one")).await;
        deliver(&notifier, Notification::new(Severity::Error, "two")).await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].message, "two");
        assert_eq!(notifier.count(Severity::Error), 1);
    }
}
