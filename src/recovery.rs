//! Upload recovery: missed-slot detection plus retry queue processing.
//!
//! [`RecoverySystem`] is built once per process with [`RecoverySystem::initialize`]
//! and handed to whoever needs it (pipeline runner, CLI). A recovery pass always
//! runs detect -> drain -> cleanup so slots found by detection are retried in
//! the same pass.

use crate::config::Config;
use crate::error::StorageResult;
use crate::notify::{self, Notification, Notifier, Severity};
use crate::retry::{DrainSummary, QueueStatus, RetryExecutor, RetryPolicy, RetryQueue};
use crate::schedule::MissedSlotDetector;
use crate::store::DocumentStore;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub before: QueueStatus,
    pub missed_slots: Vec<DateTime<Utc>>,
    pub drain: DrainSummary,
    pub cleaned: usize,
    pub after: QueueStatus,
}

pub struct RecoverySystem {
    queue: RetryQueue,
    detector: MissedSlotDetector,
    notifier: Arc<dyn Notifier>,
    retention_days: i64,
}

impl RecoverySystem {
    pub async fn initialize(
        store: Arc<dyn DocumentStore>,
        cfg: &Config,
        notifier: Arc<dyn Notifier>,
    ) -> StorageResult<Self> {
        let queue = RetryQueue::load(
            store.clone(),
            notifier.clone(),
            RetryPolicy::from_config(&cfg.retry),
        )
        .await?;
        let detector = MissedSlotDetector::new(store, cfg.schedule_hours.clone());
        info!(schedule = ?cfg.schedule_hours, "Upload recovery system initialized");

        Ok(Self {
            queue,
            detector,
            notifier,
            retention_days: cfg.retry.retention_days,
        })
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut RetryQueue {
        &mut self.queue
    }

    pub fn detector(&self) -> &MissedSlotDetector {
        &self.detector
    }

    pub fn status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub async fn enqueue_failed_upload(&mut self, payload: Value, reason: &str) -> StorageResult<String> {
        self.queue.enqueue(payload, reason).await
    }

    pub async fn detect_missed(&mut self) -> StorageResult<Vec<DateTime<Utc>>> {
        self.detect_missed_at(Local::now()).await
    }

    /// Turns every slot missed since the last check into an immediately
    /// eligible queue item.
    pub async fn detect_missed_at<Tz: TimeZone>(
        &mut self,
        now: DateTime<Tz>,
    ) -> StorageResult<Vec<DateTime<Utc>>> {
        let now_utc = now.with_timezone(&Utc);
        let slots = self.detector.check(now).await?;

        for slot in &slots {
            info!(slot = %slot.with_timezone(&Local), "Missed upload slot");
            self.queue.enqueue_missed_at(*slot, now_utc).await?;
        }

        if !slots.is_empty() {
            notify::deliver(
                self.notifier.as_ref(),
                Notification::new(
                    Severity::Info,
                    format!(
                        "Found {} missed upload(s). Starting catch-up...",
                        slots.len()
                    ),
                ),
            )
            .await;
        }
        Ok(slots)
    }

    pub async fn run(&mut self, executor: &dyn RetryExecutor) -> StorageResult<RecoveryReport> {
        self.pass(executor, Local::now(), true).await
    }

    /// One full recovery pass: detect, drain, cleanup.
    pub async fn run_at<Tz: TimeZone>(
        &mut self,
        executor: &dyn RetryExecutor,
        now: DateTime<Tz>,
    ) -> StorageResult<RecoveryReport> {
        self.pass(executor, now, false).await
    }

    async fn pass<Tz: TimeZone>(
        &mut self,
        executor: &dyn RetryExecutor,
        now: DateTime<Tz>,
        live_clock: bool,
    ) -> StorageResult<RecoveryReport> {
        let now_utc = now.with_timezone(&Utc);
        let before = self.queue.status();
        let missed_slots = self.detect_missed_at(now).await?;
        let drain = self.queue.drain_with(executor, now_utc, live_clock).await?;
        let cleaned = self.queue.cleanup_at(self.retention_days, now_utc).await?;
        let after = self.queue.status();

        Ok(RecoveryReport {
            before,
            missed_slots,
            drain,
            cleaned,
            after,
        })
    }

    pub async fn flush(&self) -> StorageResult<()> {
        self.queue.flush().await
    }
}

/// Human readable queue summary used by the CLI.
pub fn describe_status(status: &QueueStatus, now: DateTime<Utc>) -> Vec<String> {
    if status.total == 0 {
        return vec!["Retry queue is empty".to_string()];
    }

    let mut lines = vec![
        format!("Total items in queue: {}", status.total),
        format!("Pending retries: {}", status.pending),
        format!("Permanently failed: {}", status.permanently_failed),
    ];
    if let Some(next) = status.next_retry_at {
        let minutes = (next - now).num_minutes().max(0);
        lines.push(format!("Next retry in: {} minutes", minutes));
    }
    lines
}
