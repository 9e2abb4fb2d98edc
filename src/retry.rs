//! Persistent retry queue with exponential backoff.
//!
//! Items move `pending -> removed` on success, stay pending with a later
//! `nextRetryTime` on failure, and are removed (with an error notification)
//! once their attempts reach `maxAttempts`. The queue never re-runs work
//! itself: every attempt goes through a caller supplied [`RetryExecutor`].

use crate::config::{MAX_BASE_DELAY_MINUTES, RetryConfig};
use crate::error::StorageResult;
use crate::notify::{self, Notification, Notifier, Severity};
use crate::store::{self, DocumentStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const QUEUE_KEY: &str = "upload_recovery";

pub const MISSED_SLOT_REASON: &str = "Missed upload - system was offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetryKind {
    /// A produced video whose upload failed.
    #[default]
    Upload,
    /// A scheduled run that never happened.
    MissedSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub kind: RetryKind,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub payload: Value,
    pub next_retry_time: DateTime<Utc>,
}

impl RetryQueueItem {
    pub fn is_pending(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_retry_time <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueDocument {
    retry_queue: Vec<RetryQueueItem>,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub upload_max_attempts: u32,
    pub missed_max_attempts: u32,
    /// Sleep between two processed items within one drain.
    pub pause_between: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Longest wait between two attempts, whatever the base and failure count.
    pub fn max_backoff() -> Duration {
        Duration::days(7)
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::minutes(cfg.base_delay_minutes.clamp(1, MAX_BASE_DELAY_MINUTES)),
            upload_max_attempts: cfg.upload_max_attempts,
            missed_max_attempts: cfg.missed_max_attempts,
            pause_between: cfg.pause_between(),
        }
    }

    /// `base * 2^failures`: 30m, 1h, 2h, 4h, 8h with the default base,
    /// capped at [`RetryPolicy::max_backoff`].
    pub fn backoff(&self, failures: u32) -> Duration {
        let cap = Self::max_backoff();
        self.base_delay
            .checked_mul(2i32.saturating_pow(failures.min(20)))
            .map_or(cap, |delay| delay.min(cap))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded { remote_id: Option<String> },
    Failed(String),
}

/// Re-runs the operation behind a queue item. Expected failures (network,
/// quota, missing files) are reported as [`RetryOutcome::Failed`].
#[async_trait]
pub trait RetryExecutor: Send + Sync {
    async fn execute(&self, item: &RetryQueueItem) -> RetryOutcome;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub permanently_failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub permanently_failed: usize,
    pub next_retry_at: Option<DateTime<Utc>>,
}

pub struct RetryQueue {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    items: Vec<RetryQueueItem>,
}

impl RetryQueue {
    pub async fn load(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> StorageResult<Self> {
        let doc: Option<QueueDocument> = store::load(store.as_ref(), QUEUE_KEY).await?;
        let items = doc.map(|d| d.retry_queue).unwrap_or_default();
        if !items.is_empty() {
            info!(items = items.len(), "Loaded retry queue");
        }
        Ok(Self {
            store,
            notifier,
            policy,
            items,
        })
    }

    pub fn items(&self) -> &[RetryQueueItem] {
        &self.items
    }

    /// Video files that pending upload items still need.
    pub fn referenced_videos(&self) -> Vec<PathBuf> {
        self.items
            .iter()
            .filter(|item| item.kind == RetryKind::Upload && item.is_pending())
            .filter_map(|item| item.payload.get("videoPath").and_then(Value::as_str))
            .map(PathBuf::from)
            .collect()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Records a failed upload; first retry after `backoff(0)`.
    pub async fn enqueue(&mut self, payload: Value, reason: &str) -> StorageResult<String> {
        self.enqueue_at(payload, reason, Utc::now()).await
    }

    pub async fn enqueue_at(
        &mut self,
        payload: Value,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<String> {
        let scheduled_for = payload
            .get("scheduledFor")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);

        let item = RetryQueueItem {
            id: new_item_id("retry", now),
            created_at: now,
            scheduled_for,
            reason: reason.to_string(),
            kind: RetryKind::Upload,
            attempts: 0,
            max_attempts: self.policy.upload_max_attempts,
            payload,
            next_retry_time: now + self.policy.backoff(0),
        };
        let id = item.id.clone();
        self.items.push(item);
        self.persist(now).await?;

        info!(id = %id, reason, "Added to retry queue");
        notify::deliver(
            self.notifier.as_ref(),
            Notification::new(
                Severity::Warning,
                format!("{}. Added to retry queue.", reason),
            ),
        )
        .await;
        Ok(id)
    }

    /// Records a scheduled slot that was missed; eligible immediately.
    pub async fn enqueue_missed(&mut self, slot: DateTime<Utc>) -> StorageResult<String> {
        self.enqueue_missed_at(slot, Utc::now()).await
    }

    pub async fn enqueue_missed_at(
        &mut self,
        slot: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<String> {
        let item = RetryQueueItem {
            id: new_item_id("missed", now),
            created_at: now,
            scheduled_for: slot,
            reason: MISSED_SLOT_REASON.to_string(),
            kind: RetryKind::MissedSlot,
            attempts: 0,
            max_attempts: self.policy.missed_max_attempts,
            payload: serde_json::json!({ "scheduledFor": slot }),
            next_retry_time: now,
        };
        let id = item.id.clone();
        self.items.push(item);
        self.persist(now).await?;

        info!(id = %id, slot = %slot, "Added missed upload to queue");
        Ok(id)
    }

    /// Processes every ready item once. Backoff for a failed item is measured
    /// from the moment its outcome is recorded, not from the start of the pass.
    pub async fn drain(&mut self, executor: &dyn RetryExecutor) -> StorageResult<DrainSummary> {
        self.drain_with(executor, Utc::now(), true).await
    }

    /// [`RetryQueue::drain`] with every timestamp pinned to `now`.
    pub async fn drain_at(
        &mut self,
        executor: &dyn RetryExecutor,
        now: DateTime<Utc>,
    ) -> StorageResult<DrainSummary> {
        self.drain_with(executor, now, false).await
    }

    /// Items ready at `now` run once each, in queue order. The queue is
    /// persisted after every outcome, so an interrupted pass loses at most the
    /// item that was in flight. Attempt bookkeeping happens only after the
    /// executor has returned.
    pub(crate) async fn drain_with(
        &mut self,
        executor: &dyn RetryExecutor,
        now: DateTime<Utc>,
        live_clock: bool,
    ) -> StorageResult<DrainSummary> {
        let ready: Vec<String> = self
            .items
            .iter()
            .filter(|item| item.is_ready(now))
            .map(|item| item.id.clone())
            .collect();

        let mut summary = DrainSummary::default();
        if ready.is_empty() {
            return Ok(summary);
        }
        info!(ready = ready.len(), queued = self.items.len(), "Processing retry queue");

        for (n, id) in ready.iter().enumerate() {
            let Some(snapshot) = self.items.iter().find(|item| &item.id == id).cloned() else {
                continue;
            };
            let attempt = snapshot.attempts + 1;
            info!(
                id = %id,
                attempt,
                max_attempts = snapshot.max_attempts,
                "Retrying queue item"
            );

            let outcome = executor.execute(&snapshot).await;
            let recorded_at = if live_clock { Utc::now().max(now) } else { now };
            summary.processed += 1;

            let Some(pos) = self.items.iter().position(|item| &item.id == id) else {
                continue;
            };
            match outcome {
                RetryOutcome::Succeeded { remote_id } => {
                    self.items.remove(pos);
                    summary.succeeded += 1;
                    self.persist(recorded_at).await?;
                    info!(id = %id, remote_id = ?remote_id, "Queue item succeeded");
                }
                RetryOutcome::Failed(reason) if attempt >= snapshot.max_attempts => {
                    self.items.remove(pos);
                    summary.permanently_failed += 1;
                    self.persist(recorded_at).await?;
                    warn!(id = %id, reason = %reason, "Queue item exceeded max attempts");
                    notify::deliver(
                        self.notifier.as_ref(),
                        Notification::new(Severity::Error, exhausted_message(&snapshot, &reason)),
                    )
                    .await;
                }
                RetryOutcome::Failed(reason) => {
                    let next = recorded_at + self.policy.backoff(snapshot.attempts);
                    let item = &mut self.items[pos];
                    item.attempts = attempt;
                    item.next_retry_time = next;
                    self.persist(recorded_at).await?;
                    warn!(id = %id, reason = %reason, next_retry = %next, "Queue item failed; rescheduled");
                }
            }

            if n + 1 < ready.len() && !self.policy.pause_between.is_zero() {
                tokio::time::sleep(self.policy.pause_between).await;
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            permanently_failed = summary.permanently_failed,
            "Retry queue processed"
        );
        Ok(summary)
    }

    pub async fn cleanup(&mut self, retention_days: i64) -> StorageResult<usize> {
        self.cleanup_at(retention_days, Utc::now()).await
    }

    /// Drops exhausted items created more than `retention_days` ago. Pending
    /// items are kept regardless of age.
    pub async fn cleanup_at(&mut self, retention_days: i64, now: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = Duration::try_days(retention_days)
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.items.len();
        self.items
            .retain(|item| item.is_pending() || item.created_at > cutoff);
        let removed = before - self.items.len();

        if removed > 0 {
            self.persist(now).await?;
            info!(removed, "Cleaned up old queue items");
        }
        Ok(removed)
    }

    pub fn status(&self) -> QueueStatus {
        let pending: Vec<&RetryQueueItem> = self.items.iter().filter(|i| i.is_pending()).collect();
        QueueStatus {
            total: self.items.len(),
            pending: pending.len(),
            permanently_failed: self.items.len() - pending.len(),
            next_retry_at: pending.iter().map(|i| i.next_retry_time).min(),
        }
    }

    /// Writes the in-memory queue; used when a run is interrupted.
    pub async fn flush(&self) -> StorageResult<()> {
        self.persist(Utc::now()).await
    }

    async fn persist(&self, now: DateTime<Utc>) -> StorageResult<()> {
        let doc = QueueDocument {
            retry_queue: self.items.clone(),
            last_updated: now,
        };
        store::save(self.store.as_ref(), QUEUE_KEY, &doc).await
    }
}

fn exhausted_message(item: &RetryQueueItem, reason: &str) -> String {
    match item.kind {
        RetryKind::Upload => format!(
            "Upload permanently failed after {} attempts: {}",
            item.max_attempts, reason
        ),
        RetryKind::MissedSlot => format!(
            "Catch-up for the {} slot abandoned after {} attempts: {}",
            item.scheduled_for.format("%Y-%m-%d %H:%M UTC"),
            item.max_attempts,
            reason
        ),
    }
}

fn new_item_id(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", prefix, now.timestamp_millis(), suffix)
}
