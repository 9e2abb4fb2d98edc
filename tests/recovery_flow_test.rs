//! End-to-end recovery behavior against the on-disk JSON store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use devotional_shorts::config::Config;
use devotional_shorts::init;
use devotional_shorts::inventory::{INVENTORY_KEY, ScriptInventory, ScriptSource};
use devotional_shorts::notify::{CollectingNotifier, Severity};
use devotional_shorts::recovery::RecoverySystem;
use devotional_shorts::retry::{QUEUE_KEY, RetryExecutor, RetryKind, RetryOutcome, RetryQueueItem};
use devotional_shorts::schedule::SCHEDULE_KEY;
use devotional_shorts::store::{DocumentStore, JsonFileStore};
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use tempfile::TempDir;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.retry.pause_between_secs = 0;
    cfg
}

/// Records every item it sees and answers with a fixed outcome.
struct RecordingExecutor {
    succeed: bool,
    seen: Mutex<Vec<RetryQueueItem>>,
}

impl RecordingExecutor {
    fn new(succeed: bool) -> Self {
        Self {
            succeed,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<RetryQueueItem> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetryExecutor for RecordingExecutor {
    async fn execute(&self, item: &RetryQueueItem) -> RetryOutcome {
        self.seen.lock().unwrap().push(item.clone());
        if self.succeed {
            RetryOutcome::Succeeded {
                remote_id: Some(format!("yt_{}", item.id)),
            }
        } else {
            RetryOutcome::Failed("network unreachable".to_string())
        }
    }
}

async fn open(
    dir: &TempDir,
    notifier: Arc<CollectingNotifier>,
) -> (Arc<JsonFileStore>, RecoverySystem) {
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let recovery = RecoverySystem::initialize(store.clone(), &test_config(), notifier)
        .await
        .unwrap();
    (store, recovery)
}

#[tokio::test]
async fn missed_slots_are_detected_and_drained_in_one_pass() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(CollectingNotifier::new());
    let (store, mut recovery) = open(&dir, notifier.clone()).await;
    let executor = RecordingExecutor::new(true);

    let first = recovery.run_at(&executor, at(10, 5, 0)).await.unwrap();
    assert!(first.missed_slots.is_empty());
    assert_eq!(first.drain.processed, 0);

    let report = recovery.run_at(&executor, at(11, 7, 0)).await.unwrap();

    assert_eq!(report.missed_slots, vec![at(10, 6, 0), at(10, 18, 0), at(11, 6, 0)]);
    assert_eq!(report.drain.processed, 3);
    assert_eq!(report.drain.succeeded, 3);
    assert_eq!(report.after.total, 0);

    let seen = executor.seen();
    assert!(seen.iter().all(|item| item.kind == RetryKind::MissedSlot));
    assert_eq!(seen[0].scheduled_for, at(10, 6, 0));
    assert_eq!(notifier.count(Severity::Info), 1);

    let queue = store.read(QUEUE_KEY).await.unwrap().unwrap();
    assert_eq!(queue["retryQueue"], json!([]));
    let schedule = store.read(SCHEDULE_KEY).await.unwrap().unwrap();
    assert_eq!(schedule["lastCheckTime"], json!("2025-03-11T07:00:00Z"));
}

#[tokio::test]
async fn queue_survives_restart_with_attempts_and_backoff() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(CollectingNotifier::new());
    let t0 = at(12, 9, 0);

    let id = {
        let (_, mut recovery) = open(&dir, notifier.clone()).await;
        recovery
            .queue_mut()
            .enqueue_at(json!({"videoPath": "output/short_1.mp4"}), "Upload failed: 503", t0)
            .await
            .unwrap()
    };
    assert!(id.starts_with("retry_"));

    let (_, mut recovery) = open(&dir, notifier.clone()).await;
    let item = recovery.queue().items()[0].clone();
    assert_eq!(item.id, id);
    assert_eq!(item.next_retry_time, t0 + Duration::minutes(30));

    let failing = RecordingExecutor::new(false);
    let early = recovery.queue_mut().drain_at(&failing, t0 + Duration::minutes(10)).await.unwrap();
    assert_eq!(early.processed, 0);

    let now = t0 + Duration::minutes(31);
    recovery.queue_mut().drain_at(&failing, now).await.unwrap();
    drop(recovery);

    let (_, recovery) = open(&dir, notifier).await;
    let item = &recovery.queue().items()[0];
    assert_eq!(item.attempts, 1);
    assert_eq!(item.next_retry_time, now + Duration::minutes(30));
    assert_eq!(item.payload["videoPath"], "output/short_1.mp4");
}

#[tokio::test]
async fn exhausted_missed_slot_is_removed_with_error_notification() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(CollectingNotifier::new());
    let (store, mut recovery) = open(&dir, notifier.clone()).await;
    let failing = RecordingExecutor::new(false);

    recovery.run_at(&failing, at(20, 5, 0)).await.unwrap();
    let report = recovery.run_at(&failing, at(20, 7, 0)).await.unwrap();
    assert_eq!(report.missed_slots.len(), 1);
    assert_eq!(report.after.pending, 1);

    // Failures 2 and 3 at their backoff times: +30m then +1h.
    recovery.run_at(&failing, at(20, 7, 31)).await.unwrap();
    let last = recovery.run_at(&failing, at(20, 8, 32)).await.unwrap();

    assert_eq!(last.drain.permanently_failed, 1);
    assert_eq!(last.after.total, 0);
    assert_eq!(failing.seen().len(), 3);
    let errors: Vec<_> = notifier
        .sent()
        .into_iter()
        .filter(|n| n.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("after 3 attempts"));

    let queue = store.read(QUEUE_KEY).await.unwrap().unwrap();
    assert_eq!(queue["retryQueue"], json!([]));
}

#[tokio::test]
async fn inventory_document_uses_camel_case_layout() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let cfg = test_config();

    let mut inventory = ScriptInventory::load(store.clone(), &cfg.inventory).await.unwrap();
    inventory
        .add_script("Isaiah 41:10", "Fear not, for I am with you; be not dismayed.", vec![], ScriptSource::Manual)
        .await
        .unwrap();
    inventory.next_script().await.unwrap().unwrap();

    let raw = std::fs::read_to_string(store.path_for(INVENTORY_KEY)).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["metadata"]["totalGenerated"], 1);
    assert_eq!(doc["metadata"]["lastUsedIndex"], 0);
    assert_eq!(doc["sources"]["manual"], 1);
    let script = &doc["scripts"][0];
    assert_eq!(script["used"], true);
    assert_eq!(script["usageCount"], 1);
    assert!(script["usedAt"].is_string());

    let reloaded = ScriptInventory::load(store, &cfg.inventory).await.unwrap();
    assert_eq!(reloaded.stats().unused, 0);
}

/// Succeeds on the first item and never finishes the second.
struct StallsOnSecond;

#[async_trait]
impl RetryExecutor for StallsOnSecond {
    async fn execute(&self, item: &RetryQueueItem) -> RetryOutcome {
        if item.payload["videoPath"] == "a.mp4" {
            return RetryOutcome::Succeeded {
                remote_id: Some("yt_a".to_string()),
            };
        }
        std::future::pending::<RetryOutcome>().await
    }
}

#[tokio::test]
async fn interrupted_drain_keeps_completed_items_off_disk() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(CollectingNotifier::new());
    let t0 = at(14, 9, 0);

    {
        let (_, mut recovery) = open(&dir, notifier.clone()).await;
        let queue = recovery.queue_mut();
        queue.enqueue_at(json!({"videoPath": "a.mp4"}), "Upload failed: 503", t0).await.unwrap();
        queue.enqueue_at(json!({"videoPath": "b.mp4"}), "Upload failed: 503", t0).await.unwrap();

        let drain = queue.drain_at(&StallsOnSecond, t0 + Duration::hours(1));
        let interrupted = tokio::time::timeout(StdDuration::from_millis(200), drain).await;
        assert!(interrupted.is_err());
        // Dropped without a flush, as a killed process would be.
    }

    let (_, recovery) = open(&dir, notifier).await;
    let items = recovery.queue().items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].payload["videoPath"], "b.mp4");
    assert_eq!(items[0].attempts, 0);
}

#[tokio::test]
async fn clean_keeps_videos_awaiting_upload() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(CollectingNotifier::new());
    let cfg = Config {
        output_dir: dir.path().join("output"),
        temp_dir: dir.path().join("temp"),
        ..test_config()
    };
    std::fs::create_dir_all(&cfg.output_dir).unwrap();
    let queued = cfg.output_dir.join("short_3_20250315.mp4");
    std::fs::write(&queued, b"mp4").unwrap();
    std::fs::write(cfg.output_dir.join("short_4_20250315.mp4"), b"mp4").unwrap();

    let (_, mut recovery) = open(&dir, notifier).await;
    recovery
        .queue_mut()
        .enqueue_at(json!({"videoPath": queued}), "Upload failed: quota", at(15, 6, 0))
        .await
        .unwrap();

    let keep = recovery.queue().referenced_videos();
    let removed = init::clean_workspace(&cfg, &keep).await.unwrap();

    assert_eq!(removed, 1);
    assert!(queued.exists());
}
