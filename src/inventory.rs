//! Script inventory: a finite pool of pre-generated scripts consumed in rotation.
//!
//! The whole pool lives in one document (`script_inventory`) that is rewritten
//! after every mutation. Records are never deleted; consumption only flips the
//! `used` flag, so the pool has to be replenished or reset once it runs dry.

use crate::config::InventoryConfig;
use crate::error::StorageResult;
use crate::store::{self, DocumentStore};
use crate::{logi, logok, logw};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const INVENTORY_KEY: &str = "script_inventory";

/// Scripts shorter than this are treated as failed generations.
const MIN_SCRIPT_CHARS: usize = 50;

pub const VERSES: &[&str] = &[
    "John 3:16", "Philippians 4:13", "Jeremiah 29:11", "Romans 8:28", "Proverbs 3:5-6",
    "Isaiah 40:31", "Matthew 6:26", "Psalm 23:1", "Romans 8:38-39", "John 14:6",
    "Ephesians 2:8-9", "Matthew 28:20", "Psalm 46:10", "Isaiah 41:10", "John 10:10",
    "Romans 12:2", "Galatians 2:20", "Philippians 4:19", "Matthew 11:28", "Psalm 139:14",
    "Colossians 3:23", "Joshua 1:9", "Psalm 37:4", "Romans 8:1", "John 8:32",
    "Matthew 5:16", "Psalm 119:105", "Hebrews 11:1", "James 1:2-3", "Matthew 6:33",
    "Proverbs 27:17", "Romans 15:13", "Psalm 34:8", "John 15:13", "Galatians 5:22-23",
    "Ephesians 4:32", "Matthew 7:7", "Psalm 27:1", "Romans 10:9", "John 1:12",
    "Philippians 1:6", "Isaiah 53:5", "Matthew 22:37", "Psalm 121:1-2", "John 16:33",
    "Romans 6:23", "Ephesians 6:10", "Psalm 18:2", "Matthew 5:14", "John 11:25",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSource {
    Generated,
    Fallback,
    Manual,
}

impl ScriptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptSource::Generated => "generated",
            ScriptSource::Fallback => "fallback",
            ScriptSource::Manual => "manual",
        }
    }
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRecord {
    pub id: u64,
    pub verse: String,
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub source: ScriptSource,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub used: bool,
    #[serde(default)]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryMetadata {
    pub total_generated: u64,
    /// Position inside the unused subset handed out last; -1 before the first pick.
    pub last_used_index: i64,
    pub target_inventory: u32,
    pub minimum_threshold: u32,
    pub critical_threshold: u32,
    #[serde(default)]
    pub last_batch_generation: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryDocument {
    pub scripts: Vec<ScriptRecord>,
    pub metadata: InventoryMetadata,
    pub sources: BTreeMap<String, u64>,
}

impl InventoryDocument {
    fn empty(cfg: &InventoryConfig) -> Self {
        let sources = [ScriptSource::Generated, ScriptSource::Fallback, ScriptSource::Manual]
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        Self {
            scripts: Vec::new(),
            metadata: InventoryMetadata {
                total_generated: 0,
                last_used_index: -1,
                target_inventory: cfg.target_inventory,
                minimum_threshold: cfg.minimum_threshold,
                critical_threshold: cfg.critical_threshold,
                last_batch_generation: None,
            },
            sources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryStats {
    pub total: usize,
    pub used: usize,
    pub unused: usize,
    pub by_source: BTreeMap<String, u64>,
    pub needs_refill: bool,
    pub usage_percentage: f64,
    pub average_uses_per_script: f64,
    pub used_multiple_times: usize,
    pub last_batch_generation: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyLevel {
    Ok,
    Low,
    Critical,
}

impl fmt::Display for SupplyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SupplyLevel::Ok => "GOOD",
            SupplyLevel::Low => "LOW",
            SupplyLevel::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct InventoryReport {
    pub most_used: Vec<ScriptRecord>,
    pub recently_used: Vec<ScriptRecord>,
}

/// A parsed reference such as `Proverbs 3:5-6`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseRef {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    pub verse_end: Option<u32>,
}

impl VerseRef {
    pub fn parse(reference: &str) -> Option<Self> {
        let re = verse_regex().ok()?;
        let caps = re.captures(reference.trim())?;
        Some(Self {
            book: caps[1].to_string(),
            chapter: caps[2].parse().ok()?,
            verse: caps[3].parse().ok()?,
            verse_end: caps.get(4).and_then(|m| m.as_str().parse().ok()),
        })
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse)?;
        if let Some(end) = self.verse_end {
            write!(f, "-{}", end)?;
        }
        Ok(())
    }
}

fn verse_regex() -> anyhow::Result<&'static Regex> {
    static VERSE_RE: OnceCell<Regex> = OnceCell::new();
    VERSE_RE.get_or_try_init(|| {
        Regex::new(r"^(.+?)\s+(\d+):(\d+)(?:-(\d+))?$")
            .map_err(|e| anyhow::anyhow!("failed to compile verse regex: {e}"))
    })
}

#[derive(Debug, Clone)]
pub struct GeneratedScript {
    pub text: String,
    pub keywords: Vec<String>,
}

/// Upstream producer used to replenish the pool.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, verse: &VerseRef) -> anyhow::Result<GeneratedScript>;
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub success: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

pub struct ScriptInventory {
    store: Arc<dyn DocumentStore>,
    doc: InventoryDocument,
}

impl ScriptInventory {
    /// Loads the inventory, creating and persisting an empty one on first use.
    /// Thresholds always come from `cfg`.
    pub async fn load(store: Arc<dyn DocumentStore>, cfg: &InventoryConfig) -> StorageResult<Self> {
        let existing: Option<InventoryDocument> = store::load(store.as_ref(), INVENTORY_KEY).await?;
        let created = existing.is_none();
        let mut doc = existing.unwrap_or_else(|| InventoryDocument::empty(cfg));
        doc.metadata.target_inventory = cfg.target_inventory;
        doc.metadata.minimum_threshold = cfg.minimum_threshold;
        doc.metadata.critical_threshold = cfg.critical_threshold;

        let inventory = Self { store, doc };
        if created {
            inventory.persist().await?;
            logi("Created empty script inventory");
        } else {
            info!(scripts = inventory.doc.scripts.len(), "Loaded script inventory");
        }
        Ok(inventory)
    }

    pub fn document(&self) -> &InventoryDocument {
        &self.doc
    }

    pub fn scripts(&self) -> &[ScriptRecord] {
        &self.doc.scripts
    }

    pub async fn add_script(
        &mut self,
        verse: &str,
        text: &str,
        keywords: Vec<String>,
        source: ScriptSource,
    ) -> StorageResult<ScriptRecord> {
        self.add_script_at(verse, text, keywords, source, Utc::now()).await
    }

    pub async fn add_script_at(
        &mut self,
        verse: &str,
        text: &str,
        keywords: Vec<String>,
        source: ScriptSource,
        now: DateTime<Utc>,
    ) -> StorageResult<ScriptRecord> {
        let record = ScriptRecord {
            id: self.doc.metadata.total_generated + 1,
            verse: verse.to_string(),
            text: text.trim().to_string(),
            keywords,
            source,
            created_at: now,
            used: false,
            used_at: None,
            usage_count: 0,
        };

        self.doc.scripts.push(record.clone());
        self.doc.metadata.total_generated += 1;
        *self
            .doc
            .sources
            .entry(source.as_str().to_string())
            .or_insert(0) += 1;

        self.persist().await?;
        logok(format!("Added script #{} for {} ({})", record.id, record.verse, source));
        Ok(record)
    }

    pub async fn next_script(&mut self) -> StorageResult<Option<ScriptRecord>> {
        self.next_script_at(Utc::now()).await
    }

    /// Hands out the next unused script and marks it consumed. `None` means
    /// the pool is exhausted; callers fall back to [`fallback_script`].
    pub async fn next_script_at(&mut self, now: DateTime<Utc>) -> StorageResult<Option<ScriptRecord>> {
        let unused: Vec<usize> = self
            .doc
            .scripts
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.used)
            .map(|(i, _)| i)
            .collect();

        if unused.is_empty() {
            logw("No unused scripts available");
            return Ok(None);
        }

        let mut index = self.doc.metadata.last_used_index + 1;
        if index < 0 || index as usize >= unused.len() {
            index = 0;
        }
        self.doc.metadata.last_used_index = index;

        let record = &mut self.doc.scripts[unused[index as usize]];
        record.used = true;
        record.used_at = Some(now);
        record.usage_count += 1;
        let selected = record.clone();

        self.persist().await?;
        logi(format!("Selected script #{}: {}", selected.id, selected.verse));
        Ok(Some(selected))
    }

    pub fn stats(&self) -> InventoryStats {
        let total = self.doc.scripts.len();
        let used = self.doc.scripts.iter().filter(|s| s.used).count();
        let unused = total - used;
        let uses: u64 = self.doc.scripts.iter().map(|s| u64::from(s.usage_count)).sum();

        let (usage_percentage, average_uses_per_script) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                used as f64 / total as f64 * 100.0,
                uses as f64 / total as f64,
            )
        };

        InventoryStats {
            total,
            used,
            unused,
            by_source: self.doc.sources.clone(),
            needs_refill: unused <= self.doc.metadata.minimum_threshold as usize,
            usage_percentage,
            average_uses_per_script,
            used_multiple_times: self.doc.scripts.iter().filter(|s| s.usage_count > 1).count(),
            last_batch_generation: self.doc.metadata.last_batch_generation,
        }
    }

    pub fn supply_level(&self) -> SupplyLevel {
        let unused = self.doc.scripts.iter().filter(|s| !s.used).count();
        if unused <= self.doc.metadata.critical_threshold as usize {
            SupplyLevel::Critical
        } else if unused <= self.doc.metadata.minimum_threshold as usize {
            SupplyLevel::Low
        } else {
            SupplyLevel::Ok
        }
    }

    pub fn report(&self, limit: usize) -> InventoryReport {
        let mut most_used: Vec<ScriptRecord> = self
            .doc
            .scripts
            .iter()
            .filter(|s| s.usage_count > 0)
            .cloned()
            .collect();
        most_used.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then(a.id.cmp(&b.id)));
        most_used.truncate(limit);

        let mut recently_used: Vec<ScriptRecord> = self
            .doc
            .scripts
            .iter()
            .filter(|s| s.used_at.is_some())
            .cloned()
            .collect();
        recently_used.sort_by(|a, b| b.used_at.cmp(&a.used_at));
        recently_used.truncate(limit);

        InventoryReport {
            most_used,
            recently_used,
        }
    }

    pub async fn reset_all(&mut self) -> StorageResult<()> {
        for script in &mut self.doc.scripts {
            script.used = false;
            script.used_at = None;
            script.usage_count = 0;
        }
        self.doc.metadata.last_used_index = -1;
        self.persist().await?;
        logok(format!("Reset all {} scripts to unused", self.doc.scripts.len()));
        Ok(())
    }

    /// Generates `count` scripts for random verses. A failed generation is
    /// counted and skipped; only storage failures abort the batch.
    pub async fn replenish(
        &mut self,
        generator: &dyn ScriptGenerator,
        count: u32,
    ) -> StorageResult<BatchSummary> {
        logi(format!("Starting batch generation of {} scripts...", count));
        let mut summary = BatchSummary::default();

        for i in 0..count {
            let reference = random_verse();
            let Some(verse) = VerseRef::parse(reference) else {
                summary.failed += 1;
                summary.errors.push(format!("Script {}: invalid verse format: {}", i + 1, reference));
                continue;
            };

            match generator.generate(&verse).await {
                Ok(script) if script.text.trim().len() > MIN_SCRIPT_CHARS => {
                    self.add_script(reference, &script.text, script.keywords, ScriptSource::Generated)
                        .await?;
                    summary.success += 1;
                }
                Ok(_) => {
                    summary.failed += 1;
                    summary
                        .errors
                        .push(format!("Script {}: generated script too short or empty", i + 1));
                }
                Err(err) => {
                    warn!(verse = reference, error = %err, "Script generation failed");
                    summary.failed += 1;
                    summary.errors.push(format!("Script {}: {}", i + 1, err));
                }
            }
        }

        self.doc.metadata.last_batch_generation = Some(Utc::now());
        self.persist().await?;
        logok(format!(
            "Batch generation complete: {} success, {} failed",
            summary.success, summary.failed
        ));
        Ok(summary)
    }

    /// Replenishes according to the current supply level; `None` when supply is fine.
    pub async fn refill_if_needed(
        &mut self,
        generator: &dyn ScriptGenerator,
        cfg: &InventoryConfig,
    ) -> StorageResult<Option<BatchSummary>> {
        let unused = self.stats().unused;
        let count = match self.supply_level() {
            SupplyLevel::Critical => {
                logw(format!("CRITICAL: only {} scripts left, generating immediately", unused));
                cfg.critical_refill_batch
            }
            SupplyLevel::Low => {
                logw(format!("LOW: only {} scripts left, generating a new batch", unused));
                cfg.refill_batch
            }
            SupplyLevel::Ok => {
                logok(format!("Script supply is good ({} unused scripts)", unused));
                return Ok(None);
            }
        };
        self.replenish(generator, count).await.map(Some)
    }

    /// Writes the current in-memory state.
    pub async fn flush(&self) -> StorageResult<()> {
        self.persist().await
    }

    async fn persist(&self) -> StorageResult<()> {
        store::save(self.store.as_ref(), INVENTORY_KEY, &self.doc).await
    }
}

fn random_verse() -> &'static str {
    VERSES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("John 3:16")
}

/// Minimal content item used when the inventory is exhausted. Not stored.
pub fn fallback_script() -> ScriptRecord {
    ScriptRecord {
        id: 0,
        verse: "John 3:16".to_string(),
        text: "For God so loved the world that he gave his one and only Son, that whoever \
               believes in him shall not perish but have eternal life. No matter what today \
               looks like, you are loved with a love that never lets go."
            .to_string(),
        keywords: vec!["love".to_string(), "hope".to_string(), "sunrise".to_string()],
        source: ScriptSource::Fallback,
        created_at: Utc::now(),
        used: false,
        used_at: None,
        usage_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::HashSet;

    fn cfg() -> InventoryConfig {
        InventoryConfig {
            minimum_threshold: 3,
            critical_threshold: 1,
            ..InventoryConfig::default()
        }
    }

    async fn inventory_with(n: usize) -> ScriptInventory {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut inv = ScriptInventory::load(store, &cfg()).await.unwrap();
        for i in 0..n {
            inv.add_script(&format!("Psalm {}:1", i + 1), &format!("  script {i}  "), vec![], ScriptSource::Manual)
                .await
                .unwrap();
        }
        inv
    }

    #[tokio::test]
    async fn add_assigns_monotonic_ids_and_counts_sources() {
        let mut inv = inventory_with(2).await;
        let third = inv
            .add_script("John 3:16", "text", vec!["love".into()], ScriptSource::Generated)
            .await
            .unwrap();

        assert_eq!(third.id, 3);
        assert_eq!(inv.scripts()[0].text, "script 0");
        assert_eq!(inv.document().metadata.total_generated, 3);
        assert_eq!(inv.document().sources["manual"], 2);
        assert_eq!(inv.document().sources["generated"], 1);
    }

    #[tokio::test]
    async fn consumes_every_script_once_then_returns_none() {
        let mut inv = inventory_with(5).await;
        let mut seen = HashSet::new();

        for _ in 0..5 {
            let record = inv.next_script().await.unwrap().expect("unused script");
            assert!(record.used);
            assert_eq!(record.usage_count, 1);
            assert!(seen.insert(record.id), "script {} returned twice", record.id);
        }

        assert!(inv.scripts().iter().all(|s| s.used && s.used_at.is_some()));
        assert!(inv.next_script().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_reset() {
        let mut inv = inventory_with(2).await;
        inv.reset_all().await.unwrap();
        let next = inv.add_script("Romans 8:28", "text", vec![], ScriptSource::Manual).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn reset_marks_everything_unused() {
        let mut inv = inventory_with(4).await;
        inv.next_script().await.unwrap();
        inv.next_script().await.unwrap();

        inv.reset_all().await.unwrap();
        let stats = inv.stats();

        assert_eq!(stats.used, 0);
        assert_eq!(stats.unused, stats.total);
        assert!(inv.scripts().iter().all(|s| s.usage_count == 0 && s.used_at.is_none()));
        assert_eq!(inv.document().metadata.last_used_index, -1);
    }

    #[tokio::test]
    async fn usage_count_implies_used() {
        let mut inv = inventory_with(3).await;
        inv.next_script().await.unwrap();
        for script in inv.scripts() {
            assert!(script.usage_count == 0 || script.used);
        }
    }

    #[tokio::test]
    async fn supply_level_follows_thresholds() {
        let mut inv = inventory_with(5).await;
        assert_eq!(inv.supply_level(), SupplyLevel::Ok);
        assert!(!inv.stats().needs_refill);

        inv.next_script().await.unwrap();
        inv.next_script().await.unwrap();
        assert_eq!(inv.supply_level(), SupplyLevel::Low);
        assert!(inv.stats().needs_refill);

        inv.next_script().await.unwrap();
        inv.next_script().await.unwrap();
        assert_eq!(inv.supply_level(), SupplyLevel::Critical);
    }

    #[tokio::test]
    async fn stats_are_idempotent() {
        let mut inv = inventory_with(3).await;
        inv.next_script().await.unwrap();
        assert_eq!(inv.stats(), inv.stats());
        assert!((inv.stats().usage_percentage - 33.33).abs() < 0.01);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        {
            let mut inv = ScriptInventory::load(store.clone(), &cfg()).await.unwrap();
            inv.add_script("John 1:1", "a", vec![], ScriptSource::Manual).await.unwrap();
            inv.add_script("John 1:2", "b", vec![], ScriptSource::Manual).await.unwrap();
            inv.next_script().await.unwrap();
        }

        let mut inv = ScriptInventory::load(store, &cfg()).await.unwrap();
        assert_eq!(inv.stats().used, 1);
        let next = inv.next_script().await.unwrap().unwrap();
        assert_eq!(next.verse, "John 1:2");
        assert!(inv.scripts().iter().all(|s| s.used));
    }

    #[tokio::test]
    async fn report_orders_by_usage_and_recency() {
        let mut inv = inventory_with(3).await;
        let t0 = Utc::now();
        let first = inv.next_script_at(t0).await.unwrap().unwrap();
        let second = inv
            .next_script_at(t0 + chrono::Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();

        let report = inv.report(5);
        assert_eq!(report.most_used.len(), 2);
        assert_eq!(report.recently_used[0].id, second.id);
        assert_eq!(report.recently_used[1].id, first.id);
    }

    struct FixedGenerator {
        text: &'static str,
    }

    #[async_trait]
    impl ScriptGenerator for FixedGenerator {
        async fn generate(&self, verse: &VerseRef) -> anyhow::Result<GeneratedScript> {
            Ok(GeneratedScript {
                text: format!("{} {}", verse, self.text),
                keywords: vec!["faith".to_string()],
            })
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ScriptGenerator for FailingGenerator {
        async fn generate(&self, _verse: &VerseRef) -> anyhow::Result<GeneratedScript> {
            anyhow::bail!("model unavailable")
        }
    }

    #[tokio::test]
    async fn replenish_adds_generated_scripts() {
        let mut inv = inventory_with(0).await;
        let generator = FixedGenerator {
            text: "is a promise that carries you through every single hard day you face.",
        };

        let summary = inv.replenish(&generator, 4).await.unwrap();

        assert_eq!(summary.success, 4);
        assert_eq!(inv.stats().total, 4);
        assert_eq!(inv.document().sources["generated"], 4);
        assert!(inv.document().metadata.last_batch_generation.is_some());
    }

    #[tokio::test]
    async fn replenish_counts_short_and_failed_generations() {
        let mut inv = inventory_with(0).await;

        let short = inv.replenish(&FixedGenerator { text: "short" }, 2).await.unwrap();
        assert_eq!(short.failed, 2);

        let failed = inv.replenish(&FailingGenerator, 3).await.unwrap();
        assert_eq!(failed.failed, 3);
        assert_eq!(failed.errors.len(), 3);
        assert_eq!(inv.stats().total, 0);
    }

    #[tokio::test]
    async fn refill_skips_when_supply_is_fine() {
        let mut inv = inventory_with(6).await;
        let result = inv.refill_if_needed(&FailingGenerator, &cfg()).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn parses_verse_references() {
        let v = VerseRef::parse("Proverbs 3:5-6").unwrap();
        assert_eq!(v.book, "Proverbs");
        assert_eq!((v.chapter, v.verse, v.verse_end), (3, 5, Some(6)));
        assert_eq!(v.to_string(), "Proverbs 3:5-6");

        let v = VerseRef::parse("1 John 4:8").unwrap();
        assert_eq!(v.book, "1 John");
        assert!(VerseRef::parse("John").is_none());
        assert!(VERSES.iter().all(|v| VerseRef::parse(v).is_some()));
    }

    #[test]
    fn fallback_script_is_marked_as_fallback() {
        let script = fallback_script();
        assert_eq!(script.source, ScriptSource::Fallback);
        assert!(script.text.len() > MIN_SCRIPT_CHARS);
    }
}
