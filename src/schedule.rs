//! Missed-slot detection against a fixed daily upload schedule.

use crate::error::StorageResult;
use crate::logi;
use crate::store::{self, DocumentStore};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const SCHEDULE_KEY: &str = "upload_schedule";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub last_check_time: Option<DateTime<Utc>>,
    pub schedule: Vec<u8>,
}

/// Every `hour:00` instant strictly between `last` and `now`, walking the
/// calendar days of `now`'s timezone. Local times that do not exist (DST gaps)
/// are skipped.
pub fn find_missed_slots<Tz: TimeZone>(
    hours: &[u8],
    last: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> Vec<DateTime<Tz>> {
    let tz = now.timezone();
    let last = last.with_timezone(&tz);
    let end = now.date_naive();

    let mut slots = Vec::new();
    let mut day = last.date_naive();
    while day <= end {
        for &hour in hours {
            let Some(naive) = day.and_hms_opt(u32::from(hour), 0, 0) else {
                continue;
            };
            let Some(slot) = tz.from_local_datetime(&naive).earliest() else {
                continue;
            };
            if slot > last && slot < *now {
                slots.push(slot);
            }
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    slots
}

pub struct MissedSlotDetector {
    store: Arc<dyn DocumentStore>,
    hours: Vec<u8>,
}

impl MissedSlotDetector {
    /// `hours` must already be validated (0-23, sorted).
    pub fn new(store: Arc<dyn DocumentStore>, hours: Vec<u8>) -> Self {
        Self { store, hours }
    }

    pub fn hours(&self) -> &[u8] {
        &self.hours
    }

    /// Last recorded check; a missing or unreadable schedule file reads as `None`.
    pub async fn last_check_time(&self) -> StorageResult<Option<DateTime<Utc>>> {
        match store::load::<ScheduleState>(self.store.as_ref(), SCHEDULE_KEY).await {
            Ok(state) => Ok(state.and_then(|s| s.last_check_time)),
            Err(err) if err.is_malformed() => {
                warn!(error = %err, "Schedule file is malformed; treating as first run");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Returns the slots missed since the previous check and records `now` as
    /// the new baseline, whether or not anything was missed. The first run
    /// only records the baseline.
    pub async fn check<Tz: TimeZone>(&self, now: DateTime<Tz>) -> StorageResult<Vec<DateTime<Utc>>> {
        let now_utc = now.with_timezone(&Utc);
        let slots = match self.last_check_time().await? {
            None => {
                logi("First run - no missed uploads to check");
                Vec::new()
            }
            Some(last) => find_missed_slots(&self.hours, &last.with_timezone(&now.timezone()), &now)
                .into_iter()
                .map(|slot| slot.with_timezone(&Utc))
                .collect(),
        };

        let state = ScheduleState {
            last_check_time: Some(now_utc),
            schedule: self.hours.clone(),
        };
        store::save(self.store.as_ref(), SCHEDULE_KEY, &state).await?;

        if slots.is_empty() {
            info!("No missed uploads found");
        } else {
            info!(missed = slots.len(), "Found missed upload slots");
        }
        Ok(slots)
    }
}
