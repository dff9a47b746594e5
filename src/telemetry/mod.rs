//! Gap telemetry: records every escalation so the foods the local model
//! could not identify can be exported and used to prioritize retraining.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{FallbackLogEntry, FallbackReason};

/// Aggregate report over recorded escalations.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySummary {
    pub total_count: u64,
    /// Food name -> escalation count, ordered by count descending.
    pub per_food_counts: Vec<(String, u64)>,
    /// Fallback reason -> escalation count, ordered by count descending.
    pub per_reason_counts: Vec<(FallbackReason, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub timestamp: DateTime<Utc>,
    pub food_name: String,
    pub local_prediction: Option<String>,
    pub local_confidence: f32,
    pub fallback_reason: FallbackReason,
    pub image_ref: Option<String>,
}

/// One serialized export batch. Entries included here have been marked
/// exported in the store and will not appear in the next batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBatch {
    pub batch_id: Uuid,
    pub export_date: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_entries: usize,
    pub entries: Vec<ExportedEntry>,
}

impl ExportBatch {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct GapTelemetry {
    db: Database,
    dropped_writes: AtomicU64,
}

impl GapTelemetry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            dropped_writes: AtomicU64::new(0),
        }
    }

    /// Append-only insert. Failures never reach the caller; they are counted
    /// and logged so detection availability is unaffected.
    pub async fn record(&self, entry: FallbackLogEntry) {
        if let Err(err) = self.db.insert_fallback_entry(&entry).await {
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            warn!(
                "dropped fallback telemetry entry for '{}': {err:?}",
                entry.food_name_from_remote
            );
        }
    }

    /// How many telemetry writes have been swallowed since startup.
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    /// Raw entries at or after `since`, oldest first, regardless of export
    /// state.
    pub async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<FallbackLogEntry>> {
        self.db.fallback_entries_since(since).await
    }

    pub async fn summarize(&self, since: DateTime<Utc>) -> Result<TelemetrySummary> {
        let (total_count, per_food_counts, raw_reasons) =
            self.db.fallback_counts_since(since).await?;

        let per_reason_counts = raw_reasons
            .into_iter()
            .filter_map(|(reason, count)| {
                FallbackReason::from_str(&reason).map(|parsed| (parsed, count))
            })
            .collect();

        Ok(TelemetrySummary {
            total_count,
            per_food_counts,
            per_reason_counts,
        })
    }

    /// Export all un-exported entries at or after `since`. Incremental:
    /// entries returned here are marked exported and excluded from the next
    /// call, while date-ranged summaries still see them.
    pub async fn export(&self, since: DateTime<Utc>) -> Result<ExportBatch> {
        let period_end = Utc::now();
        let entries = self.db.take_unexported_since(since).await?;

        let exported: Vec<ExportedEntry> = entries
            .into_iter()
            .map(|entry| ExportedEntry {
                timestamp: entry.timestamp,
                food_name: entry.food_name_from_remote,
                local_prediction: entry.local_top_label,
                local_confidence: entry.local_top_confidence,
                fallback_reason: entry.reason,
                image_ref: entry.image_ref,
            })
            .collect();

        Ok(ExportBatch {
            batch_id: Uuid::new_v4(),
            export_date: period_end,
            period_start: since,
            period_end,
            total_entries: exported.len(),
            entries: exported,
        })
    }

    /// Delete entries older than `older_than` that have already been
    /// exported. Un-exported data survives regardless of age.
    pub async fn purge(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.db.purge_exported_before(older_than).await
    }

    /// Apply the configured retention window.
    pub async fn purge_expired(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        self.purge(cutoff).await
    }
}
