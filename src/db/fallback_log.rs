use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{parse_datetime, Database};
use crate::models::{FallbackLogEntry, FallbackReason};

fn entry_from_row(row: &Row<'_>) -> Result<FallbackLogEntry> {
    let reason_str: String = row.get(5)?;
    let reason = FallbackReason::from_str(&reason_str)
        .ok_or_else(|| anyhow!("unknown fallback reason '{reason_str}'"))?;

    Ok(FallbackLogEntry {
        id: Some(row.get::<_, i64>(0)?),
        timestamp: parse_datetime(&row.get::<_, String>(1)?)?,
        food_name_from_remote: row.get(2)?,
        local_top_label: row.get(3)?,
        local_top_confidence: row.get::<_, f64>(4)? as f32,
        reason,
        image_ref: row.get(6)?,
        exported: row.get::<_, i64>(7)? != 0,
    })
}

impl Database {
    pub async fn insert_fallback_entry(&self, entry: &FallbackLogEntry) -> Result<i64> {
        let record = entry.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO fallback_log (
                    timestamp,
                    food_name,
                    local_top_label,
                    local_top_confidence,
                    reason,
                    image_ref,
                    exported
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.timestamp.to_rfc3339(),
                    record.food_name_from_remote,
                    record.local_top_label,
                    f64::from(record.local_top_confidence),
                    record.reason.as_str(),
                    record.image_ref,
                    i64::from(record.exported),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn fallback_entries_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<FallbackLogEntry>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, food_name, local_top_label, local_top_confidence,
                        reason, image_ref, exported
                 FROM fallback_log
                 WHERE timestamp >= ?1
                 ORDER BY timestamp ASC",
            )?;

            let mut rows = stmt.query(params![since.to_rfc3339()])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(entry_from_row(row)?);
            }

            Ok(entries)
        })
        .await
    }

    /// Counts for the summary report: total, per food name descending, and
    /// per reason descending. Includes already-exported entries.
    pub async fn fallback_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(u64, Vec<(String, u64)>, Vec<(String, u64)>)> {
        self.execute(move |conn| {
            let cutoff = since.to_rfc3339();

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM fallback_log WHERE timestamp >= ?1",
                params![cutoff],
                |row| row.get(0),
            )?;

            let mut per_food = Vec::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT food_name, COUNT(*) AS n
                     FROM fallback_log
                     WHERE timestamp >= ?1
                     GROUP BY food_name
                     ORDER BY n DESC, food_name ASC",
                )?;
                let mut rows = stmt.query(params![cutoff.clone()])?;
                while let Some(row) = rows.next()? {
                    per_food.push((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64));
                }
            }

            let mut per_reason = Vec::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT reason, COUNT(*) AS n
                     FROM fallback_log
                     WHERE timestamp >= ?1
                     GROUP BY reason
                     ORDER BY n DESC, reason ASC",
                )?;
                let mut rows = stmt.query(params![cutoff])?;
                while let Some(row) = rows.next()? {
                    per_reason.push((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64));
                }
            }

            Ok((total as u64, per_food, per_reason))
        })
        .await
    }

    /// Read all un-exported entries at or after `since` and mark them
    /// exported in the same transaction, so a repeated export returns
    /// nothing new.
    pub async fn take_unexported_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<FallbackLogEntry>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut entries = Vec::new();

            {
                let mut stmt = tx.prepare(
                    "SELECT id, timestamp, food_name, local_top_label, local_top_confidence,
                            reason, image_ref, exported
                     FROM fallback_log
                     WHERE timestamp >= ?1 AND exported = 0
                     ORDER BY timestamp ASC",
                )?;

                let mut rows = stmt.query(params![since.to_rfc3339()])?;
                while let Some(row) = rows.next()? {
                    entries.push(entry_from_row(row)?);
                }
            }

            for entry in &mut entries {
                let id = entry
                    .id
                    .ok_or_else(|| anyhow!("fallback entry missing row id"))?;
                tx.execute(
                    "UPDATE fallback_log SET exported = 1 WHERE id = ?1",
                    params![id],
                )?;
                entry.exported = true;
            }

            tx.commit()?;
            Ok(entries)
        })
        .await
    }

    /// Delete entries that are older than `cutoff` AND already exported.
    /// Un-exported entries are never deleted regardless of age.
    pub async fn purge_exported_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM fallback_log WHERE timestamp < ?1 AND exported = 1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(deleted)
        })
        .await
    }
}
