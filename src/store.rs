//! SQLite-backed orbit record store.
//!
//! Single-table persistence keyed by catalog id. Batch writes run in one
//! transaction so a failed import never leaves a partial batch behind.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::info;

use crate::error::TrackerError;

/// Persisted element set plus identifying metadata
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitRecord {
    pub catalog_id: i64,
    pub name: String,
    pub epoch: DateTime<Utc>,
    pub line1: String,
    pub line2: String,
    pub last_updated: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS satellite (
    catalog_id   INTEGER PRIMARY KEY,
    name         TEXT NOT NULL,
    epoch        TEXT NOT NULL,
    line1        TEXT NOT NULL,
    line2        TEXT NOT NULL,
    last_updated TEXT NOT NULL
);
";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if necessary) a file-backed store.
    pub fn open(path: &str) -> Result<Self, TrackerError> {
        info!("opening satellite store at {}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    /// Open a fresh in-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, TrackerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    /// Load every record in store iteration order.
    pub fn load_all(&self) -> Result<Vec<OrbitRecord>, TrackerError> {
        let mut stmt = self.conn.prepare(
            "SELECT catalog_id, name, epoch, line1, line2, last_updated FROM satellite",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Write a batch, replacing any existing record with the same catalog
    /// id. The whole batch commits as a single transaction: on error
    /// nothing is written. Returns the number of records written.
    pub fn upsert_batch(&mut self, records: &[OrbitRecord]) -> Result<usize, TrackerError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO satellite (catalog_id, name, epoch, line1, line2, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(catalog_id) DO UPDATE SET
                     name = excluded.name,
                     epoch = excluded.epoch,
                     line1 = excluded.line1,
                     line2 = excluded.line2,
                     last_updated = excluded.last_updated",
            )?;
            for record in records {
                stmt.execute(params![
                    record.catalog_id,
                    record.name,
                    record.epoch.to_rfc3339(),
                    record.line1,
                    record.line2,
                    record.last_updated.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        info!("{} satellites saved to store", records.len());
        Ok(records.len())
    }

    /// Fetch only the records whose catalog id appears in `ids`.
    pub fn filter_by_ids(&self, ids: &[i64]) -> Result<Vec<OrbitRecord>, TrackerError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT catalog_id, name, epoch, line1, line2, last_updated
             FROM satellite WHERE catalog_id IN ({})",
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Remove every record. Irreversible.
    pub fn delete_all(&mut self) -> Result<(), TrackerError> {
        info!("deleting all satellites");
        self.conn.execute("DELETE FROM satellite", [])?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<OrbitRecord> {
    Ok(OrbitRecord {
        catalog_id: row.get(0)?,
        name: row.get(1)?,
        epoch: parse_timestamp(row, 2)?,
        line1: row.get(3)?,
        line2: row.get(4)?,
        last_updated: parse_timestamp(row, 5)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
