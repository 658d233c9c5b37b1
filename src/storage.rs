use anyhow::{Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, Row};
use serde_json::json;
use std::path::Path;

use crate::logging::{self, obj, v_str, Domain};
use crate::model::{
    float_to_count, parse_collected_at, parse_count, Counters, Metric, NewSnapshot,
    RawSnapshot, SnapshotId,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        indv_reg_users BIGINT NOT NULL,
        e_verified_returns BIGINT NOT NULL,
        total_aadhar_linked_pan BIGINT NOT NULL,
        total_processed_refund BIGINT NOT NULL,
        provider_last_updated_raw VARCHAR(64),
        collected_at DATETIME NOT NULL,
        collected_date VARCHAR(10) NOT NULL
    );
    CREATE INDEX IF NOT EXISTS ix_snapshots_collected_at ON snapshots (collected_at);
    CREATE INDEX IF NOT EXISTS ix_snapshots_collected_date ON snapshots (collected_date);";

/// Append-only snapshot table in a single SQLite file.
pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    /// Opens (creating parent directories if needed) and ensures the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening store {}", path.display()))?;
        let mut store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self { conn: Connection::open_in_memory()? };
        store.init()?;
        Ok(store)
    }

    /// Idempotent.
    pub fn init(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(SCHEMA).context("creating snapshot schema")?;
        tx.commit()?;
        Ok(())
    }

    pub fn append(&mut self, snap: &NewSnapshot) -> Result<SnapshotId> {
        let tx = self.conn.transaction()?;
        let c = &snap.counters;
        tx.execute(
            "INSERT INTO snapshots (
                indv_reg_users, e_verified_returns, total_aadhar_linked_pan,
                total_processed_refund, provider_last_updated_raw, collected_at, collected_date
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_sql_count(c.indv_reg_users)?,
                to_sql_count(c.e_verified_returns)?,
                to_sql_count(c.total_aadhar_linked_pan)?,
                to_sql_count(c.total_processed_refund)?,
                snap.provider_last_updated_raw,
                snap.collected_at_text(),
                snap.collected_date,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        logging::info(
            Domain::Store,
            "append",
            obj(&[
                ("snapshot_id", json!(id)),
                (
                    "provider_date",
                    snap.provider_last_updated_raw.as_deref().map(v_str).unwrap_or_default(),
                ),
                ("collected_at", v_str(&snap.collected_at_text())),
            ]),
        );
        Ok(id)
    }

    /// Every snapshot in insertion order.
    pub fn query_all(&mut self) -> Result<Vec<RawSnapshot>> {
        let tx = self.conn.transaction()?;
        let rows = {
            let mut stmt = tx.prepare(
                "SELECT id, indv_reg_users, e_verified_returns, total_aadhar_linked_pan,
                        total_processed_refund, provider_last_updated_raw, collected_at, collected_date
                 FROM snapshots ORDER BY id ASC",
            )?;
            let mapped = stmt.query_map([], read_row)?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        logging::debug(Domain::Store, "query_all", obj(&[("rows", json!(rows.len()))]));
        Ok(rows)
    }

    /// Raw text of the most recent `collected_at`, if any rows exist.
    ///
    /// Rows are compared by parsed instant, so a row written in RFC3339 form
    /// orders correctly against the fixed-width form `append` writes. When no
    /// row parses, the text maximum is returned unparsed and the caller
    /// decides how to treat it.
    pub fn query_latest_collected_at(&mut self) -> Result<Option<String>> {
        let tx = self.conn.transaction()?;
        let cells = {
            let mut stmt = tx.prepare("SELECT collected_at FROM snapshots")?;
            let mapped = stmt.query_map([], |r| r.get::<_, SqlValue>(0))?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        let texts: Vec<String> = cells.into_iter().filter_map(text_cell).collect();
        let latest = texts
            .iter()
            .filter_map(|s| parse_collected_at(s).map(|ts| (ts, s)))
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, s)| s.clone())
            .or_else(|| texts.iter().max().cloned());
        Ok(latest)
    }

    pub fn count(&mut self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn to_sql_count(v: u64) -> Result<i64> {
    i64::try_from(v).with_context(|| format!("count {} exceeds storage range", v))
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawSnapshot> {
    let mut cells = [None; 4];
    for metric in Metric::ALL {
        let v: SqlValue = row.get(metric.column())?;
        cells[metric.index()] = count_cell(&v);
    }
    let provider: SqlValue = row.get("provider_last_updated_raw")?;
    let collected_at: SqlValue = row.get("collected_at")?;
    let collected_date: SqlValue = row.get("collected_date")?;

    Ok(RawSnapshot {
        id: row.get("id")?,
        counters: Counters::from_fn(|m| cells[m.index()]),
        provider_last_updated_raw: text_cell(provider).filter(|s| !s.trim().is_empty()),
        collected_at: text_cell(collected_at).and_then(|s| parse_collected_at(&s)),
        collected_date: text_cell(collected_date).unwrap_or_default(),
    })
}

fn count_cell(v: &SqlValue) -> Option<u64> {
    match v {
        SqlValue::Integer(i) => u64::try_from(*i).ok(),
        SqlValue::Real(f) => float_to_count(*f),
        SqlValue::Text(s) => parse_count(s),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}

fn text_cell(v: SqlValue) -> Option<String> {
    match v {
        SqlValue::Text(s) => Some(s),
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}
