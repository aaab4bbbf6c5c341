//! Durable relational store for grid telemetry.
//!
//! SQLite-backed, WAL mode, one table per telemetry domain plus the
//! tenant registry. Primary keys are the natural keys of each domain
//! (the comparable fields minus the score), which is what makes repair
//! insertion idempotent: `INSERT OR IGNORE` no-ops on a rerun.

use crate::recon::canonical::{BreakerEvent, HfReading, MeterEvent, OutageTicket};
use crate::recon::canonical::canonical_timestamp;
use crate::recon::domain::Domain;
use crate::recon::window::ReconWindow;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS tenant (
    id INTEGER PRIMARY KEY,
    uid TEXT NOT NULL UNIQUE,
    name TEXT,
    created_utc TEXT,
    updated_utc TEXT,
    timezone TEXT
);

CREATE TABLE IF NOT EXISTS breaker_events (
    feeder_id TEXT NOT NULL,
    value TEXT NOT NULL,
    timestamp_utc TEXT NOT NULL,
    score INTEGER NOT NULL,
    tenant_id INTEGER NOT NULL,
    PRIMARY KEY (feeder_id, value, timestamp_utc, tenant_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_breaker_events_score
    ON breaker_events(tenant_id, score);

CREATE TABLE IF NOT EXISTS meter_events (
    feeder_id TEXT NOT NULL,
    meter_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    timestamp_utc TEXT NOT NULL,
    score INTEGER NOT NULL,
    tenant_id INTEGER NOT NULL,
    PRIMARY KEY (feeder_id, meter_id, event_id, timestamp_utc, tenant_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_meter_events_score
    ON meter_events(tenant_id, score);

CREATE TABLE IF NOT EXISTS hf_readings (
    feeder_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    timestamp_utc TEXT NOT NULL,
    value REAL NOT NULL,
    value_string TEXT NOT NULL,
    status TEXT NOT NULL,
    score INTEGER NOT NULL,
    tenant_id INTEGER NOT NULL,
    PRIMARY KEY (feeder_id, channel_id, timestamp_utc, value_string, status, tenant_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_hf_readings_score
    ON hf_readings(tenant_id, score);

CREATE TABLE IF NOT EXISTS outage_tickets (
    feeder_id TEXT NOT NULL,
    warehouse_ticket_id TEXT NOT NULL,
    trouble_ticket_id TEXT NOT NULL,
    interruption_type TEXT NOT NULL,
    interruption_cause TEXT NOT NULL,
    support_code TEXT NOT NULL,
    customer_minutes REAL NOT NULL,
    power_off_utc TEXT NOT NULL,
    power_restore_utc TEXT NOT NULL,
    repair_action_type TEXT NOT NULL,
    repair_action_description TEXT NOT NULL,
    score INTEGER NOT NULL,
    tenant_id INTEGER NOT NULL,
    PRIMARY KEY (feeder_id, warehouse_ticket_id, trouble_ticket_id, power_off_utc, tenant_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_outage_tickets_score
    ON outage_tickets(tenant_id, score);
"#;

/// Handle to the durable telemetry store.
pub struct TelemetryDb {
    conn: Arc<Mutex<Connection>>,
}

impl TelemetryDb {
    /// Open (or create) the store at `db_path`. `:memory:` works for tests.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        // In-memory databases report "memory"; only warn on real files.
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Telemetry database initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register (or refresh) a tenant. Used by operational seeding and tests.
    pub fn upsert_tenant(&self, tenant_id: i64, uid: &str, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tenant (id, uid, name, created_utc, updated_utc, timezone)
             VALUES (?1, ?2, ?3, datetime('now'), datetime('now'), 'UTC')
             ON CONFLICT(id) DO UPDATE SET
                uid=excluded.uid,
                name=excluded.name,
                updated_utc=excluded.updated_utc",
            params![tenant_id, uid, name],
        )?;
        Ok(())
    }

    /// Resolve the tenant uid used as the cache namespace prefix.
    pub fn tenant_uid(&self, tenant_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT uid FROM tenant WHERE id = ?1")?;
        let mut rows = stmt.query([tenant_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(row.get(0)?))
    }

    /// Row count for one domain table (diagnostics and tests).
    pub fn count(&self, domain: Domain, tenant_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE tenant_id = ?1",
            domain.table()
        );
        let count = conn.query_row(&sql, [tenant_id], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Windowed reads
    // ========================================================================

    pub fn fetch_breaker_window(
        &self,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<BreakerEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT feeder_id, value, timestamp_utc, score, tenant_id
             FROM breaker_events
             WHERE score BETWEEN ?1 AND ?2 AND tenant_id = ?3
             ORDER BY score, feeder_id",
        )?;

        let rows = stmt
            .query_map(
                params![window.start_score, window.end_score, tenant_id],
                Self::row_to_breaker,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn fetch_meter_window(
        &self,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<MeterEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT feeder_id, meter_id, event_id, timestamp_utc, score, tenant_id
             FROM meter_events
             WHERE score BETWEEN ?1 AND ?2 AND tenant_id = ?3
             ORDER BY score, feeder_id",
        )?;

        let rows = stmt
            .query_map(
                params![window.start_score, window.end_score, tenant_id],
                Self::row_to_meter,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn fetch_hf_window(
        &self,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<HfReading>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT feeder_id, channel_id, timestamp_utc, value, value_string, status, score, tenant_id
             FROM hf_readings
             WHERE score BETWEEN ?1 AND ?2 AND tenant_id = ?3
             ORDER BY score, feeder_id",
        )?;

        let rows = stmt
            .query_map(
                params![window.start_score, window.end_score, tenant_id],
                Self::row_to_hf,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn fetch_ticket_window(
        &self,
        window: &ReconWindow,
        tenant_id: i64,
    ) -> Result<Vec<OutageTicket>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT feeder_id, warehouse_ticket_id, trouble_ticket_id, interruption_type,
                    interruption_cause, support_code, customer_minutes, power_off_utc,
                    power_restore_utc, repair_action_type, repair_action_description,
                    score, tenant_id
             FROM outage_tickets
             WHERE score BETWEEN ?1 AND ?2 AND tenant_id = ?3
             ORDER BY score, feeder_id",
        )?;

        let rows = stmt
            .query_map(
                params![window.start_score, window.end_score, tenant_id],
                Self::row_to_ticket,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // Idempotent batch inserts (durable-ward repair)
    // ========================================================================

    pub fn insert_breaker_batch(&self, rows: &[BreakerEvent]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let mut inserted = 0usize;
        let result: Result<()> = (|| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO breaker_events
                 (feeder_id, value, timestamp_utc, score, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.feeder_id,
                    row.value,
                    row.timestamp_utc,
                    row.score,
                    row.tenant_id,
                ])?;
            }
            Ok(())
        })();

        finish_batch(&conn, result)?;
        debug!("📦 Batch inserted {} breaker events", inserted);
        Ok(inserted)
    }

    pub fn insert_meter_batch(&self, rows: &[MeterEvent]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let mut inserted = 0usize;
        let result: Result<()> = (|| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO meter_events
                 (feeder_id, meter_id, event_id, timestamp_utc, score, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.feeder_id,
                    row.meter_id,
                    row.event_id,
                    row.timestamp_utc,
                    row.score,
                    row.tenant_id,
                ])?;
            }
            Ok(())
        })();

        finish_batch(&conn, result)?;
        debug!("📦 Batch inserted {} meter events", inserted);
        Ok(inserted)
    }

    pub fn insert_hf_batch(&self, rows: &[HfReading]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let mut inserted = 0usize;
        let result: Result<()> = (|| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO hf_readings
                 (feeder_id, channel_id, timestamp_utc, value, value_string, status, score, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.feeder_id,
                    row.channel_id,
                    row.timestamp_utc,
                    row.value,
                    row.value_string,
                    row.status,
                    row.score,
                    row.tenant_id,
                ])?;
            }
            Ok(())
        })();

        finish_batch(&conn, result)?;
        debug!("📦 Batch inserted {} hf readings", inserted);
        Ok(inserted)
    }

    pub fn insert_ticket_batch(&self, rows: &[OutageTicket]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let mut inserted = 0usize;
        let result: Result<()> = (|| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO outage_tickets
                 (feeder_id, warehouse_ticket_id, trouble_ticket_id, interruption_type,
                  interruption_cause, support_code, customer_minutes, power_off_utc,
                  power_restore_utc, repair_action_type, repair_action_description,
                  score, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.feeder_id,
                    row.warehouse_ticket_id,
                    row.trouble_ticket_id,
                    row.interruption_type,
                    row.interruption_cause,
                    row.support_code,
                    row.customer_minutes,
                    row.power_off_utc,
                    row.power_restore_utc,
                    row.repair_action_type,
                    row.repair_action_description,
                    row.score,
                    row.tenant_id,
                ])?;
            }
            Ok(())
        })();

        finish_batch(&conn, result)?;
        debug!("📦 Batch inserted {} outage tickets", inserted);
        Ok(inserted)
    }

    // ========================================================================
    // Row mappers
    // ========================================================================

    fn row_to_breaker(row: &rusqlite::Row) -> rusqlite::Result<BreakerEvent> {
        let raw_ts: String = row.get(2)?;
        Ok(BreakerEvent {
            feeder_id: row.get(0)?,
            value: row.get(1)?,
            timestamp_utc: normalize_ts(&raw_ts)?,
            score: row.get(3)?,
            tenant_id: row.get(4)?,
        })
    }

    fn row_to_meter(row: &rusqlite::Row) -> rusqlite::Result<MeterEvent> {
        let raw_ts: String = row.get(3)?;
        Ok(MeterEvent {
            feeder_id: row.get(0)?,
            meter_id: row.get(1)?,
            event_id: row.get(2)?,
            timestamp_utc: normalize_ts(&raw_ts)?,
            score: row.get(4)?,
            tenant_id: row.get(5)?,
        })
    }

    fn row_to_hf(row: &rusqlite::Row) -> rusqlite::Result<HfReading> {
        let raw_ts: String = row.get(2)?;
        Ok(HfReading {
            feeder_id: row.get(0)?,
            channel_id: row.get(1)?,
            timestamp_utc: normalize_ts(&raw_ts)?,
            value: row.get(3)?,
            value_string: row.get(4)?,
            status: row.get(5)?,
            score: row.get(6)?,
            tenant_id: row.get(7)?,
        })
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<OutageTicket> {
        let power_off: String = row.get(7)?;
        let power_restore: String = row.get(8)?;
        Ok(OutageTicket {
            feeder_id: row.get(0)?,
            warehouse_ticket_id: row.get(1)?,
            trouble_ticket_id: row.get(2)?,
            interruption_type: row.get(3)?,
            interruption_cause: row.get(4)?,
            support_code: row.get(5)?,
            customer_minutes: row.get(6)?,
            power_off_utc: normalize_ts(&power_off)?,
            power_restore_utc: normalize_ts(&power_restore)?,
            repair_action_type: row.get(9)?,
            repair_action_description: row.get(10)?,
            score: row.get(11)?,
            tenant_id: row.get(12)?,
        })
    }
}

/// Commit on success, roll back on failure, surfacing the original error.
fn finish_batch(conn: &Connection, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            conn.execute("ROLLBACK", []).ok();
            Err(e)
        }
    }
}

/// Stored timestamps are canonical already; re-normalizing on read keeps
/// the canonicalization contract even for rows written by other tools.
fn normalize_ts(raw: &str) -> rusqlite::Result<String> {
    canonical_timestamp(raw).map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncSettings;
    use chrono::{TimeZone, Utc};

    fn test_db() -> TelemetryDb {
        let db = TelemetryDb::open(":memory:").expect("Failed to create database");
        db.upsert_tenant(1, "FPL", "Test Utility").expect("tenant");
        db
    }

    fn breaker(feeder: &str, ts: &str, score: i64) -> BreakerEvent {
        BreakerEvent {
            feeder_id: feeder.to_string(),
            value: "OPEN".to_string(),
            timestamp_utc: ts.to_string(),
            score,
            tenant_id: 1,
        }
    }

    #[test]
    fn tenant_uid_resolves() {
        let db = test_db();
        assert_eq!(db.tenant_uid(1).unwrap(), Some("FPL".to_string()));
        assert_eq!(db.tenant_uid(2).unwrap(), None);
    }

    #[test]
    fn insert_is_idempotent_on_the_natural_key() {
        let db = test_db();
        let row = breaker("42", "2024-01-01 00:00:05", 1704067205);

        assert_eq!(db.insert_breaker_batch(&[row.clone()]).unwrap(), 1);
        // Same natural key again: ignored.
        assert_eq!(db.insert_breaker_batch(&[row]).unwrap(), 0);
        assert_eq!(db.count(Domain::BreakerEvents, 1).unwrap(), 1);
    }

    #[test]
    fn window_fetch_filters_on_score_and_tenant() {
        let db = test_db();
        db.upsert_tenant(2, "OTHER", "Other Utility").unwrap();

        db.insert_breaker_batch(&[
            breaker("1", "2024-01-01 00:00:01", 1704067201),
            breaker("2", "2024-01-01 00:00:02", 1704067202),
        ])
        .unwrap();
        let mut foreign = breaker("3", "2024-01-01 00:00:01", 1704067201);
        foreign.tenant_id = 2;
        db.insert_breaker_batch(&[foreign]).unwrap();

        let settings = SyncSettings::default();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let window = ReconWindow::for_domain(Domain::BreakerEvents, now, &settings);

        let rows = db.fetch_breaker_window(&window, 1).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.tenant_id == 1));

        // Out-of-window rows are excluded.
        let narrow = ReconWindow {
            start_score: 1704067202,
            end_score: 1704067202,
        };
        let rows = db.fetch_breaker_window(&narrow, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feeder_id, "2");
    }

    #[test]
    fn hf_round_trips_float_values_exactly() {
        let db = test_db();
        let reading = HfReading {
            feeder_id: "9".to_string(),
            channel_id: "CH1".to_string(),
            timestamp_utc: "2024-01-01 00:00:01".to_string(),
            value: 0.1 + 0.2, // not representable as a short decimal
            value_string: "0.3".to_string(),
            status: "OK".to_string(),
            score: 1704067201,
            tenant_id: 1,
        };
        db.insert_hf_batch(&[reading.clone()]).unwrap();

        let window = ReconWindow {
            start_score: 1704067200,
            end_score: 1704067210,
        };
        let rows = db.fetch_hf_window(&window, 1).unwrap();
        assert_eq!(rows[0].value.to_bits(), reading.value.to_bits());
    }

    #[test]
    fn ticket_batch_round_trips() {
        let db = test_db();
        let ticket = OutageTicket {
            feeder_id: "7".to_string(),
            warehouse_ticket_id: "W1".to_string(),
            trouble_ticket_id: "T1".to_string(),
            interruption_type: "OCR".to_string(),
            interruption_cause: "STORM".to_string(),
            support_code: "S".to_string(),
            customer_minutes: 125.5,
            power_off_utc: "2023-11-14 22:13:20".to_string(),
            power_restore_utc: "2023-11-14 23:13:20".to_string(),
            repair_action_type: "REPLACE".to_string(),
            repair_action_description: "fuse".to_string(),
            score: 1700000000,
            tenant_id: 1,
        };
        db.insert_ticket_batch(&[ticket.clone()]).unwrap();

        let window = ReconWindow {
            start_score: 1700000000,
            end_score: 1700000001,
        };
        let rows = db.fetch_ticket_window(&window, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], ticket);
    }
}
