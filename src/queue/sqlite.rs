//! SQLite-backed reading queue
//!
//! The table layout is shared with the acquisition process, so column names
//! follow its schema rather than Rust naming.

use super::{QueueError, QueueResult, ReadingQueue};
use crate::protocol::{NewReading, PowerStatus, Reading};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sensor_readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        acVoltage INTEGER NOT NULL,
        acStatus INTEGER NOT NULL,
        upsVoltage INTEGER NOT NULL,
        upsStatus INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sensor_readings_timestamp ON sensor_readings(timestamp, id);
";

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, acVoltage, acStatus, upsVoltage, upsStatus FROM sensor_readings";

/// Reading queue stored in a SQLite database file
pub struct SqliteQueue {
    conn: Mutex<Connection>,
}

impl SqliteQueue {
    /// Open the queue at the given path, creating the file and table if needed.
    ///
    /// `busy_timeout` bounds how long an operation waits on a lock held by the
    /// acquisition process.
    pub fn open(path: &Path, busy_timeout: Duration) -> QueueResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened reading queue at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory queue for testing
    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| QueueError::LockPoisoned)
    }
}

/// Row values as stored, before status codes are checked
struct RawRow {
    id: i64,
    timestamp: i64,
    ac_voltage: i64,
    ac_status: i64,
    ups_voltage: i64,
    ups_status: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            ac_voltage: row.get(2)?,
            ac_status: row.get(3)?,
            ups_voltage: row.get(4)?,
            ups_status: row.get(5)?,
        })
    }

    fn into_reading(self) -> QueueResult<Reading> {
        let ac_status = PowerStatus::from_code(self.ac_status)
            .map_err(|e| QueueError::InvalidData(format!("reading {}: {e}", self.id)))?;
        let ups_status = PowerStatus::from_code(self.ups_status)
            .map_err(|e| QueueError::InvalidData(format!("reading {}: {e}", self.id)))?;

        Ok(Reading {
            id: self.id,
            timestamp: self.timestamp,
            ac_voltage: self.ac_voltage,
            ac_status,
            ups_voltage: self.ups_voltage,
            ups_status,
        })
    }
}

impl ReadingQueue for SqliteQueue {
    fn dequeue_oldest(&self) -> QueueResult<Option<Reading>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, id ASC LIMIT 1"),
                [],
                RawRow::from_row,
            )
            .optional()?;
        drop(conn);

        raw.map(RawRow::into_reading).transpose()
    }

    fn delete_by_id(&self, id: i64) -> QueueResult<()> {
        let conn = self.lock()?;
        let count = conn.execute("DELETE FROM sensor_readings WHERE id = ?1", params![id])?;
        if count == 0 {
            debug!(reading_id = id, "Reading already absent from queue");
        }
        Ok(())
    }

    fn enqueue(&self, reading: &NewReading) -> QueueResult<Reading> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sensor_readings (timestamp, acVoltage, acStatus, upsVoltage, upsStatus)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reading.timestamp,
                reading.ac_voltage,
                reading.ac_status.code(),
                reading.ups_voltage,
                reading.ups_status.code(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(reading.clone().with_id(id))
    }

    fn pending_count(&self) -> QueueResult<u64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn peek(&self, limit: usize) -> QueueResult<Vec<Reading>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY timestamp ASC, id ASC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(RawRow::into_reading).collect()
    }
}
