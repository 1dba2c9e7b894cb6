//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Format used for every timestamp the service writes.
const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Failure reason for reports whose job did not survive the process.
pub const INTERRUPTED_REASON: &str = "interrupted before completion";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("report {0} is not running")]
    NotRunning(String),
    #[error("invalid report status: {0}")]
    InvalidStatus(String),
    #[error("malformed row: {0}")]
    Malformed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;

        // Jobs live only in memory, so nothing left Running can still finish.
        let interrupted = store.fail_running_reports(Utc::now())?;
        if interrupted > 0 {
            tracing::warn!("Marked {} interrupted reports as failed", interrupted);
        }

        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Reports ---

    /// Insert a new report in the `Running` state.
    pub fn create_report(&self, report_id: &str, started_at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reports (report_id, status, started_at) VALUES (?1, ?2, ?3)",
            params![
                report_id,
                ReportState::Running.status_name(),
                format_db_time(started_at),
            ],
        )?;
        Ok(())
    }

    /// Move a running report to `Completed` with its result rows.
    pub fn complete_report(
        &self,
        report_id: &str,
        completed_at: DateTime<Utc>,
        data: &[LocationMetrics],
    ) -> Result<(), DbError> {
        let data_json = serde_json::to_string(data)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE reports SET status = 'Completed', completed_at = ?1, data = ?2
             WHERE report_id = ?3 AND status = 'Running'",
            params![format_db_time(completed_at), data_json, report_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotRunning(report_id.to_string()));
        }
        Ok(())
    }

    /// Move a running report to `Failed` with the given reason.
    pub fn fail_report(
        &self,
        report_id: &str,
        completed_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE reports SET status = 'Failed', completed_at = ?1, error = ?2
             WHERE report_id = ?3 AND status = 'Running'",
            params![format_db_time(completed_at), reason, report_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotRunning(report_id.to_string()));
        }
        Ok(())
    }

    /// Fail every report still `Running`. Returns how many were updated.
    pub fn fail_running_reports(&self, completed_at: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE reports SET status = 'Failed', completed_at = ?1, error = ?2 WHERE status = 'Running'",
            params![format_db_time(completed_at), INTERRUPTED_REASON],
        )?;
        Ok(updated)
    }

    /// Get a report by its token.
    pub fn get_report(&self, report_id: &str) -> Result<Report, DbError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT status, started_at, completed_at, data, error FROM reports WHERE report_id = ?1",
                params![report_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        let (status, started_at, completed_at, data, error) = row.ok_or(DbError::NotFound)?;

        let state = match status.as_str() {
            "Running" => ReportState::Running,
            "Completed" => {
                let data = data.ok_or_else(|| {
                    DbError::Malformed(format!("completed report {} has no data", report_id))
                })?;
                ReportState::Completed(serde_json::from_str(&data)?)
            }
            "Failed" => ReportState::Failed(error.unwrap_or_default()),
            other => return Err(DbError::InvalidStatus(other.to_string())),
        };

        let started_at = parse_db_time(&started_at)
            .ok_or_else(|| DbError::Malformed(format!("bad started_at: {}", started_at)))?;
        let completed_at = match completed_at {
            Some(s) => Some(
                parse_db_time(&s).ok_or_else(|| DbError::Malformed(format!("bad completed_at: {}", s)))?,
            ),
            None => None,
        };

        Ok(Report {
            report_id: report_id.to_string(),
            state,
            started_at,
            completed_at,
        })
    }

    // --- Location data ---

    /// Get up to `limit` location ids in insertion order.
    pub fn get_location_roster(&self, limit: usize) -> Result<Vec<String>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT location_id FROM locations ORDER BY rowid ASC LIMIT ?1")?;
        let ids = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;
        Ok(ids)
    }

    /// Get the profile (timezone) of a location.
    pub fn get_location_profile(&self, location_id: &str) -> Result<LocationProfile, DbError> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                "SELECT location_id, timezone FROM locations WHERE location_id = ?1",
                params![location_id],
                |row| {
                    Ok(LocationProfile {
                        location_id: row.get(0)?,
                        timezone: row.get(1)?,
                    })
                },
            )
            .optional()?;
        profile.ok_or(DbError::NotFound)
    }

    /// Get every status sample recorded for a location.
    pub fn get_status_samples(&self, location_id: &str) -> Result<Vec<StatusSample>, DbError> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT timestamp_utc, status FROM status_samples WHERE location_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt
                .query_map(params![location_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        };

        rows.into_iter()
            .map(|(ts, status)| {
                let timestamp = parse_db_time(&ts)
                    .ok_or_else(|| DbError::Malformed(format!("bad sample timestamp: {}", ts)))?;
                let status = SampleStatus::parse(&status)
                    .ok_or_else(|| DbError::Malformed(format!("bad sample status: {}", status)))?;
                Ok(StatusSample {
                    location_id: location_id.to_string(),
                    timestamp,
                    status,
                })
            })
            .collect()
    }

    /// Get the business-hour windows of a location.
    pub fn get_business_hours(&self, location_id: &str) -> Result<Vec<BusinessHourWindow>, DbError> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT start_time_local, end_time_local FROM business_hours WHERE location_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt
                .query_map(params![location_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        };

        rows.into_iter()
            .map(|(start, end)| {
                Ok(BusinessHourWindow {
                    location_id: location_id.to_string(),
                    start: parse_clock_time(&start)?,
                    end: parse_clock_time(&end)?,
                })
            })
            .collect()
    }
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    // Try various formats
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f UTC",
        "%Y-%m-%d %H:%M:%S UTC",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    // Try ISO 8601
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

/// Parse a local clock time (`HH:MM:SS`, optional fraction).
fn parse_clock_time(s: &str) -> Result<NaiveTime, DbError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
        .map_err(|_| DbError::Malformed(format!("bad business-hour time: {}", s)))
}

/// Fixture writers for the collaborator tables, which the service only reads.
#[cfg(test)]
impl Store {
    pub fn add_location(&self, location_id: &str, timezone: &str) {
        let conn = self.conn().unwrap();
        conn.execute(
            "INSERT INTO locations (location_id, timezone) VALUES (?1, ?2)",
            params![location_id, timezone],
        )
        .unwrap();
    }

    pub fn add_status_sample(&self, location_id: &str, timestamp_utc: &str, status: &str) {
        let conn = self.conn().unwrap();
        conn.execute(
            "INSERT INTO status_samples (location_id, timestamp_utc, status) VALUES (?1, ?2, ?3)",
            params![location_id, timestamp_utc, status],
        )
        .unwrap();
    }

    pub fn add_business_hours(&self, location_id: &str, start: &str, end: &str) {
        let conn = self.conn().unwrap();
        conn.execute(
            "INSERT INTO business_hours (location_id, start_time_local, end_time_local) VALUES (?1, ?2, ?3)",
            params![location_id, start, end],
        )
        .unwrap();
    }

    /// Hold the connection lock for `hold`, signalling once it is taken.
    pub fn hold_lock(&self, hold: std::time::Duration, locked: std::sync::mpsc::Sender<()>) {
        let _conn = self.conn().unwrap();
        locked.send(()).unwrap();
        std::thread::sleep(hold);
    }

    pub fn set_report_status(&self, report_id: &str, status: &str) {
        let conn = self.conn().unwrap();
        conn.execute(
            "UPDATE reports SET status = ?1 WHERE report_id = ?2",
            params![status, report_id],
        )
        .unwrap();
    }
}
