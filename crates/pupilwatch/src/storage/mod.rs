//! Storage layer for pupilwatch.
//!
//! This module provides `SQLite`-based persistent storage for test sessions
//! and their pupil measurements, so earlier runs can be listed, compared and
//! re-plotted.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::measurement::PupilMeasurement;
use crate::session::SessionReport;
use crate::vision::Rect;

const SESSION_COLUMNS: &str = "id, started_at, finished_at, source, source_digest, \
     frames_processed, frames_without_eyes, eye_lost_events, stopped_early, error";

/// Storage engine for test sessions.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        debug!("Database ready at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a session and all of its measurements.
    ///
    /// Returns the new session id. Nothing is written if any insert fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn save_session(&self, report: &SessionReport) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r"
            INSERT INTO sessions (started_at, finished_at, source, source_digest,
                frames_processed, frames_without_eyes, eye_lost_events, stopped_early, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                report.started_at.to_rfc3339(),
                report.finished_at.to_rfc3339(),
                report.source,
                report.source_digest,
                to_sql_count(report.frames_processed),
                to_sql_count(report.frames_without_eyes),
                to_sql_count(report.eye_lost_events),
                report.stopped_early,
                report.error,
            ],
        )?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                r"
                INSERT INTO measurements (session_id, frame_index, eye_index,
                    eye_x, eye_y, eye_width, eye_height,
                    center_x, center_y, radius_px, radius_mm, dark_fraction)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ",
            )?;
            for m in &report.measurements {
                stmt.execute(params![
                    id,
                    to_sql_count(m.frame_index),
                    m.eye_index,
                    m.eye.x,
                    m.eye.y,
                    m.eye.width,
                    m.eye.height,
                    f64::from(m.center_x),
                    f64::from(m.center_y),
                    m.radius_px,
                    m.radius_mm,
                    f64::from(m.dark_fraction),
                ])?;
            }
        }

        tx.commit()?;
        info!(
            "Saved session {} with {} measurements",
            id,
            report.measurements.len()
        );
        Ok(id)
    }

    /// Get a session with its measurements.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_session(&self, id: i64) -> Result<Option<SessionReport>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let report = self
            .conn
            .query_row(&sql, [id], Self::row_to_report)
            .optional()?;

        match report {
            Some(mut report) => {
                report.measurements = self.measurements(id)?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// Measurements of a session in frame order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn measurements(&self, session_id: i64) -> Result<Vec<PupilMeasurement>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT frame_index, eye_index, eye_x, eye_y, eye_width, eye_height,
                center_x, center_y, radius_px, radius_mm, dark_fraction
            FROM measurements WHERE session_id = ?1
            ORDER BY frame_index, eye_index, id
            ",
        )?;

        let measurements = stmt
            .query_map([session_id], Self::row_to_measurement)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(measurements)
    }

    /// Most recent sessions first, without their measurements.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT s.id, s.started_at, s.source, s.frames_processed, s.stopped_early,
                COUNT(m.id), AVG(m.radius_mm)
            FROM sessions s LEFT JOIN measurements m ON m.session_id = s.id
            GROUP BY s.id
            ORDER BY s.started_at DESC, s.id DESC
            LIMIT ?1
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let sessions = stmt
            .query_map([limit_i64], |row| {
                Ok(SessionSummary {
                    id: row.get(0)?,
                    started_at: timestamp_column(row, 1)?,
                    source: row.get(2)?,
                    frames_processed: count_column(row, 3)?,
                    stopped_early: row.get(4)?,
                    measurement_count: count_column(row, 5)?,
                    mean_radius_mm: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Delete a session and its measurements.
    ///
    /// Returns `true` if a session was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_session(&self, id: i64) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Keep only the `keep_count` most recent sessions.
    ///
    /// Returns the number of sessions deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_keep_recent(&self, keep_count: usize) -> Result<usize> {
        let keep_i64 = i64::try_from(keep_count).unwrap_or(i64::MAX);
        let affected = self.conn.execute(
            r"
            DELETE FROM sessions WHERE id NOT IN (
                SELECT id FROM sessions ORDER BY started_at DESC, id DESC LIMIT ?1
            )
            ",
            [keep_i64],
        )?;

        if affected > 0 {
            info!("Pruned {} sessions to keep {} recent", affected, keep_count);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let (total_sessions, oldest_session, newest_session) = self.conn.query_row(
            "SELECT COUNT(*), MIN(started_at), MAX(started_at) FROM sessions",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    optional_timestamp_column(row, 1)?,
                    optional_timestamp_column(row, 2)?,
                ))
            },
        )?;
        let total_measurements: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_sessions,
            total_measurements,
            oldest_session,
            newest_session,
            db_size_bytes,
        })
    }

    fn row_to_report(row: &Row) -> rusqlite::Result<SessionReport> {
        Ok(SessionReport {
            id: Some(row.get(0)?),
            started_at: timestamp_column(row, 1)?,
            finished_at: timestamp_column(row, 2)?,
            source: row.get(3)?,
            source_digest: row.get(4)?,
            frames_processed: count_column(row, 5)?,
            frames_without_eyes: count_column(row, 6)?,
            eye_lost_events: count_column(row, 7)?,
            stopped_early: row.get(8)?,
            error: row.get(9)?,
            measurements: Vec::new(),
        })
    }

    fn row_to_measurement(row: &Row) -> rusqlite::Result<PupilMeasurement> {
        let center_x: f64 = row.get(6)?;
        let center_y: f64 = row.get(7)?;
        let dark_fraction: f64 = row.get(10)?;
        Ok(PupilMeasurement {
            frame_index: count_column(row, 0)?,
            eye_index: row.get(1)?,
            eye: Rect::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
            center_x: center_x as f32,
            center_y: center_y as f32,
            radius_px: row.get(8)?,
            radius_mm: row.get(9)?,
            dark_fraction: dark_fraction as f32,
        })
    }
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Counts are stored as `INTEGER`; a negative value means a corrupt row.
fn count_column(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_timestamp(idx, &value)
}

fn optional_timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(idx)?;
    value.map(|v| parse_timestamp(idx, &v)).transpose()
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// One line of the session listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Session id.
    pub id: i64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Frame source of the run.
    pub source: String,
    /// Frames processed.
    pub frames_processed: u64,
    /// Whether the run was interrupted.
    pub stopped_early: bool,
    /// Number of accepted measurements.
    pub measurement_count: u64,
    /// Mean pupil radius, if anything was measured.
    pub mean_radius_mm: Option<f64>,
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of sessions stored.
    pub total_sessions: i64,
    /// Total number of measurements across sessions.
    pub total_measurements: i64,
    /// Start of the oldest session.
    pub oldest_session: Option<DateTime<Utc>>,
    /// Start of the newest session.
    pub newest_session: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
