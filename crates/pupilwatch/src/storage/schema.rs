//! `SQLite` schema definitions for pupilwatch.
//!
//! One row in `sessions` per test run, with its accepted pupil measurements
//! in `measurements`.

/// SQL statement to create the sessions table.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    source TEXT NOT NULL,
    source_digest TEXT,
    frames_processed INTEGER NOT NULL,
    frames_without_eyes INTEGER NOT NULL,
    eye_lost_events INTEGER NOT NULL,
    stopped_early INTEGER NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the measurements table.
pub const CREATE_MEASUREMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    frame_index INTEGER NOT NULL,
    eye_index INTEGER NOT NULL,
    eye_x INTEGER NOT NULL,
    eye_y INTEGER NOT NULL,
    eye_width INTEGER NOT NULL,
    eye_height INTEGER NOT NULL,
    center_x REAL NOT NULL,
    center_y REAL NOT NULL,
    radius_px INTEGER NOT NULL,
    radius_mm REAL NOT NULL,
    dark_fraction REAL NOT NULL
)
";

/// SQL statement to create an index on session start time.
pub const CREATE_STARTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at DESC)
";

/// SQL statement to create an index for reading a session's measurements in order.
pub const CREATE_MEASUREMENTS_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_measurements_session ON measurements(session_id, frame_index)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SESSIONS_TABLE,
    CREATE_MEASUREMENTS_TABLE,
    CREATE_STARTED_INDEX,
    CREATE_MEASUREMENTS_SESSION_INDEX,
    CREATE_METADATA_TABLE,
];
