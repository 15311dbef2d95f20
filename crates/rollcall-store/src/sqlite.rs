//! SQLite-backed relational store for student profiles and attendance.
//!
//! One `students` row per registered name, with the enrollment centroid kept
//! as a JSON array in `features`. Attendance is unique on
//! `(student_name, period)` and written with `ON CONFLICT DO UPDATE`, so
//! repeated recognition of the same student in a period overwrites in place.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rollcall_core::{AttendanceLedger, AttendanceRecord, Embedding, ProfileStore, StoreError, StudentProfile};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    folder_path TEXT NOT NULL,
    photo_count INTEGER NOT NULL,
    features    TEXT,
    enrolled_at TEXT
);

CREATE TABLE IF NOT EXISTS attendance_records (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    student_name TEXT NOT NULL,
    period       TEXT NOT NULL,
    confidence   REAL NOT NULL,
    recorded_at  TEXT NOT NULL,
    UNIQUE (student_name, period)
);

CREATE INDEX IF NOT EXISTS idx_attendance_recorded_at ON attendance_records (recorded_at);
"#;

/// Profiles and attendance in a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Persistence(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(persistence)?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(persistence)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Persistence("database lock poisoned".into()))
    }

    /// Attendance records, newest first, optionally filtered by period and
    /// by the UTC calendar day they were recorded on.
    pub fn attendance(
        &self,
        period: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let day = date.map(|d| d.format("%Y-%m-%d").to_string());
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT student_name, period, confidence, recorded_at
                 FROM attendance_records
                 WHERE (?1 IS NULL OR period = ?1)
                   AND (?2 IS NULL OR substr(recorded_at, 1, 10) = ?2)
                 ORDER BY recorded_at DESC, id DESC",
            )
            .map_err(persistence)?;
        let rows = stmt
            .query_map(params![period, day], attendance_row)
            .map_err(persistence)?;
        collect_attendance(rows)
    }

    /// The `limit` most recently written attendance records.
    pub fn recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT student_name, period, confidence, recorded_at
                 FROM attendance_records
                 ORDER BY recorded_at DESC, id DESC
                 LIMIT ?1",
            )
            .map_err(persistence)?;
        let rows = stmt
            .query_map(params![limit as i64], attendance_row)
            .map_err(persistence)?;
        collect_attendance(rows)
    }

    /// Number of registered students.
    pub fn student_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))
            .map_err(persistence)?;
        Ok(count as usize)
    }

    pub fn profile(&self, name: &str) -> Result<Option<StudentProfile>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, name, folder_path, photo_count, features, enrolled_at
                 FROM students WHERE name = ?1",
                params![name],
                profile_row,
            )
            .optional()
            .map_err(persistence)?;
        raw.map(RawProfile::into_profile).transpose()
    }
}

impl ProfileStore for SqliteStore {
    fn upsert_profile(&self, profile: &StudentProfile) -> Result<(), StoreError> {
        let features = profile
            .centroid
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Persistence(format!("encode features: {e}")))?;
        let enrolled_at = profile.enrolled_at.map(timestamp);

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO students (id, name, folder_path, photo_count, features, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                folder_path = excluded.folder_path,
                photo_count = excluded.photo_count,
                features    = excluded.features,
                enrolled_at = excluded.enrolled_at",
            params![
                profile.id,
                profile.name,
                profile.folder_path,
                profile.photo_count,
                features,
                enrolled_at
            ],
        )
        .map_err(persistence)?;

        tracing::debug!(student = %profile.name, "profile upserted");
        Ok(())
    }

    fn load_registry(&self) -> Result<Vec<StudentProfile>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, folder_path, photo_count, features, enrolled_at
                 FROM students
                 WHERE features IS NOT NULL
                 ORDER BY name",
            )
            .map_err(persistence)?;
        let raw = stmt
            .query_map([], profile_row)
            .map_err(persistence)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(persistence)?;
        raw.into_iter().map(RawProfile::into_profile).collect()
    }
}

impl AttendanceLedger for SqliteStore {
    fn upsert_attendance(&self, records: &[AttendanceRecord]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(persistence)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO attendance_records (student_name, period, confidence, recorded_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(student_name, period) DO UPDATE SET
                        confidence  = excluded.confidence,
                        recorded_at = excluded.recorded_at",
                )
                .map_err(persistence)?;
            for record in records {
                stmt.execute(params![
                    record.student_name,
                    record.period,
                    record.confidence as f64,
                    timestamp(record.recorded_at)
                ])
                .map_err(persistence)?;
            }
        }
        tx.commit().map_err(persistence)?;
        Ok(records.len())
    }
}

/// Row image of `students` before the JSON and timestamp columns are parsed.
struct RawProfile {
    id: String,
    name: String,
    folder_path: String,
    photo_count: u32,
    features: Option<String>,
    enrolled_at: Option<String>,
}

impl RawProfile {
    fn into_profile(self) -> Result<StudentProfile, StoreError> {
        let centroid = self
            .features
            .as_deref()
            .map(serde_json::from_str::<Embedding>)
            .transpose()
            .map_err(|e| StoreError::Persistence(format!("features of {}: {e}", self.name)))?;
        let enrolled_at = self.enrolled_at.as_deref().map(parse_timestamp).transpose()?;
        Ok(StudentProfile {
            id: self.id,
            name: self.name,
            folder_path: self.folder_path,
            photo_count: self.photo_count,
            centroid,
            enrolled_at,
        })
    }
}

fn profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProfile> {
    Ok(RawProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        folder_path: row.get(2)?,
        photo_count: row.get(3)?,
        features: row.get(4)?,
        enrolled_at: row.get(5)?,
    })
}

type RawAttendance = (String, String, f64, String);

fn attendance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAttendance> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn collect_attendance(
    rows: impl Iterator<Item = rusqlite::Result<RawAttendance>>,
) -> Result<Vec<AttendanceRecord>, StoreError> {
    rows.map(|row| {
        let (student_name, period, confidence, recorded_at) = row.map_err(persistence)?;
        Ok(AttendanceRecord {
            student_name,
            period,
            confidence: confidence as f32,
            recorded_at: parse_timestamp(&recorded_at)?,
        })
    })
    .collect()
}

/// RFC 3339 in UTC with a fixed width, so text order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Persistence(format!("bad timestamp {raw:?}: {e}")))
}

fn persistence(e: rusqlite::Error) -> StoreError {
    StoreError::Persistence(e.to_string())
}
