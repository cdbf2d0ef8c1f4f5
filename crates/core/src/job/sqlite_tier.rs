//! SQLite-backed durable tier.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{DurableTier, DurableTierError, Job, JobStatus};

const JOB_COLUMNS: &str = "id, target, status, progress, created_at, updated_at, result_ref, \
                           last_error, attempts, durability_degraded";

/// Durable tier storing each job as a flat row in a `jobs` table.
pub struct SqliteDurableTier {
    conn: Mutex<Connection>,
}

impl SqliteDurableTier {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn new(path: &Path) -> Result<Self, DurableTierError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self, DurableTierError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), DurableTierError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                target TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                result_ref TEXT,
                last_error TEXT,
                attempts TEXT NOT NULL DEFAULT '[]',
                durability_degraded INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(())
    }
}

/// Timestamps are stored fixed-width so text comparison matches time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

struct JobRow {
    id: String,
    target: String,
    status: String,
    progress: f64,
    created_at: String,
    updated_at: String,
    result_ref: Option<String>,
    last_error: Option<String>,
    attempts: String,
    durability_degraded: bool,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            target: row.get(1)?,
            status: row.get(2)?,
            progress: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            result_ref: row.get(6)?,
            last_error: row.get(7)?,
            attempts: row.get(8)?,
            durability_degraded: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Job, DurableTierError> {
        let corrupt = |reason: String| DurableTierError::Corrupt {
            id: self.id.clone(),
            reason,
        };

        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {}", e)))?
            .with_timezone(&Utc);
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| corrupt(format!("updated_at: {}", e)))?
            .with_timezone(&Utc);
        let last_error = match &self.last_error {
            Some(json) => Some(
                serde_json::from_str(json).map_err(|e| corrupt(format!("last_error: {}", e)))?,
            ),
            None => None,
        };
        let attempts = serde_json::from_str(&self.attempts)
            .map_err(|e| corrupt(format!("attempts: {}", e)))?;

        Ok(Job {
            id: self.id,
            target: self.target,
            status,
            progress: self.progress as f32,
            created_at,
            updated_at,
            result_ref: self.result_ref,
            last_error,
            attempts,
            durability_degraded: self.durability_degraded,
        })
    }
}

impl DurableTier for SqliteDurableTier {
    fn put(&self, job: &Job) -> Result<(), DurableTierError> {
        let last_error = job
            .last_error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DurableTierError::Unavailable(e.to_string()))?;
        let attempts = serde_json::to_string(&job.attempts)
            .map_err(|e| DurableTierError::Unavailable(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.target,
                job.status.as_str(),
                job.progress as f64,
                format_ts(&job.created_at),
                format_ts(&job.updated_at),
                job.result_ref,
                last_error,
                attempts,
                job.durability_degraded,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>, DurableTierError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        drop(conn);

        row.map(JobRow::decode).transpose()
    }

    fn delete_updated_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, DurableTierError> {
        let cutoff = format_ts(&cutoff);
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare("SELECT id FROM jobs WHERE updated_at < ?1")?;
        let ids = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        conn.execute("DELETE FROM jobs WHERE updated_at < ?1", params![cutoff])?;
        Ok(ids)
    }

    fn list_unfinished(&self) -> Result<Vec<Job>, DurableTierError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status IN ('queued', 'running') ORDER BY created_at ASC",
            JOB_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(JobRow::decode).collect()
    }
}
