//! SQLite-backed account tracker.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    check_transition, AccountTracker, AttemptRecord, AttemptStatus, ErrorKind, Stage,
    TrackerError,
};
use crate::identity::AuthTokens;

const RECORD_COLUMNS: &str = "team_id, email, password, stage, status, error_kind, error_detail, attempt_id, attempt_count, tokens, external_reference, created_at, updated_at";

/// SQLite-backed tracker.
///
/// The current record per identity lives in `attempts`; every write is also
/// appended to `attempt_history`. Both happen in one transaction.
pub struct SqliteAccountTracker {
    conn: Mutex<Connection>,
}

impl SqliteAccountTracker {
    /// Open (or create) the tracker database at `path`.
    pub fn new(path: &Path) -> Result<Self, TrackerError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory tracker (useful for testing).
    pub fn in_memory() -> Result<Self, TrackerError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TrackerError> {
        // A committed put must survive a crash.
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(db_error)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS attempts (
                team_id TEXT NOT NULL,
                email TEXT NOT NULL,
                password TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                error_kind TEXT,
                error_detail TEXT,
                attempt_id TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                tokens TEXT,
                external_reference TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (team_id, email)
            );

            CREATE TABLE IF NOT EXISTS attempt_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id TEXT NOT NULL,
                email TEXT NOT NULL,
                password TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                error_kind TEXT,
                error_detail TEXT,
                attempt_id TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                tokens TEXT,
                external_reference TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_team_status ON attempts(team_id, status);
            CREATE INDEX IF NOT EXISTS idx_history_identity ON attempt_history(team_id, email);
            "#,
        )
        .map_err(db_error)?;

        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AttemptRecord> {
        let stage_str: String = row.get(3)?;
        let status_str: String = row.get(4)?;
        let error_kind_str: Option<String> = row.get(5)?;
        let tokens_json: Option<String> = row.get(9)?;
        let created_at_str: String = row.get(11)?;
        let updated_at_str: String = row.get(12)?;

        let stage = Stage::parse(&stage_str).ok_or_else(|| corrupt(3, "stage", &stage_str))?;
        let status =
            AttemptStatus::parse(&status_str).ok_or_else(|| corrupt(4, "status", &status_str))?;
        let error_kind = match error_kind_str {
            Some(s) => Some(ErrorKind::parse(&s).ok_or_else(|| corrupt(5, "error_kind", &s))?),
            None => None,
        };
        let tokens: Option<AuthTokens> = match tokens_json {
            Some(json) => Some(
                serde_json::from_str(&json).map_err(|_| corrupt(9, "tokens", "<json>"))?,
            ),
            None => None,
        };

        Ok(AttemptRecord {
            team_id: row.get(0)?,
            email: row.get(1)?,
            password: row.get(2)?,
            stage,
            status,
            error_kind,
            error_detail: row.get(6)?,
            attempt_id: row.get(7)?,
            attempt_count: row.get(8)?,
            tokens,
            external_reference: row.get(10)?,
            created_at: parse_timestamp(11, "created_at", &created_at_str)?,
            updated_at: parse_timestamp(12, "updated_at", &updated_at_str)?,
        })
    }

    fn query_current(
        conn: &Connection,
        team_id: &str,
        email: &str,
    ) -> Result<Option<AttemptRecord>, TrackerError> {
        let sql = format!(
            "SELECT {} FROM attempts WHERE team_id = ? AND email = ?",
            RECORD_COLUMNS
        );
        match conn.query_row(&sql, params![team_id, email], Self::row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_error(e)),
        }
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<AttemptRecord>, TrackerError> {
        let mut stmt = conn.prepare(sql).map_err(db_error)?;
        let rows = stmt
            .query_map(params, Self::row_to_record)
            .map_err(db_error)?;

        let mut records = Vec::new();
        for row_result in rows {
            records.push(row_result.map_err(db_error)?);
        }
        Ok(records)
    }

    /// Upsert the current row and append to history. Callers hold a transaction.
    fn write_record(conn: &Connection, record: &AttemptRecord) -> Result<(), TrackerError> {
        let tokens_json = record
            .tokens
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| TrackerError::Database(e.to_string()))?;
        let error_kind = record.error_kind.map(|k| k.as_str());

        conn.execute(
            "INSERT INTO attempts (team_id, email, password, stage, status, error_kind, error_detail, attempt_id, attempt_count, tokens, external_reference, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(team_id, email) DO UPDATE SET
                password = excluded.password,
                stage = excluded.stage,
                status = excluded.status,
                error_kind = excluded.error_kind,
                error_detail = excluded.error_detail,
                attempt_id = excluded.attempt_id,
                attempt_count = excluded.attempt_count,
                tokens = excluded.tokens,
                external_reference = excluded.external_reference,
                updated_at = excluded.updated_at",
            params![
                record.team_id,
                record.email,
                record.password,
                record.stage.as_str(),
                record.status.as_str(),
                error_kind,
                record.error_detail,
                record.attempt_id,
                record.attempt_count,
                tokens_json,
                record.external_reference,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_error)?;

        conn.execute(
            "INSERT INTO attempt_history (team_id, email, password, stage, status, error_kind, error_detail, attempt_id, attempt_count, tokens, external_reference, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.team_id,
                record.email,
                record.password,
                record.stage.as_str(),
                record.status.as_str(),
                error_kind,
                record.error_detail,
                record.attempt_id,
                record.attempt_count,
                tokens_json,
                record.external_reference,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_error)?;

        Ok(())
    }
}

impl AccountTracker for SqliteAccountTracker {
    fn get(&self, team_id: &str, email: &str) -> Result<Option<AttemptRecord>, TrackerError> {
        let conn = self.conn.lock().unwrap();
        Self::query_current(&conn, team_id, email)
    }

    fn put(&self, record: &AttemptRecord) -> Result<(), TrackerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_error)?;

        let current = Self::query_current(&tx, &record.team_id, &record.email)?;
        check_transition(current.as_ref(), record)?;
        Self::write_record(&tx, record)?;

        tx.commit().map_err(db_error)
    }

    fn list(&self, team_id: &str) -> Result<Vec<AttemptRecord>, TrackerError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM attempts WHERE team_id = ? ORDER BY created_at ASC, email ASC",
            RECORD_COLUMNS
        );
        Self::query_records(&conn, &sql, &[&team_id])
    }

    fn list_incomplete(&self, team_id: &str) -> Result<Vec<AttemptRecord>, TrackerError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM attempts WHERE team_id = ? AND NOT (stage = ? AND status = ?) ORDER BY created_at ASC, email ASC",
            RECORD_COLUMNS
        );
        Self::query_records(
            &conn,
            &sql,
            &[
                &team_id,
                &Stage::DownstreamRegistered.as_str(),
                &AttemptStatus::Succeeded.as_str(),
            ],
        )
    }

    fn history(&self, team_id: &str, email: &str) -> Result<Vec<AttemptRecord>, TrackerError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM attempt_history WHERE team_id = ? AND email = ? ORDER BY id ASC",
            RECORD_COLUMNS
        );
        Self::query_records(&conn, &sql, &[&team_id, &email])
    }

    fn recover_interrupted(
        &self,
        team_id: &str,
        stale_after: Duration,
    ) -> Result<Vec<AttemptRecord>, TrackerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_error)?;

        let sql = format!(
            "SELECT {} FROM attempts WHERE team_id = ? AND status = ? ORDER BY created_at ASC",
            RECORD_COLUMNS
        );
        let in_progress = Self::query_records(
            &tx,
            &sql,
            &[&team_id, &AttemptStatus::InProgress.as_str()],
        )?;

        let now = Utc::now();
        let mut recovered = Vec::new();
        for record in in_progress {
            let age = now.signed_duration_since(record.updated_at).to_std();
            if !age.is_ok_and(|age| age >= stale_after) {
                continue;
            }

            // Same attempt id, so the rewrite is not a conflicting attempt.
            let failed = record.failed(
                record.stage,
                ErrorKind::Transient,
                "interrupted before the stage finished",
            );
            Self::write_record(&tx, &failed)?;
            recovered.push(failed);
        }

        tx.commit().map_err(db_error)?;
        Ok(recovered)
    }

    fn team_ids(&self) -> Result<Vec<String>, TrackerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT team_id FROM attempts ORDER BY team_id ASC")
            .map_err(db_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_error)?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(db_error)?);
        }
        Ok(ids)
    }
}

fn db_error(e: rusqlite::Error) -> TrackerError {
    TrackerError::Database(e.to_string())
}

fn corrupt(column: usize, name: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(TrackerError::Corrupt(format!("{} = {:?}", name, value))),
    )
}

fn parse_timestamp(column: usize, name: &str, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(column, name, value))
}
