//! SQLite-backed request store implementation.
//!
//! Requests live in `environments`; step records are append-only rows in
//! `step_records`. Every mutation runs in a single transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    NewRequest, ProvisioningRequest, RequestFilter, RequestState, RequestStore, StepRecord,
    StoreError,
};

/// SQLite-backed request store.
pub struct SqliteRequestStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}

/// Raw columns of an `environments` row.
struct RequestRow {
    id: String,
    track: String,
    template: String,
    state: String,
    reason: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

const SELECT_COLUMNS: &str =
    "id, track, template, state, reason, created_at, updated_at, completed_at";

impl SqliteRequestStore {
    /// Create a new SQLite request store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite request store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS environments (
                id TEXT PRIMARY KEY,
                track TEXT NOT NULL,
                template TEXT NOT NULL,
                state TEXT NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS step_records (
                request_id TEXT NOT NULL REFERENCES environments(id),
                seq INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (request_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_environments_state ON environments(state);
            CREATE INDEX IF NOT EXISTS idx_environments_track ON environments(track);
            CREATE INDEX IF NOT EXISTS idx_environments_created_at ON environments(created_at);
            "#,
        )
        .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &RequestFilter) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(state.as_str().to_string());
        }

        if let Some(track) = filter.track {
            conditions.push("track = ?");
            params.push(track.as_str().to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<RequestRow> {
        Ok(RequestRow {
            id: row.get(0)?,
            track: row.get(1)?,
            template: row.get(2)?,
            state: row.get(3)?,
            reason: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            completed_at: row.get(7)?,
        })
    }

    fn load_steps(conn: &Connection, id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let mut stmt = conn
            .prepare("SELECT record FROM step_records WHERE request_id = ? ORDER BY seq ASC")
            .map_err(db_err)?;
        let records = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        records
            .iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    fn hydrate(conn: &Connection, row: RequestRow) -> Result<ProvisioningRequest, StoreError> {
        let state = RequestState::parse(&row.state)
            .ok_or_else(|| StoreError::Serialization(format!("unknown state '{}'", row.state)))?;
        let track = row
            .track
            .parse()
            .map_err(|e: crate::catalog::CatalogError| StoreError::Serialization(e.to_string()))?;
        let steps = Self::load_steps(conn, &row.id)?;

        Ok(ProvisioningRequest {
            track,
            template: serde_json::from_str(&row.template)?,
            state,
            steps,
            reason: row.reason,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            completed_at: row
                .completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            id: row.id,
        })
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<ProvisioningRequest>, StoreError> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM environments WHERE id = ?", SELECT_COLUMNS),
                params![id],
                Self::read_row,
            )
            .optional()
            .map_err(db_err)?;

        row.map(|r| Self::hydrate(conn, r)).transpose()
    }
}

impl RequestStore for SqliteRequestStore {
    fn create(&self, request: NewRequest) -> Result<ProvisioningRequest, StoreError> {
        let conn = self.conn()?;
        let record = ProvisioningRequest::new(request.id, request.track, request.template);
        let template_json = serde_json::to_string(&record.template)?;

        let result = conn.execute(
            "INSERT INTO environments (id, track, template, state, reason, created_at, updated_at, completed_at) VALUES (?, ?, ?, ?, NULL, ?, ?, NULL)",
            params![
                record.id,
                record.track.as_str(),
                template_json,
                record.state.as_str(),
                timestamp(&record.created_at),
                timestamp(&record.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(record),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(record.id))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn get(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError> {
        let conn = self.conn()?;
        Self::load(&conn, id)
    }

    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM environments WHERE id = ?)",
            params![id],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    fn list(&self, filter: &RequestFilter) -> Result<Vec<ProvisioningRequest>, StoreError> {
        let conn = self.conn()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM environments {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );
        params.push(filter.limit.to_string());
        params.push(filter.offset.to_string());

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), Self::read_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| Self::hydrate(&conn, row))
            .collect()
    }

    fn count(&self, filter: &RequestFilter) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM environments {}", where_clause);
        conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
            row.get(0)
        })
        .map_err(db_err)
    }

    fn update_state(
        &self,
        id: &str,
        new_state: RequestState,
        reason: Option<String>,
    ) -> Result<ProvisioningRequest, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let mut request =
            Self::load(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        request
            .apply_transition(new_state, reason)
            .map_err(|(from, to)| StoreError::InvalidTransition {
                request_id: id.to_string(),
                from,
                to,
            })?;

        tx.execute(
            "UPDATE environments SET state = ?, reason = ?, updated_at = ?, completed_at = ? WHERE id = ?",
            params![
                request.state.as_str(),
                request.reason,
                timestamp(&request.updated_at),
                request.completed_at.as_ref().map(timestamp),
                id,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(request)
    }

    fn append_step(&self, id: &str, record: StepRecord) -> Result<ProvisioningRequest, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let mut request =
            Self::load(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.state.is_terminal() {
            return Err(StoreError::Terminal(id.to_string()));
        }

        let seq = request.steps.len() as i64;
        let record_json = serde_json::to_string(&record)?;
        request.updated_at = Utc::now();

        tx.execute(
            "INSERT INTO step_records (request_id, seq, record) VALUES (?, ?, ?)",
            params![id, seq, record_json],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE environments SET updated_at = ? WHERE id = ?",
            params![timestamp(&request.updated_at), id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        request.steps.push(record);
        Ok(request)
    }
}
