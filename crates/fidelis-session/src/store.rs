use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use fidelis_core::{
    BehavioralSpec, FidelisError, InputBundle, Result, Session, SessionLogEntry, SessionStatus,
    TechnologyContext, UnifiedResult, ValidationScope,
};

fn db_err(err: sqlx::Error) -> FidelisError {
    FidelisError::Database(err.to_string())
}

/// What the `input_bundle` column actually holds: the request's immutable
/// inputs. Lifecycle fields (status, version, timestamps, deletion) live
/// in their own columns and never enter this blob.
#[derive(serde::Serialize, serde::Deserialize)]
struct SessionPayload {
    source_technology: TechnologyContext,
    target_technology: TechnologyContext,
    source_bundle: InputBundle,
    target_bundle: InputBundle,
    behavioral: BehavioralSpec,
    tenant: String,
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Summary row for session listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub request_id: String,
    pub status: SessionStatus,
    pub scope: String,
    pub source_tech: String,
    pub target_tech: String,
    pub created_at: DateTime<Utc>,
}

/// Relational persistence for sessions and their owned children. SQLite
/// behind a pool; schema creation is idempotent.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        // File-backed databases need their parent directory in place.
        if let Some(path) = url
            .strip_prefix("sqlite://")
            .map(|rest| rest.split('?').next().unwrap_or(rest))
            .filter(|path| !path.is_empty() && *path != ":memory:")
        {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_err)?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(db_err)?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await
            .map_err(db_err)?;
        Self::init_schema(&pool).await?;
        info!(url, "session store ready");
        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests and the CLI's one-shot
    /// mode.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS validation_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                source_tech TEXT NOT NULL,
                target_tech TEXT NOT NULL,
                scope TEXT NOT NULL,
                input_bundle TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                deleted_by TEXT,
                version INTEGER NOT NULL DEFAULT 0
            )"#,
            r#"CREATE TABLE IF NOT EXISTS validation_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES validation_sessions(id),
                kind TEXT NOT NULL,
                overall_status TEXT NOT NULL,
                fidelity_score REAL NOT NULL,
                summary TEXT NOT NULL,
                execution_time REAL NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS validation_discrepancies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES validation_sessions(id),
                result_id INTEGER REFERENCES validation_results(id) ON DELETE SET NULL,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                description TEXT NOT NULL,
                source_element TEXT,
                target_element TEXT,
                recommendation TEXT,
                confidence REAL NOT NULL,
                component TEXT,
                context TEXT,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS behavioral_test_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES validation_sessions(id),
                scenario_name TEXT NOT NULL,
                execution_status TEXT NOT NULL,
                source_trace TEXT,
                target_trace TEXT,
                comparison TEXT,
                execution_duration REAL NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS session_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES validation_sessions(id),
                ts TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                payload TEXT
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_sessions_status_created ON validation_sessions(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_techs ON validation_sessions(source_tech, target_tech)",
            "CREATE INDEX IF NOT EXISTS idx_discrepancies_severity ON validation_discrepancies(severity, kind)",
            "CREATE INDEX IF NOT EXISTS idx_logs_session ON session_logs(session_id, id)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let payload = serde_json::to_string(&SessionPayload {
            source_technology: session.source_technology.clone(),
            target_technology: session.target_technology.clone(),
            source_bundle: session.source_bundle.clone(),
            target_bundle: session.target_bundle.clone(),
            behavioral: session.behavioral.clone(),
            tenant: session.tenant.clone(),
        })?;
        sqlx::query(
            r#"INSERT INTO validation_sessions
               (request_id, status, source_tech, target_tech, scope, input_bundle,
                created_at, updated_at, version)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.request_id)
        .bind(session.status.to_string())
        .bind(&session.source_technology.name)
        .bind(&session.target_technology.name)
        .bind(session.scope.to_string())
        .bind(payload)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.version)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                FidelisError::Conflict(format!("request_id {} already exists", session.request_id))
            }
            other => db_err(other),
        })?;
        Ok(())
    }

    pub async fn load(&self, request_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"SELECT input_bundle, status, scope, created_at, updated_at, deleted_at,
                      deleted_by, version
               FROM validation_sessions WHERE request_id = ?"#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else { return Ok(None) };
        let blob: String = row.try_get("input_bundle").map_err(db_err)?;
        let payload: SessionPayload = serde_json::from_str(&blob)?;
        let status: String = row.try_get("status").map_err(db_err)?;
        let scope: String = row.try_get("scope").map_err(db_err)?;
        let created: String = row.try_get("created_at").map_err(db_err)?;
        let updated: String = row.try_get("updated_at").map_err(db_err)?;

        let session = Session {
            request_id: request_id.to_string(),
            status: SessionStatus::from_str(&status).map_err(FidelisError::Internal)?,
            scope: ValidationScope::from_str(&scope).map_err(FidelisError::Internal)?,
            source_technology: payload.source_technology,
            target_technology: payload.target_technology,
            source_bundle: payload.source_bundle,
            target_bundle: payload.target_bundle,
            behavioral: payload.behavioral,
            tenant: payload.tenant,
            created_at: parse_ts(&created),
            updated_at: parse_ts(&updated),
            deleted_at: row
                .try_get::<Option<String>, _>("deleted_at")
                .map_err(db_err)?
                .map(|raw| parse_ts(&raw)),
            deleted_by: row.try_get("deleted_by").map_err(db_err)?,
            version: row.try_get("version").map_err(db_err)?,
            result: self.load_result(request_id).await?,
        };
        Ok(Some(session))
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(
            r#"SELECT request_id, status, scope, source_tech, target_tech, created_at
               FROM validation_sessions WHERE deleted_at IS NULL
               ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status").map_err(db_err)?;
                let created: String = row.try_get("created_at").map_err(db_err)?;
                Ok(SessionSummary {
                    request_id: row.try_get("request_id").map_err(db_err)?,
                    status: SessionStatus::from_str(&status).map_err(FidelisError::Internal)?,
                    scope: row.try_get("scope").map_err(db_err)?,
                    source_tech: row.try_get("source_tech").map_err(db_err)?,
                    target_tech: row.try_get("target_tech").map_err(db_err)?,
                    created_at: parse_ts(&created),
                })
            })
            .collect()
    }

    /// Compare-and-swap status transition: succeeds only when the stored
    /// version still matches. Returns false on version conflict so the
    /// caller can re-read and retry.
    pub async fn try_transition(
        &self,
        request_id: &str,
        expected_version: i64,
        to: SessionStatus,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r#"UPDATE validation_sessions
               SET status = ?, updated_at = ?, version = version + 1
               WHERE request_id = ? AND version = ?"#,
        )
        .bind(to.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(request_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(outcome.rows_affected() == 1)
    }

    pub async fn soft_delete(&self, request_id: &str, actor: &str) -> Result<bool> {
        let outcome = sqlx::query(
            r#"UPDATE validation_sessions SET deleted_at = ?, deleted_by = ?
               WHERE request_id = ? AND deleted_at IS NULL"#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(actor)
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(outcome.rows_affected() == 1)
    }

    pub async fn append_log(&self, request_id: &str, entry: &SessionLogEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO session_logs (session_id, ts, level, message, payload)
               SELECT id, ?, ?, ?, ? FROM validation_sessions WHERE request_id = ?"#,
        )
        .bind(entry.ts.to_rfc3339())
        .bind(entry.level.to_string())
        .bind(&entry.message)
        .bind(entry.payload.as_ref().map(|p| p.to_string()))
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn logs(&self, request_id: &str) -> Result<Vec<SessionLogEntry>> {
        let rows = sqlx::query(
            r#"SELECT ts, level, message, payload FROM session_logs
               WHERE session_id = (SELECT id FROM validation_sessions WHERE request_id = ?)
               ORDER BY id"#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let ts: String = row.try_get("ts").map_err(db_err)?;
                let level: String = row.try_get("level").map_err(db_err)?;
                let payload: Option<String> = row.try_get("payload").map_err(db_err)?;
                Ok(SessionLogEntry {
                    ts: parse_ts(&ts),
                    level: match level.as_str() {
                        "debug" => fidelis_core::LogLevel::Debug,
                        "warn" => fidelis_core::LogLevel::Warn,
                        "error" => fidelis_core::LogLevel::Error,
                        _ => fidelis_core::LogLevel::Info,
                    },
                    message: row.try_get("message").map_err(db_err)?,
                    payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
                })
            })
            .collect()
    }

    pub async fn save_result(&self, request_id: &str, result: &UnifiedResult) -> Result<()> {
        let kind = serde_json::to_value(result.result_kind)?
            .as_str()
            .unwrap_or("hybrid")
            .to_string();
        let payload = serde_json::to_string(result)?;
        let row = sqlx::query(
            r#"INSERT INTO validation_results
               (session_id, kind, overall_status, fidelity_score, summary, execution_time,
                payload, created_at)
               SELECT id, ?, ?, ?, ?, ?, ?, ? FROM validation_sessions WHERE request_id = ?
               RETURNING id"#,
        )
        .bind(kind)
        .bind(result.overall_status.to_string())
        .bind(result.fidelity_score)
        .bind(&result.summary)
        .bind(result.total_execution_time_secs)
        .bind(payload)
        .bind(result.timestamp.to_rfc3339())
        .bind(request_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let result_id: i64 = row.try_get("id").map_err(db_err)?;

        for discrepancy in &result.discrepancies {
            sqlx::query(
                r#"INSERT INTO validation_discrepancies
                   (session_id, result_id, kind, severity, description, source_element,
                    target_element, recommendation, confidence, component, context, created_at)
                   SELECT id, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ? FROM validation_sessions
                   WHERE request_id = ?"#,
            )
            .bind(result_id)
            .bind(discrepancy.kind.to_string())
            .bind(discrepancy.severity.to_string())
            .bind(&discrepancy.description)
            .bind(&discrepancy.source_element)
            .bind(&discrepancy.target_element)
            .bind(&discrepancy.recommendation)
            .bind(discrepancy.confidence)
            .bind(
                discrepancy
                    .component
                    .and_then(|c| serde_json::to_value(c).ok())
                    .and_then(|v| v.as_str().map(str::to_string)),
            )
            .bind(serde_json::to_string(&discrepancy.validation_context)?)
            .bind(Utc::now().to_rfc3339())
            .bind(request_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn load_result(&self, request_id: &str) -> Result<Option<UnifiedResult>> {
        let row = sqlx::query(
            r#"SELECT payload FROM validation_results
               WHERE session_id = (SELECT id FROM validation_sessions WHERE request_id = ?)
               ORDER BY id DESC LIMIT 1"#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(db_err)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn save_behavioral_report(
        &self,
        request_id: &str,
        scenario_name: &str,
        execution_status: &str,
        source_trace: Option<Value>,
        target_trace: Option<Value>,
        comparison: Option<Value>,
        execution_duration_secs: f64,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO behavioral_test_results
               (session_id, scenario_name, execution_status, source_trace, target_trace,
                comparison, execution_duration, error, created_at)
               SELECT id, ?, ?, ?, ?, ?, ?, ?, ? FROM validation_sessions WHERE request_id = ?"#,
        )
        .bind(scenario_name)
        .bind(execution_status)
        .bind(source_trace.map(|v| v.to_string()))
        .bind(target_trace.map(|v| v.to_string()))
        .bind(comparison.map(|v| v.to_string()))
        .bind(execution_duration_secs)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Startup recovery: sessions interrupted mid-processing are failed
    /// with reason "interrupted"; queued sessions are returned for
    /// re-admission.
    pub async fn recover(&self) -> Result<(Vec<String>, Vec<Session>)> {
        let interrupted_rows =
            sqlx::query("SELECT request_id FROM validation_sessions WHERE status = 'processing'")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        let mut interrupted = Vec::new();
        for row in interrupted_rows {
            interrupted.push(row.try_get::<String, _>("request_id").map_err(db_err)?);
        }

        sqlx::query(
            r#"UPDATE validation_sessions
               SET status = 'failed', updated_at = ?, version = version + 1
               WHERE status = 'processing'"#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        for request_id in &interrupted {
            self.append_log(
                request_id,
                &SessionLogEntry::new(
                    fidelis_core::LogLevel::Error,
                    "session failed: interrupted by process restart",
                ),
            )
            .await?;
        }

        let rows = sqlx::query(
            r#"SELECT request_id FROM validation_sessions
               WHERE status IN ('pending', 'queued') AND deleted_at IS NULL
               ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut sessions = Vec::new();
        for row in rows {
            let request_id: String = row.try_get("request_id").map_err(db_err)?;
            if let Some(session) = self.load(&request_id).await? {
                sessions.push(session);
            }
        }
        Ok((interrupted, sessions))
    }

    pub async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
