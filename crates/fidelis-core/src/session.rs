use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::result::UnifiedResult;
use crate::types::{BehavioralSpec, InputBundle, TechnologyContext, ValidationScope};

/// Session lifecycle state. Terminal statuses are monotonic: once a session
/// reaches one it never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::Cancelled
                | SessionStatus::TimedOut
        )
    }

    /// Legal transitions per the session state machine. Self-transitions
    /// are allowed everywhere so repeated events stay idempotent.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (SessionStatus::Pending, SessionStatus::Queued) => true,
            (SessionStatus::Queued, SessionStatus::Processing) => true,
            (SessionStatus::Queued, SessionStatus::Cancelled) => true,
            (SessionStatus::Processing, SessionStatus::Completed) => true,
            (SessionStatus::Processing, SessionStatus::Failed) => true,
            (SessionStatus::Processing, SessionStatus::Cancelled) => true,
            (SessionStatus::Processing, SessionStatus::TimedOut) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Queued => "queued",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::TimedOut => "timed-out",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "queued" => Ok(SessionStatus::Queued),
            "processing" => Ok(SessionStatus::Processing),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "timed-out" => Ok(SessionStatus::TimedOut),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Server-assigned opaque request identifier: URL-safe, unique,
/// non-sequential.
pub fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Appended, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SessionLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Event published to progress subscribers: a log entry or a status
/// transition, totally ordered per session by sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log {
        seq: u64,
        request_id: String,
        entry: SessionLogEntry,
    },
    StatusChanged {
        seq: u64,
        request_id: String,
        from: SessionStatus,
        to: SessionStatus,
        ts: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn seq(&self) -> u64 {
        match self {
            ProgressEvent::Log { seq, .. } => *seq,
            ProgressEvent::StatusChanged { seq, .. } => *seq,
        }
    }
}

/// The unit of validation and the only mutable aggregate root. Mutated by
/// its owning worker alone until terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub request_id: String,
    pub status: SessionStatus,
    pub scope: ValidationScope,
    pub source_technology: TechnologyContext,
    pub target_technology: TechnologyContext,
    pub source_bundle: InputBundle,
    pub target_bundle: InputBundle,
    #[serde(default)]
    pub behavioral: BehavioralSpec,
    pub tenant: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// Optimistic concurrency counter; bumped on every persisted update.
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<UnifiedResult>,
}

impl Session {
    pub fn new(
        scope: ValidationScope,
        source_technology: TechnologyContext,
        target_technology: TechnologyContext,
        source_bundle: InputBundle,
        target_bundle: InputBundle,
        behavioral: BehavioralSpec,
        tenant: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: new_request_id(),
            status: SessionStatus::Pending,
            scope,
            source_technology,
            target_technology,
            source_bundle,
            target_bundle,
            behavioral,
            tenant: tenant.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            version: 0,
            result: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
