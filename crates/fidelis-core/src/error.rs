use thiserror::Error;

#[derive(Error, Debug)]
pub enum FidelisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    ValidationInput(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Admission refused: {0}")]
    Overloaded(String),

    #[error("All LLM providers unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Session budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Unparseable model response: {0}")]
    ResponseUnparseable(String),

    #[error("Prober failure: {0}")]
    ProberFailure(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FidelisError {
    /// Stable wire code for the error envelope. Codes are part of the API
    /// contract and must not change between releases.
    pub fn code(&self) -> &'static str {
        match self {
            FidelisError::Io(_) => "internal",
            FidelisError::Serialization(_) => "internal",
            FidelisError::ValidationInput(_) => "validation-input",
            FidelisError::Auth(_) => "auth",
            FidelisError::Overloaded(_) => "overloaded",
            FidelisError::ProviderUnavailable(_) => "provider-unavailable",
            FidelisError::BudgetExhausted(_) => "budget-exhausted",
            FidelisError::DeadlineExceeded(_) => "deadline-exceeded",
            FidelisError::ResponseUnparseable(_) => "response-unparseable",
            FidelisError::ProberFailure(_) => "prober-failure",
            FidelisError::Database(_) => "internal",
            FidelisError::Configuration(_) => "internal",
            FidelisError::Conflict(_) => "conflict",
            FidelisError::Cancelled => "cancelled",
            FidelisError::NotFound(_) => "not-found",
            FidelisError::Internal(_) => "internal",
        }
    }

    /// Recoverable errors become stage-level `error` statuses or
    /// discrepancies; unrecoverable ones fail the whole session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FidelisError::ProviderUnavailable(_)
                | FidelisError::BudgetExhausted(_)
                | FidelisError::ResponseUnparseable(_)
                | FidelisError::ProberFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FidelisError>;
