use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::db::StoreError;
use crate::services::ai::AiError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ContactNotFound,
    ContactOptedOut,
    ContactHandedOff,
    WorkflowInactive,
    StateConflict,
    AiGenerationFailed,
    DatabaseError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ContactNotFound => "contact_not_found",
            ErrorKind::ContactOptedOut => "contact_opted_out",
            ErrorKind::ContactHandedOff => "contact_handed_off",
            ErrorKind::WorkflowInactive => "workflow_inactive",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::AiGenerationFailed => "ai_generation_failed",
            ErrorKind::DatabaseError => "database_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Failures of one inbound-message run.
///
/// The first group means the message should never have been routed to the
/// engine and is returned to the caller as-is. The second group is caught
/// by the orchestrator and answered with a fallback reply.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("contact not found: {0}")]
    ContactNotFound(String),

    #[error("contact has opted out: {0}")]
    ContactOptedOut(String),

    #[error("contact was handed off to a human: {0}")]
    ContactHandedOff(String),

    #[error("workflow is not active: {0}")]
    WorkflowInactive(String),

    #[error("conversation state changed concurrently for contact {0}")]
    StateConflict(String),

    #[error("AI generation failed: {0}")]
    AiGeneration(#[from] AiError),

    #[error("database error: {0}")]
    Database(String),

    #[error("{0}")]
    Unknown(String),
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(contact_id) => ProcessingError::StateConflict(contact_id),
            StoreError::Backend(e) => ProcessingError::database(e),
        }
    }
}

impl ProcessingError {
    pub fn database(err: anyhow::Error) -> Self {
        ProcessingError::Database(format!("{err:#}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::ContactNotFound(_) => ErrorKind::ContactNotFound,
            ProcessingError::ContactOptedOut(_) => ErrorKind::ContactOptedOut,
            ProcessingError::ContactHandedOff(_) => ErrorKind::ContactHandedOff,
            ProcessingError::WorkflowInactive(_) => ErrorKind::WorkflowInactive,
            ProcessingError::StateConflict(_) => ErrorKind::StateConflict,
            ProcessingError::AiGeneration(_) => ErrorKind::AiGenerationFailed,
            ProcessingError::Database(_) => ErrorKind::DatabaseError,
            ProcessingError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Duplicate deliveries that lose the state race are dropped like the
    /// routing errors: the winning run already replied.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AiGenerationFailed | ErrorKind::DatabaseError | ErrorKind::Unknown
        )
    }
}
