//! Error types for the onboarding service.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Consent error: {0}")]
    Consent(#[from] ConsentError),

    #[error("State error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Failure reported by an operation executor.
///
/// The variant decides how the orchestrator recovers: validation failures go
/// back to the model as correctable feedback, duplicates satisfy the step,
/// fatal failures abort the turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Operation failed: {0}")]
    Fatal(String),
}

impl From<DatabaseError> for OperationError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Constraint(msg) => OperationError::Duplicate(msg),
            other => OperationError::Fatal(other.to_string()),
        }
    }
}

/// Consent gate errors.
#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("Consent incomplete for user {user_id}: privacy and terms must both be accepted")]
    Incomplete { user_id: String },
}

/// Illegal onboarding state transitions.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Cannot apply {event} to a {role} session in state {state}")]
    NotApplicable {
        role: String,
        state: String,
        event: String,
    },
}

/// Session lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {id} not found")]
    NotFound { id: Uuid },

    #[error("No onboarding session for {owner}")]
    Missing { owner: String },

    #[error("Authentication required: {0}")]
    Unauthenticated(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
