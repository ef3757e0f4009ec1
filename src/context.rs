//! Caller identity and the context handed to operation executors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::onboarding::model::UserRole;

/// Who is talking to the onboarding flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    /// Not signed in yet; keyed by a client-generated session identifier.
    Anonymous(String),
    /// Signed in.
    User(String),
}

impl Identity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            Self::Anonymous(_) => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous(id) => write!(f, "anon:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Context for one operation execution.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub session_id: Uuid,
    pub role: UserRole,
    pub identity: Identity,
}

impl OperationContext {
    pub fn new(session_id: Uuid, role: UserRole, identity: Identity) -> Self {
        Self {
            session_id,
            role,
            identity,
        }
    }

    /// Authenticated user id, or a validation-style message for the model.
    pub fn require_user(&self) -> Result<&str, crate::error::OperationError> {
        self.identity.user_id().ok_or_else(|| {
            crate::error::OperationError::Validation(
                "the user must sign in before this can be saved".to_string(),
            )
        })
    }
}
