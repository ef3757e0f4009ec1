//! Operation trait and shared helpers for executors.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::OperationContext;
use crate::error::OperationError;

/// Every operation the model may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationId {
    UpdateProfile,
    FetchReferenceDetails,
    CreateVessel,
    GenerateRoute,
}

impl OperationId {
    pub const ALL: [OperationId; 4] = [
        OperationId::UpdateProfile,
        OperationId::FetchReferenceDetails,
        OperationId::CreateVessel,
        OperationId::GenerateRoute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateProfile => "update_profile",
            Self::FetchReferenceDetails => "fetch_reference_details",
            Self::CreateVessel => "create_vessel",
            Self::GenerateRoute => "generate_route",
        }
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation: {s}"))
    }
}

/// Output from a successful execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }
}

/// A named, schema-constrained side effect the model can request.
#[async_trait]
pub trait Operation: Send + Sync {
    fn id(&self) -> OperationId;

    fn description(&self) -> &str;

    /// JSON schema for the `arguments` object.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<ToolOutput, OperationError>;
}

/// Extract a required, non-blank string parameter.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, OperationError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OperationError::Validation(format!("missing '{key}' parameter")))
}

/// Extract an optional string parameter. Blank strings count as absent.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
