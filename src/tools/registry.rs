//! Registry of operation executors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::context::OperationContext;
use crate::error::OperationError;
use crate::tools::tool::{Operation, OperationId, ToolOutput};

/// Schema shown to the model for one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Registry of available operations.
pub struct OperationRegistry {
    operations: RwLock<HashMap<OperationId, Arc<dyn Operation>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
        }
    }

    /// Register an operation, replacing any earlier one with the same id.
    pub async fn register(&self, operation: Arc<dyn Operation>) {
        let id = operation.id();
        if self.operations.write().await.insert(id, operation).is_some() {
            tracing::warn!(operation = %id, "Replaced existing operation registration");
        }
        tracing::debug!("Registered operation: {}", id);
    }

    /// Register an operation (sync version for startup).
    pub fn register_sync(&self, operation: Arc<dyn Operation>) {
        let id = operation.id();
        if let Ok(mut operations) = self.operations.try_write() {
            operations.insert(id, operation);
            tracing::debug!("Registered operation: {}", id);
        }
    }

    pub async fn get(&self, id: OperationId) -> Option<Arc<dyn Operation>> {
        self.operations.read().await.get(&id).cloned()
    }

    pub async fn has(&self, id: OperationId) -> bool {
        self.operations.read().await.contains_key(&id)
    }

    pub async fn list(&self) -> Vec<OperationId> {
        self.operations.read().await.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.operations.try_read().map(|o| o.len()).unwrap_or(0)
    }

    /// Schemas for the given operations, in the order requested.
    pub async fn schemas_for(&self, ids: &[OperationId]) -> Vec<OperationSchema> {
        let operations = self.operations.read().await;
        ids.iter()
            .filter_map(|id| operations.get(id))
            .map(|op| OperationSchema {
                name: op.id().to_string(),
                description: op.description().to_string(),
                parameters: op.parameters_schema(),
            })
            .collect()
    }

    /// Run an operation under a timeout. A missing executor or an expired
    /// timeout is fatal.
    pub async fn execute(
        &self,
        id: OperationId,
        params: &serde_json::Value,
        ctx: &OperationContext,
        timeout: Duration,
    ) -> Result<ToolOutput, OperationError> {
        let operation = self
            .get(id)
            .await
            .ok_or_else(|| OperationError::Fatal(format!("no executor registered for {id}")))?;

        match tokio::time::timeout(timeout, operation.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(OperationError::Fatal(format!(
                "{id} timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Identity;
    use crate::onboarding::model::UserRole;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct MockOperation {
        id: OperationId,
        delay: Duration,
    }

    #[async_trait]
    impl Operation for MockOperation {
        fn id(&self) -> OperationId {
            self.id
        }
        fn description(&self) -> &str {
            "A mock operation for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _params: &serde_json::Value,
            _ctx: &OperationContext,
        ) -> Result<ToolOutput, OperationError> {
            tokio::time::sleep(self.delay).await;
            Ok(ToolOutput::success(
                serde_json::json!({"ok": true}),
                self.delay,
            ))
        }
    }

    fn mock(id: OperationId) -> Arc<dyn Operation> {
        Arc::new(MockOperation {
            id,
            delay: Duration::from_millis(1),
        })
    }

    fn ctx() -> OperationContext {
        OperationContext::new(Uuid::new_v4(), UserRole::Owner, Identity::User("u1".into()))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = OperationRegistry::new();
        registry.register(mock(OperationId::CreateVessel)).await;

        assert!(registry.has(OperationId::CreateVessel).await);
        assert!(!registry.has(OperationId::GenerateRoute).await);
        assert_eq!(
            registry.get(OperationId::CreateVessel).await.unwrap().id(),
            OperationId::CreateVessel
        );
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_schemas_follow_requested_order() {
        let registry = OperationRegistry::new();
        registry.register_sync(mock(OperationId::CreateVessel));
        registry.register_sync(mock(OperationId::FetchReferenceDetails));

        let schemas = registry
            .schemas_for(&[
                OperationId::FetchReferenceDetails,
                OperationId::CreateVessel,
                OperationId::GenerateRoute,
            ])
            .await;
        let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["fetch_reference_details", "create_vessel"]);
    }

    #[tokio::test]
    async fn test_execute_missing_is_fatal() {
        let registry = OperationRegistry::new();
        let result = registry
            .execute(
                OperationId::GenerateRoute,
                &serde_json::json!({}),
                &ctx(),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(OperationError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_execute_timeout_is_fatal() {
        let registry = OperationRegistry::new();
        registry
            .register(Arc::new(MockOperation {
                id: OperationId::CreateVessel,
                delay: Duration::from_millis(200),
            }))
            .await;
        let result = registry
            .execute(
                OperationId::CreateVessel,
                &serde_json::json!({}),
                &ctx(),
                Duration::from_millis(10),
            )
            .await;
        assert!(matches!(result, Err(OperationError::Fatal(msg)) if msg.contains("timed out")));
    }
}
