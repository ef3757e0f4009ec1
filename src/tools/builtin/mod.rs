//! Built-in operations backed by the onboarding store.

pub mod profile;
pub mod route;
pub mod vessel;

use std::sync::Arc;

use crate::store::Database;
use crate::tools::registry::OperationRegistry;

pub use profile::UpdateProfileOperation;
pub use route::GenerateRouteOperation;
pub use vessel::{CreateVesselOperation, FetchReferenceDetailsOperation};

/// Register every built-in operation.
pub fn register_builtin_operations(registry: &OperationRegistry, db: Arc<dyn Database>) {
    registry.register_sync(Arc::new(UpdateProfileOperation::new(db.clone())));
    registry.register_sync(Arc::new(FetchReferenceDetailsOperation));
    registry.register_sync(Arc::new(CreateVesselOperation::new(db.clone())));
    registry.register_sync(Arc::new(GenerateRouteOperation::new(db)));
}
