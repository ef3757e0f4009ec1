//! Operations the onboarding agent can request.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::{OperationRegistry, OperationSchema};
pub use tool::*;
