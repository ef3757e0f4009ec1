//! Onboarding system: a step-gated conversation that takes a new owner or
//! crew member from sign-up to a saved profile (and, for owners, a boat and
//! a first journey).
//!
//! The orchestrator runs the model loop, the state machine decides which
//! step a session is in, the consent gate blocks everything past sign-up
//! until the legal acknowledgements are in, and the redirect engine decides
//! where the user goes after any state change.

pub mod consent;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod readiness;
pub mod redirect;
pub mod routes;
pub mod service;
pub mod state;
pub mod steps;

#[cfg(test)]
pub(crate) mod test_support;

pub use consent::{ConsentGate, ConsentStatus};
pub use model::{OnboardingSession, UserRole};
pub use orchestrator::{ConversationOrchestrator, TurnOutcome, TurnStatus};
pub use redirect::{RedirectContext, RedirectDecision, RedirectEngine, ReferralSource};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use service::{ChatReply, ConsentOutcome, OnboardingService};
pub use state::{OnboardingState, StateEvent};
pub use steps::StepAllowList;
