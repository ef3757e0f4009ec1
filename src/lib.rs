//! Crew onboarding: an AI-guided, step-gated onboarding flow for boat owners
//! and prospective crew.

pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod store;
pub mod tools;
