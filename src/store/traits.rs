//! `Database` trait: the single async interface for onboarding persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{
    AuditEntry, ConsentRecord, JourneyRecord, OnboardingSession, SessionOwner, UserProfile,
    UserRole, VesselRecord,
};

/// Result of linking an anonymous session at sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The anonymous session now belongs to the user.
    Linked { session_id: Uuid },
    /// The user already owns a live session for this role; the anonymous one
    /// was left alone.
    Conflict { existing: Uuid },
    /// No anonymous session for this role.
    NotFound,
}

/// Backend-agnostic persistence for sessions, consent, audit, profiles and
/// owned assets.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// The most recent session for a (role, owner) pair.
    async fn get_session(
        &self,
        role: UserRole,
        owner: &SessionOwner,
    ) -> Result<Option<OnboardingSession>, DatabaseError>;

    async fn get_session_by_id(&self, id: Uuid) -> Result<Option<OnboardingSession>, DatabaseError>;

    /// Insert or replace. Returns once the write is committed.
    async fn put_session(&self, session: &OnboardingSession) -> Result<(), DatabaseError>;

    async fn delete_session(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Attach the anonymous session for `role` to `user_id`.
    async fn link_anonymous_session(
        &self,
        role: UserRole,
        anon_id: &str,
        user_id: &str,
    ) -> Result<LinkOutcome, DatabaseError>;

    async fn list_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<OnboardingSession>, DatabaseError>;

    // ── Consent ─────────────────────────────────────────────────────

    async fn get_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>, DatabaseError>;

    async fn put_consent(&self, record: &ConsentRecord) -> Result<(), DatabaseError>;

    // ── Audit ───────────────────────────────────────────────────────

    /// Archive a transcript. Returns false if this session was already
    /// archived.
    async fn archive_transcript(&self, entry: &AuditEntry) -> Result<bool, DatabaseError>;

    async fn list_audit_entries(&self, session_id: Uuid) -> Result<Vec<AuditEntry>, DatabaseError>;

    // ── Profiles and assets ─────────────────────────────────────────

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError>;

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;

    /// Insert a vessel. A same-named vessel for the owner is a
    /// `DatabaseError::Constraint`.
    async fn insert_vessel(&self, vessel: &VesselRecord) -> Result<(), DatabaseError>;

    async fn count_vessels(&self, owner_id: &str) -> Result<i64, DatabaseError>;

    async fn insert_journey(&self, journey: &JourneyRecord) -> Result<(), DatabaseError>;

    async fn list_journeys(&self, owner_id: &str) -> Result<Vec<JourneyRecord>, DatabaseError>;
}
