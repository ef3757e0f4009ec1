//! Redirect decision engine.
//!
//! `RedirectEngine::decide` is a pure, total function from a context
//! snapshot to one navigation decision. Checks run in priority order and the
//! first match wins. Missing data never errors; it simply fails to match.
//!
//! `RedirectContextBuilder` takes the snapshot. It must run after any write
//! the decision depends on has been awaited.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RedirectConfig;
use crate::onboarding::model::{OnboardingSession, SessionOwner, UserRole};
use crate::store::{Database, ReadRetry};

/// Query suffix asking the welcome page to resume where the user left off.
pub const RESUME_FLAG: &str = "?resume=true";

/// Priority recorded for a consent decline, which overrides every check.
pub const CONSENT_DECLINED_PRIORITY: u32 = 0;

const FALLBACK_PRIORITY: u32 = 999;

/// Which landing page referred the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralSource {
    Owner,
    Prospect,
}

impl std::str::FromStr for ReferralSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "prospect" | "crew" => Ok(Self::Prospect),
            other => Err(format!("unknown referral source: {other}")),
        }
    }
}

impl From<ReferralSource> for UserRole {
    fn from(source: ReferralSource) -> Self {
        match source {
            ReferralSource::Owner => UserRole::Owner,
            ReferralSource::Prospect => UserRole::Prospect,
        }
    }
}

/// Read-only snapshot the engine decides on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectContext {
    pub user_id: Option<String>,
    pub referral_source: Option<ReferralSource>,
    pub has_pending_owner_session: bool,
    pub has_pending_prospect_session: bool,
    pub owner_profile_completion_triggered: bool,
    pub prospect_profile_completion_triggered: bool,
    pub profile_roles: BTreeSet<String>,
    pub has_profile: bool,
    pub profile_has_username: bool,
    pub has_owned_asset: bool,
    /// Privacy and terms accepted with AI processing refused.
    pub consent_declined: bool,
}

impl RedirectContext {
    fn has_role(&self, role: UserRole) -> bool {
        match role {
            UserRole::Owner => self.profile_roles.contains("owner"),
            UserRole::Prospect => {
                self.profile_roles.contains("crew") || self.profile_roles.contains("prospect")
            }
        }
    }

    /// Fold one role's session into the pending/triggered flags.
    fn note_session(&mut self, session: &OnboardingSession) {
        let pending = session.is_pending();
        let triggered = session.is_completion_triggered();
        match session.role {
            UserRole::Owner => {
                self.has_pending_owner_session |= pending;
                self.owner_profile_completion_triggered |= triggered;
            }
            UserRole::Prospect => {
                self.has_pending_prospect_session |= pending;
                self.prospect_profile_completion_triggered |= triggered;
            }
        }
    }
}

/// Where to go, why, and which check decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectDecision {
    pub path: String,
    pub reason: String,
    pub priority: u32,
}

impl RedirectDecision {
    fn new(path: impl Into<String>, reason: &str, priority: u32) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
            priority,
        }
    }
}

/// Navigation targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectPaths {
    pub owner_welcome: String,
    pub prospect_welcome: String,
    pub asset_management: String,
    pub asset_creation: String,
    pub crew_landing: String,
    pub generic_landing: String,
}

impl Default for RedirectPaths {
    fn default() -> Self {
        Self {
            owner_welcome: "/welcome/owner".to_string(),
            prospect_welcome: "/welcome/crew".to_string(),
            asset_management: "/owner/boats".to_string(),
            asset_creation: "/owner/boats/new".to_string(),
            crew_landing: "/crew".to_string(),
            generic_landing: "/".to_string(),
        }
    }
}

impl RedirectPaths {
    fn welcome(&self, role: UserRole) -> &str {
        match role {
            UserRole::Owner => &self.owner_welcome,
            UserRole::Prospect => &self.prospect_welcome,
        }
    }
}

/// The priority table.
#[derive(Debug, Clone)]
pub struct RedirectEngine {
    paths: RedirectPaths,
    dual_role_preference: UserRole,
}

impl Default for RedirectEngine {
    fn default() -> Self {
        Self::new(&RedirectConfig::default())
    }
}

impl RedirectEngine {
    pub fn new(config: &RedirectConfig) -> Self {
        Self {
            paths: config.paths.clone(),
            dual_role_preference: config.dual_role_preference,
        }
    }

    pub fn paths(&self) -> &RedirectPaths {
        &self.paths
    }

    /// Resolve a check that may match for either role.
    fn choose(&self, owner: bool, prospect: bool) -> Option<UserRole> {
        match (owner, prospect) {
            (true, true) => Some(self.dual_role_preference),
            (true, false) => Some(UserRole::Owner),
            (false, true) => Some(UserRole::Prospect),
            (false, false) => None,
        }
    }

    pub fn decide(&self, ctx: &RedirectContext) -> RedirectDecision {
        // 0: AI processing declined before any role was established. Nothing
        // below may send the user back into onboarding.
        if ctx.consent_declined && !ctx.has_role(UserRole::Owner) && !ctx.has_role(UserRole::Prospect) {
            return self.consent_declined();
        }

        // 1: unfinished onboarding
        if let Some(role) = self.choose(ctx.has_pending_owner_session, ctx.has_pending_prospect_session) {
            let reason = match role {
                UserRole::Owner => "pending_owner_session",
                UserRole::Prospect => "pending_prospect_session",
            };
            return RedirectDecision::new(self.paths.welcome(role), reason, 1);
        }

        // 2: resumed profile completion not yet finished
        if let Some(role) = self.choose(
            ctx.owner_profile_completion_triggered,
            ctx.prospect_profile_completion_triggered,
        ) {
            let reason = match role {
                UserRole::Owner => "owner_profile_completion_triggered",
                UserRole::Prospect => "prospect_profile_completion_triggered",
            };
            return RedirectDecision::new(
                format!("{}{RESUME_FLAG}", self.paths.welcome(role)),
                reason,
                2,
            );
        }

        // 3: referral hint on this request
        if let Some(source) = ctx.referral_source {
            let role = UserRole::from(source);
            let reason = match role {
                UserRole::Owner => "owner_referral",
                UserRole::Prospect => "prospect_referral",
            };
            return RedirectDecision::new(
                format!("{}{RESUME_FLAG}", self.paths.welcome(role)),
                reason,
                3,
            );
        }

        // 4: established role
        if let Some(role) = self.choose(ctx.has_role(UserRole::Owner), ctx.has_role(UserRole::Prospect)) {
            return match role {
                UserRole::Owner if ctx.has_owned_asset => {
                    RedirectDecision::new(&self.paths.asset_management, "owner_with_vessel", 4)
                }
                UserRole::Owner => {
                    RedirectDecision::new(&self.paths.asset_creation, "owner_without_vessel", 4)
                }
                UserRole::Prospect => RedirectDecision::new(&self.paths.crew_landing, "crew_role", 4),
            };
        }

        // 5: signed in without a usable profile
        if ctx.user_id.is_some() && (!ctx.has_profile || !ctx.profile_has_username) {
            return RedirectDecision::new(&self.paths.crew_landing, "profile_incomplete", 5);
        }

        RedirectDecision::new(&self.paths.crew_landing, "fallback", FALLBACK_PRIORITY)
    }

    /// Where a user goes after declining AI processing.
    pub fn consent_declined(&self) -> RedirectDecision {
        RedirectDecision::new(
            &self.paths.generic_landing,
            "consent_declined",
            CONSENT_DECLINED_PRIORITY,
        )
    }
}

/// Builds a fresh [`RedirectContext`] from the store. Reads run
/// concurrently; each retries on its own and degrades to "no match".
pub struct RedirectContextBuilder {
    db: Arc<dyn Database>,
    retry: ReadRetry,
}

impl RedirectContextBuilder {
    pub fn new(db: Arc<dyn Database>, retry: ReadRetry) -> Self {
        Self { db, retry }
    }

    pub async fn build(
        &self,
        user_id: Option<&str>,
        referral_source: Option<ReferralSource>,
    ) -> RedirectContext {
        let mut ctx = RedirectContext {
            user_id: user_id.map(str::to_string),
            referral_source,
            ..Default::default()
        };
        let Some(user_id) = user_id else {
            return ctx;
        };

        let owner = SessionOwner::User(user_id.to_string());
        let (owner_session, prospect_session, profile, vessels, consent) = tokio::join!(
            self.retry
                .read("owner_session", || self.db.get_session(UserRole::Owner, &owner)),
            self.retry
                .read("prospect_session", || self.db.get_session(UserRole::Prospect, &owner)),
            self.retry.read("profile", || self.db.get_profile(user_id)),
            self.retry.read("vessel_count", || self.db.count_vessels(user_id)),
            self.retry.read("consent", || self.db.get_consent(user_id)),
        );

        for (label, session) in [("owner_session", owner_session), ("prospect_session", prospect_session)] {
            match session {
                Ok(Some(session)) => ctx.note_session(&session),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(user = user_id, read = label, error = %e, "Degrading redirect context")
                }
            }
        }

        match profile {
            Ok(Some(profile)) => {
                ctx.has_profile = true;
                ctx.profile_has_username = profile.username.is_some();
                ctx.profile_roles = profile.roles;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(user = user_id, read = "profile", error = %e, "Degrading redirect context")
            }
        }

        match vessels {
            Ok(count) => ctx.has_owned_asset = count > 0,
            Err(e) => {
                tracing::warn!(user = user_id, read = "vessel_count", error = %e, "Degrading redirect context")
            }
        }

        match consent {
            Ok(Some(record)) => {
                ctx.consent_declined = record.mandatory_complete() && !record.ai_processing_consent;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(user = user_id, read = "consent", error = %e, "Degrading redirect context")
            }
        }

        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::context::Identity;
    use crate::onboarding::model::{ConsentInput, ConsentRecord, UserProfile};
    use crate::onboarding::state::OnboardingState;
    use crate::onboarding::test_support::FlakyDb;
    use crate::store::LibSqlBackend;

    fn engine() -> RedirectEngine {
        RedirectEngine::default()
    }

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_context_falls_back() {
        let decision = engine().decide(&RedirectContext::default());
        assert_eq!(decision.priority, 999);
        assert_eq!(decision.path, "/crew");
    }

    #[test]
    fn declined_consent_overrides_onboarding_checks() {
        let ctx = RedirectContext {
            user_id: Some("u1".into()),
            referral_source: Some(ReferralSource::Owner),
            has_pending_owner_session: true,
            consent_declined: true,
            ..Default::default()
        };
        let decision = engine().decide(&ctx);
        assert_eq!(decision.priority, CONSENT_DECLINED_PRIORITY);
        assert_eq!(decision.path, "/");
        assert_eq!(decision.reason, "consent_declined");

        // A finished crew member keeps their landing page.
        let crew = RedirectContext {
            consent_declined: true,
            profile_roles: roles(&["crew"]),
            ..ctx
        };
        assert_eq!(engine().decide(&crew).reason, "crew_role");
    }

    #[test]
    fn pending_owner_session_goes_to_owner_welcome() {
        let ctx = RedirectContext {
            has_pending_owner_session: true,
            ..Default::default()
        };
        let decision = engine().decide(&ctx);
        assert_eq!(decision.priority, 1);
        assert_eq!(decision.path, "/welcome/owner");
    }

    #[test]
    fn lower_priority_wins_when_many_match() {
        let ctx = RedirectContext {
            user_id: Some("u1".into()),
            referral_source: Some(ReferralSource::Owner),
            has_pending_prospect_session: true,
            owner_profile_completion_triggered: true,
            profile_roles: roles(&["owner"]),
            has_owned_asset: true,
            ..Default::default()
        };
        let decision = engine().decide(&ctx);
        assert_eq!(decision.priority, 1);
        assert_eq!(decision.path, "/welcome/crew");
    }

    #[test]
    fn triggered_completion_resumes() {
        let ctx = RedirectContext {
            prospect_profile_completion_triggered: true,
            referral_source: Some(ReferralSource::Owner),
            ..Default::default()
        };
        let decision = engine().decide(&ctx);
        assert_eq!(decision.priority, 2);
        assert_eq!(decision.path, "/welcome/crew?resume=true");
    }

    #[test]
    fn referral_hint() {
        let ctx = RedirectContext {
            referral_source: Some(ReferralSource::Owner),
            profile_roles: roles(&["crew"]),
            ..Default::default()
        };
        let decision = engine().decide(&ctx);
        assert_eq!(decision.priority, 3);
        assert_eq!(decision.path, "/welcome/owner?resume=true");
    }

    #[test]
    fn established_roles() {
        let owner_with = RedirectContext {
            profile_roles: roles(&["owner"]),
            has_owned_asset: true,
            ..Default::default()
        };
        assert_eq!(engine().decide(&owner_with).path, "/owner/boats");

        let owner_without = RedirectContext {
            profile_roles: roles(&["owner"]),
            ..Default::default()
        };
        assert_eq!(engine().decide(&owner_without).path, "/owner/boats/new");

        let crew = RedirectContext {
            profile_roles: roles(&["crew"]),
            ..Default::default()
        };
        let decision = engine().decide(&crew);
        assert_eq!((decision.priority, decision.path.as_str()), (4, "/crew"));
    }

    #[test]
    fn dual_role_tie_break_is_configurable() {
        let ctx = RedirectContext {
            profile_roles: roles(&["owner", "crew"]),
            has_pending_owner_session: false,
            ..Default::default()
        };
        assert_eq!(engine().decide(&ctx).path, "/owner/boats/new");

        let prefer_crew = RedirectEngine::new(&RedirectConfig {
            dual_role_preference: UserRole::Prospect,
            ..RedirectConfig::default()
        });
        assert_eq!(prefer_crew.decide(&ctx).path, "/crew");

        let both_pending = RedirectContext {
            has_pending_owner_session: true,
            has_pending_prospect_session: true,
            ..Default::default()
        };
        assert_eq!(prefer_crew.decide(&both_pending).path, "/welcome/crew");
        assert_eq!(engine().decide(&both_pending).path, "/welcome/owner");
    }

    #[test]
    fn signed_in_without_username() {
        let ctx = RedirectContext {
            user_id: Some("u1".into()),
            has_profile: true,
            profile_has_username: false,
            ..Default::default()
        };
        let decision = engine().decide(&ctx);
        assert_eq!(decision.priority, 5);
        assert_eq!(decision.reason, "profile_incomplete");

        let complete = RedirectContext {
            profile_has_username: true,
            ..ctx
        };
        assert_eq!(engine().decide(&complete).priority, 999);
    }

    #[test]
    fn decide_is_deterministic() {
        let ctx = RedirectContext {
            user_id: Some("u1".into()),
            owner_profile_completion_triggered: true,
            ..Default::default()
        };
        let e = engine();
        let first = e.decide(&ctx);
        for _ in 0..10 {
            assert_eq!(e.decide(&ctx), first);
        }
    }

    #[test]
    fn consent_declined_goes_to_generic_landing() {
        let decision = engine().consent_declined();
        assert_eq!(decision.path, "/");
        assert_eq!(decision.priority, 0);
    }

    #[test]
    fn context_deserializes_from_partial_json() {
        let ctx: RedirectContext =
            serde_json::from_str(r#"{"has_pending_owner_session": true}"#).unwrap();
        assert!(ctx.has_pending_owner_session);
        assert!(ctx.user_id.is_none());
    }

    // ── Builder ─────────────────────────────────────────────────────

    fn fast_retry() -> ReadRetry {
        ReadRetry::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn builder_reads_store() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut owner = OnboardingSession::new(UserRole::Owner, &Identity::User("u1".into()));
        owner.state = OnboardingState::BoatPending;
        db.put_session(&owner).await.unwrap();

        let mut prospect = OnboardingSession::new(UserRole::Prospect, &Identity::User("u1".into()));
        prospect.state = OnboardingState::ProfilePending;
        prospect.profile_completion_triggered_at = Some(chrono::Utc::now());
        db.put_session(&prospect).await.unwrap();

        let mut profile = UserProfile {
            user_id: "u1".into(),
            username: Some("skipper".into()),
            ..Default::default()
        };
        profile.roles.insert("owner".into());
        db.upsert_profile(&profile).await.unwrap();

        let builder = RedirectContextBuilder::new(db, fast_retry());
        let ctx = builder.build(Some("u1"), None).await;
        assert!(ctx.has_pending_owner_session);
        assert!(!ctx.has_pending_prospect_session);
        assert!(ctx.prospect_profile_completion_triggered);
        assert!(ctx.has_profile && ctx.profile_has_username);
        assert!(!ctx.has_owned_asset);
        assert_eq!(engine().decide(&ctx).priority, 1);
    }

    #[tokio::test]
    async fn completed_sessions_are_not_pending() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut done = OnboardingSession::new(UserRole::Owner, &Identity::User("u1".into()));
        done.state = OnboardingState::Completed;
        db.put_session(&done).await.unwrap();

        let ctx = RedirectContextBuilder::new(db, fast_retry())
            .build(Some("u1"), None)
            .await;
        assert!(!ctx.has_pending_owner_session);
        assert_eq!(engine().decide(&ctx).priority, 5);
    }

    #[tokio::test]
    async fn builder_reads_declined_consent() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut record = ConsentRecord::new("u1");
        record.apply(
            ConsentInput {
                privacy: true,
                terms: true,
                ai_processing: false,
            },
            chrono::Utc::now(),
        );
        db.put_consent(&record).await.unwrap();

        let ctx = RedirectContextBuilder::new(db, fast_retry())
            .build(Some("u1"), None)
            .await;
        assert!(ctx.consent_declined);
        assert_eq!(engine().decide(&ctx).path, "/");
    }

    #[tokio::test]
    async fn anonymous_context_only_carries_referral() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let ctx = RedirectContextBuilder::new(db, fast_retry())
            .build(None, Some(ReferralSource::Prospect))
            .await;
        assert_eq!(engine().decide(&ctx).path, "/welcome/crew?resume=true");
    }

    #[tokio::test]
    async fn transient_read_failure_is_retried() {
        let flaky = Arc::new(FlakyDb::new().await);
        let mut owner = OnboardingSession::new(UserRole::Owner, &Identity::User("u1".into()));
        owner.state = OnboardingState::ProfilePending;
        flaky.inner().put_session(&owner).await.unwrap();
        flaky.fail_next_reads(1);

        let ctx = RedirectContextBuilder::new(flaky, fast_retry())
            .build(Some("u1"), None)
            .await;
        assert!(ctx.has_pending_owner_session);
    }

    #[tokio::test]
    async fn persistent_read_failure_degrades() {
        let flaky = Arc::new(FlakyDb::new().await);
        flaky.fail_next_reads(u32::MAX);

        let ctx = RedirectContextBuilder::new(flaky, fast_retry())
            .build(Some("u1"), Some(ReferralSource::Owner))
            .await;
        assert!(!ctx.has_pending_owner_session);
        assert!(!ctx.has_profile);
        assert_eq!(engine().decide(&ctx).priority, 3);
    }
}
