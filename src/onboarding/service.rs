//! Onboarding service: ties sessions, consent, the orchestrator and
//! redirects together.
//!
//! Every write a later read depends on is awaited before that read is
//! built. Turns for the same session are serialized through
//! [`SessionLocks`]; redirect requests for a user who is mid-sign-in wait on
//! the [`ReadinessBoard`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::context::Identity;
use crate::error::{Result, SessionError};
use crate::llm::LlmProvider;
use crate::onboarding::consent::{ConsentGate, ConsentStatus};
use crate::onboarding::lock::SessionLocks;
use crate::onboarding::model::{
    AuditEntry, ConsentInput, OnboardingSession, SessionKey, SessionOwner, UserRole,
};
use crate::onboarding::orchestrator::{ConversationOrchestrator, TurnOutcome, TurnStatus};
use crate::onboarding::readiness::ReadinessBoard;
use crate::onboarding::redirect::{
    RedirectContextBuilder, RedirectDecision, RedirectEngine, ReferralSource,
};
use crate::onboarding::state::{OnboardingState, StateEvent};
use crate::store::{Database, LinkOutcome, ReadRetry};
use crate::tools::OperationRegistry;

/// Shown instead of running a turn while consent is outstanding.
pub const CONSENT_REQUIRED_REPLY: &str =
    "Before we continue, please review and accept the privacy policy and terms of service.";

/// Shown to a user who declined AI processing. No session is kept for them.
pub const AI_DECLINED_REPLY: &str =
    "You chose not to allow AI processing, so assisted onboarding is turned off. You can still set up your account manually.";

/// Reply to one chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub state: OnboardingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TurnStatus>,
    pub consent_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectDecision>,
}

/// A turn run on the user's behalf right after consent.
#[derive(Debug, Clone, Serialize)]
pub struct ResumedTurn {
    pub role: UserRole,
    pub reply: String,
    pub state: OnboardingState,
    pub status: TurnStatus,
}

/// What a consent submission led to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsentOutcome {
    /// Privacy or terms still missing.
    Pending { status: ConsentStatus },
    /// AI processing declined at first completion: sessions archived and
    /// removed.
    Declined { redirect: RedirectDecision },
    /// Consent accepted; waiting sessions advanced and resumed.
    Resumed {
        turns: Vec<ResumedTurn>,
        redirect: RedirectDecision,
    },
    /// Recorded with nothing waiting on it.
    Updated { status: ConsentStatus },
}

/// Externally visible shape of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub role: UserRole,
    pub user_id: Option<String>,
    pub state: OnboardingState,
    pub turns: usize,
    pub profile_completion_triggered_at: Option<DateTime<Utc>>,
}

impl From<&OnboardingSession> for SessionSummary {
    fn from(session: &OnboardingSession) -> Self {
        Self {
            id: session.id,
            role: session.role,
            user_id: session.user_id.clone(),
            state: session.state,
            turns: session.conversation.len(),
            profile_completion_triggered_at: session.profile_completion_triggered_at,
        }
    }
}

pub struct OnboardingService {
    db: Arc<dyn Database>,
    orchestrator: ConversationOrchestrator,
    consent: ConsentGate,
    engine: RedirectEngine,
    contexts: RedirectContextBuilder,
    retry: ReadRetry,
    locks: SessionLocks,
    readiness: ReadinessBoard,
    auth_wait: Duration,
}

impl OnboardingService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        operations: Arc<OperationRegistry>,
        db: Arc<dyn Database>,
        config: &AppConfig,
    ) -> Self {
        let retry = ReadRetry::from(&config.retry);
        Self {
            orchestrator: ConversationOrchestrator::new(
                llm,
                operations,
                db.clone(),
                config.orchestrator.clone(),
            ),
            consent: ConsentGate::new(db.clone()),
            engine: RedirectEngine::new(&config.redirect),
            contexts: RedirectContextBuilder::new(db.clone(), retry),
            retry,
            locks: SessionLocks::new(),
            readiness: ReadinessBoard::new(),
            auth_wait: config.redirect.auth_wait,
            db,
        }
    }

    // ── Chat ────────────────────────────────────────────────────────

    /// Process one user message for a role's session.
    pub async fn handle_message(
        &self,
        role: UserRole,
        identity: &Identity,
        message: &str,
    ) -> Result<ChatReply> {
        let key = SessionKey {
            role,
            owner: SessionOwner::from(identity),
        };
        let _guard = self.locks.lock(&key).await;

        let consent = match identity.user_id() {
            Some(user_id) => Some(self.consent.status(user_id).await?),
            None => None,
        };
        if let (Some(user_id), Some(status)) = (identity.user_id(), consent)
            && status.mandatory_complete
            && !status.ai_consent
        {
            return self.declined_reply(role, user_id).await;
        }

        let mut session = self.load_or_create(role, identity).await?;

        if session.state != OnboardingState::SignupPending {
            let status = consent.ok_or_else(|| {
                SessionError::Unauthenticated(format!("{role} onboarding past sign-up"))
            })?;
            if !self.consent_settled(&mut session, status).await? {
                return Ok(ChatReply {
                    reply: CONSENT_REQUIRED_REPLY.to_string(),
                    state: session.state,
                    status: None,
                    consent_required: true,
                    redirect: None,
                });
            }
        }

        let outcome = self.orchestrator.handle_turn(&mut session, message, identity).await;

        // The orchestrator has persisted every transition by now.
        let redirect = match identity.user_id() {
            Some(user_id) if !outcome.transitions.is_empty() => {
                Some(self.decide(Some(user_id), None).await)
            }
            _ => None,
        };

        Ok(ChatReply {
            reply: outcome.reply,
            state: outcome.state,
            status: Some(outcome.status),
            consent_required: false,
            redirect,
        })
    }

    async fn load_or_create(&self, role: UserRole, identity: &Identity) -> Result<OnboardingSession> {
        let owner = SessionOwner::from(identity);
        if let Some(session) = self.db.get_session(role, &owner).await? {
            return Ok(session);
        }

        let mut session = OnboardingSession::new(role, identity);
        // A signed-in user starting fresh has already passed sign-up.
        if identity.is_authenticated() {
            session.state = session.state.apply(role, StateEvent::Authenticated)?;
        }
        self.db.put_session(&session).await?;
        tracing::info!(session = %session.id, %role, owner = %owner, state = %session.state, "Onboarding session created");
        Ok(session)
    }

    /// The consent gate. Returns false when the turn must not run. A session
    /// still waiting in consent_pending is advanced here if consent arrived
    /// without being applied. Declined AI processing never reaches here.
    async fn consent_settled(&self, session: &mut OnboardingSession, status: ConsentStatus) -> Result<bool> {
        if !status.mandatory_complete {
            return Ok(false);
        }
        if session.state == OnboardingState::ConsentPending {
            self.advance(session, StateEvent::ConsentAccepted).await?;
        }
        Ok(true)
    }

    /// No AI turn runs and no session is created for a user who declined
    /// AI processing.
    async fn declined_reply(&self, role: UserRole, user_id: &str) -> Result<ChatReply> {
        let state = self
            .db
            .get_session(role, &SessionOwner::User(user_id.to_string()))
            .await?
            .map_or(OnboardingState::Deleted, |session| session.state);
        tracing::info!(user = user_id, %role, %state, "AI processing declined; turn not run");
        Ok(ChatReply {
            reply: AI_DECLINED_REPLY.to_string(),
            state,
            status: None,
            consent_required: false,
            redirect: Some(self.decide(Some(user_id), None).await),
        })
    }

    /// Apply an event and persist it before returning.
    async fn advance(&self, session: &mut OnboardingSession, event: StateEvent) -> Result<()> {
        let from = session.state;
        session.state = from.apply(session.role, event)?;
        session.updated_at = Utc::now();
        if let Err(e) = self.db.put_session(session).await {
            session.state = from;
            return Err(e.into());
        }
        tracing::info!(session = %session.id, %from, to = %session.state, cause = %event, "Onboarding state advanced");
        Ok(())
    }

    // ── Sign-in ─────────────────────────────────────────────────────

    /// Link anonymous sessions to the user, move them past sign-up, then
    /// decide where the user goes. Concurrent redirect requests for the same
    /// user wait until this is committed.
    pub async fn authenticate(
        &self,
        user_id: &str,
        anon_id: Option<&str>,
        referral: Option<ReferralSource>,
    ) -> Result<RedirectDecision> {
        self.readiness.begin(user_id).await;
        let linked = self.link_sessions(user_id, anon_id).await;
        self.readiness.finish(user_id).await;
        linked?;

        Ok(self.decide(Some(user_id), referral).await)
    }

    async fn link_sessions(&self, user_id: &str, anon_id: Option<&str>) -> Result<()> {
        let user = SessionOwner::User(user_id.to_string());
        let consent = self.consent.status(user_id).await?;
        let declined = consent.mandatory_complete && !consent.ai_consent;
        for role in UserRole::ALL {
            if let Some(anon_id) = anon_id {
                let anon_key = SessionKey {
                    role,
                    owner: SessionOwner::Anonymous(anon_id.to_string()),
                };
                let _anon_guard = self.locks.lock(&anon_key).await;
                match self.db.link_anonymous_session(role, anon_id, user_id).await? {
                    LinkOutcome::Linked { session_id } => {
                        // The link may not be visible to the next read yet.
                        self.retry
                            .read_until(
                                "linked_session",
                                || self.db.get_session_by_id(session_id),
                                |s| s.as_ref().is_some_and(|s| s.user_id.as_deref() == Some(user_id)),
                            )
                            .await?;
                        tracing::info!(%session_id, %role, user = user_id, "Linked anonymous session");
                    }
                    LinkOutcome::Conflict { existing } => {
                        tracing::info!(%existing, %role, user = user_id, "User already has a session; anonymous one left alone");
                    }
                    LinkOutcome::NotFound => {}
                }
            }

            let _guard = self
                .locks
                .lock(&SessionKey {
                    role,
                    owner: user.clone(),
                })
                .await;
            if let Some(mut session) = self.db.get_session(role, &user).await? {
                if session.state == OnboardingState::SignupPending {
                    self.advance(&mut session, StateEvent::Authenticated).await?;
                }
                // Anonymous chat after an earlier decline is not kept either.
                if declined && session.state == OnboardingState::ConsentPending {
                    self.erase(session).await?;
                }
            }
        }
        Ok(())
    }

    // ── Consent ─────────────────────────────────────────────────────

    pub async fn consent_status(&self, user_id: &str) -> Result<ConsentStatus> {
        Ok(self.consent.status(user_id).await?)
    }

    /// Record a consent submission and act on it.
    pub async fn record_consent(&self, user_id: &str, input: ConsentInput) -> Result<ConsentOutcome> {
        let recorded = self.consent.record(user_id, input).await?;
        let status = ConsentStatus::from(&recorded.record);
        if !status.mandatory_complete {
            return Ok(ConsentOutcome::Pending { status });
        }

        let waiting: Vec<OnboardingSession> = self
            .db
            .list_sessions_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.state == OnboardingState::ConsentPending)
            .collect();

        if recorded.first_completion && !status.ai_consent {
            for session in waiting {
                self.erase(session).await?;
            }
            let redirect = self.engine.consent_declined();
            tracing::info!(user = user_id, path = %redirect.path, "AI processing declined; onboarding ended");
            return Ok(ConsentOutcome::Declined { redirect });
        }

        if waiting.is_empty() || !status.ai_consent {
            return Ok(ConsentOutcome::Updated { status });
        }

        let identity = Identity::User(user_id.to_string());
        let mut turns = Vec::with_capacity(waiting.len());
        for session in waiting {
            let key = SessionKey {
                role: session.role,
                owner: SessionOwner::User(user_id.to_string()),
            };
            let _guard = self.locks.lock(&key).await;
            // Re-read under the lock; a concurrent turn may have moved it.
            let Some(mut session) = self.db.get_session_by_id(session.id).await? else {
                continue;
            };
            if session.state != OnboardingState::ConsentPending {
                continue;
            }
            self.advance(&mut session, StateEvent::ConsentAccepted).await?;
            let outcome: TurnOutcome = self.orchestrator.resume(&mut session, &identity).await;
            turns.push(ResumedTurn {
                role: session.role,
                reply: outcome.reply,
                state: outcome.state,
                status: outcome.status,
            });
        }

        let redirect = self.decide(Some(user_id), None).await;
        Ok(ConsentOutcome::Resumed { turns, redirect })
    }

    /// Archive the transcript, then delete the session. The archive is
    /// written first so a failed delete never loses the transcript.
    async fn erase(&self, mut session: OnboardingSession) -> Result<()> {
        session.state = session.state.apply(session.role, StateEvent::ConsentRejected)?;
        let entry = AuditEntry {
            session_id: session.id,
            user_id: session.user_id.clone(),
            role: session.role,
            transcript: session.conversation.clone(),
            archived_at: Utc::now(),
        };
        if !self.db.archive_transcript(&entry).await? {
            tracing::debug!(session = %session.id, "Transcript already archived");
        }
        self.db.delete_session(session.id).await?;
        tracing::info!(session = %session.id, role = %session.role, "Session archived and deleted");
        Ok(())
    }

    // ── Profile completion ──────────────────────────────────────────

    /// Mark a returning user's unfinished session as resumed profile
    /// completion. Redirects then send them back with the resume flag.
    pub async fn trigger_profile_completion(&self, role: UserRole, user_id: &str) -> Result<SessionSummary> {
        let owner = SessionOwner::User(user_id.to_string());
        let _guard = self
            .locks
            .lock(&SessionKey {
                role,
                owner: owner.clone(),
            })
            .await;

        let mut session = self
            .db
            .get_session(role, &owner)
            .await?
            .ok_or_else(|| SessionError::Missing {
                owner: format!("{role} {owner}"),
            })?;
        self.consent.require(user_id).await?;

        if !session.state.is_terminal() && session.profile_completion_triggered_at.is_none() {
            let now = Utc::now();
            session.profile_completion_triggered_at = Some(now);
            session.updated_at = now;
            self.db.put_session(&session).await?;
            tracing::info!(session = %session.id, %role, state = %session.state, "Profile completion triggered");
        }
        Ok(SessionSummary::from(&session))
    }

    // ── Redirects ───────────────────────────────────────────────────

    /// Navigation decision for a request. Waits for an in-flight sign-in for
    /// this user before reading.
    pub async fn redirect(&self, user_id: Option<&str>, referral: Option<ReferralSource>) -> RedirectDecision {
        if let Some(user_id) = user_id {
            self.readiness.wait(user_id, self.auth_wait).await;
        }
        self.decide(user_id, referral).await
    }

    /// Build a fresh context and decide.
    async fn decide(&self, user_id: Option<&str>, referral: Option<ReferralSource>) -> RedirectDecision {
        let ctx = self.contexts.build(user_id, referral).await;
        let decision = self.engine.decide(&ctx);
        tracing::info!(
            user = user_id.unwrap_or("anonymous"),
            path = %decision.path,
            reason = %decision.reason,
            priority = decision.priority,
            "Redirect decided"
        );
        decision
    }
}
