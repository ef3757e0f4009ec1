//! Test doubles for onboarding tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{DatabaseError, LlmError};
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role};
use crate::onboarding::model::{
    AuditEntry, ConsentRecord, JourneyRecord, OnboardingSession, SessionOwner, UserProfile,
    UserRole, VesselRecord,
};
use crate::store::{Database, LibSqlBackend, LinkOutcome};

/// Replays canned responses in order and records every request.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Mutex<Duration>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The system message of every request, in order.
    pub fn system_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.messages.iter().find(|m| m.role == Role::System))
            .map(|m| m.content.clone())
            .collect()
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Okay.".to_string());
        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// A well-formed tool-call block.
pub fn tool_call(name: &str, arguments: serde_json::Value) -> String {
    format!(
        "<tool_call>\n{}\n</tool_call>",
        serde_json::json!({"name": name, "arguments": arguments})
    )
}

/// Store wrapper whose reads fail on demand.
pub struct FlakyDb {
    inner: LibSqlBackend,
    failures: AtomicU32,
}

impl FlakyDb {
    pub async fn new() -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            failures: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &LibSqlBackend {
        &self.inner
    }

    /// Fail the next `n` session, profile or vessel-count reads.
    pub fn fail_next_reads(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn check(&self, label: &str) -> Result<(), DatabaseError> {
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(DatabaseError::Query(format!("{label}: injected failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Database for FlakyDb {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn get_session(
        &self,
        role: UserRole,
        owner: &SessionOwner,
    ) -> Result<Option<OnboardingSession>, DatabaseError> {
        self.check("get_session")?;
        self.inner.get_session(role, owner).await
    }

    async fn get_session_by_id(&self, id: Uuid) -> Result<Option<OnboardingSession>, DatabaseError> {
        self.inner.get_session_by_id(id).await
    }

    async fn put_session(&self, session: &OnboardingSession) -> Result<(), DatabaseError> {
        self.inner.put_session(session).await
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.inner.delete_session(id).await
    }

    async fn link_anonymous_session(
        &self,
        role: UserRole,
        anon_id: &str,
        user_id: &str,
    ) -> Result<LinkOutcome, DatabaseError> {
        self.inner.link_anonymous_session(role, anon_id, user_id).await
    }

    async fn list_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<OnboardingSession>, DatabaseError> {
        self.inner.list_sessions_for_user(user_id).await
    }

    async fn get_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>, DatabaseError> {
        self.inner.get_consent(user_id).await
    }

    async fn put_consent(&self, record: &ConsentRecord) -> Result<(), DatabaseError> {
        self.inner.put_consent(record).await
    }

    async fn archive_transcript(&self, entry: &AuditEntry) -> Result<bool, DatabaseError> {
        self.inner.archive_transcript(entry).await
    }

    async fn list_audit_entries(&self, session_id: Uuid) -> Result<Vec<AuditEntry>, DatabaseError> {
        self.inner.list_audit_entries(session_id).await
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        self.check("get_profile")?;
        self.inner.get_profile(user_id).await
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        self.inner.upsert_profile(profile).await
    }

    async fn insert_vessel(&self, vessel: &VesselRecord) -> Result<(), DatabaseError> {
        self.inner.insert_vessel(vessel).await
    }

    async fn count_vessels(&self, owner_id: &str) -> Result<i64, DatabaseError> {
        self.check("count_vessels")?;
        self.inner.count_vessels(owner_id).await
    }

    async fn insert_journey(&self, journey: &JourneyRecord) -> Result<(), DatabaseError> {
        self.inner.insert_journey(journey).await
    }

    async fn list_journeys(&self, owner_id: &str) -> Result<Vec<JourneyRecord>, DatabaseError> {
        self.inner.list_journeys(owner_id).await
    }
}
