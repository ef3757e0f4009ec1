//! Onboarding data models: sessions, transcripts, consent, profiles, assets.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Identity;

use super::state::OnboardingState;

/// Which onboarding track a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Boat owner: profile, then vessel, then journey.
    Owner,
    /// Prospective crew: profile only.
    Prospect,
}

impl UserRole {
    pub const ALL: [UserRole; 2] = [UserRole::Owner, UserRole::Prospect];

    /// The role label stored on a profile once onboarding for this track
    /// has saved one.
    pub fn profile_role(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Prospect => "crew",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Prospect => write!(f, "prospect"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "prospect" | "crew" => Ok(Self::Prospect),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who a session belongs to before and after sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionOwner {
    User(String),
    Anonymous(String),
}

impl From<&Identity> for SessionOwner {
    fn from(identity: &Identity) -> Self {
        match identity {
            Identity::User(id) => Self::User(id.clone()),
            Identity::Anonymous(id) => Self::Anonymous(id.clone()),
        }
    }
}

impl std::fmt::Display for SessionOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Anonymous(id) => write!(f, "anon:{id}"),
        }
    }
}

/// Lock/lookup key: one in-flight turn per (role, owner).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub role: UserRole,
    pub owner: SessionOwner,
}

/// Discriminates transcript entries. Synthetic turns (tool results and
/// directives) are ordinary entries with their own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    System,
    User,
    Assistant,
    ToolResult,
    Directive,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    pub content: String,
    /// Operation name, for tool-result entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            name: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(EntryKind::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(EntryKind::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Assistant, content)
    }

    pub fn directive(content: impl Into<String>) -> Self {
        Self::new(EntryKind::Directive, content)
    }

    pub fn tool_result(name: &str, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::new(EntryKind::ToolResult, content)
        }
    }
}

/// Append-only conversation log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript(Vec<TranscriptEntry>);

impl Transcript {
    pub fn push(&mut self, entry: TranscriptEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries appended at or after `index`.
    pub fn since(&self, index: usize) -> &[TranscriptEntry] {
        self.0.get(index..).unwrap_or(&[])
    }

    /// The most recent assistant entry strictly before `index`.
    pub fn last_assistant_before(&self, index: usize) -> Option<&TranscriptEntry> {
        self.0
            .get(..index.min(self.0.len()))?
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::Assistant)
    }
}

/// Per-role onboarding progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingSession {
    pub id: Uuid,
    pub role: UserRole,
    /// Null until an anonymous session is linked at sign-in.
    pub user_id: Option<String>,
    /// Client-side identifier used to find the session before sign-in.
    pub anon_id: Option<String>,
    pub state: OnboardingState,
    pub conversation: Transcript,
    /// Set when a returning user resumes AI-assisted profile completion.
    pub profile_completion_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingSession {
    pub fn new(role: UserRole, identity: &Identity) -> Self {
        let now = Utc::now();
        let (user_id, anon_id) = match identity {
            Identity::User(id) => (Some(id.clone()), None),
            Identity::Anonymous(id) => (None, Some(id.clone())),
        };
        Self {
            id: Uuid::new_v4(),
            role,
            user_id,
            anon_id,
            state: OnboardingState::default(),
            conversation: Transcript::default(),
            profile_completion_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The identity operations run as: the linked user if any.
    pub fn identity(&self) -> Identity {
        match (&self.user_id, &self.anon_id) {
            (Some(user), _) => Identity::User(user.clone()),
            (None, Some(anon)) => Identity::Anonymous(anon.clone()),
            (None, None) => Identity::Anonymous(self.id.to_string()),
        }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.conversation.push(entry);
        self.updated_at = Utc::now();
    }

    /// Non-terminal and not a resumed profile completion.
    pub fn is_pending(&self) -> bool {
        !self.state.is_terminal() && self.profile_completion_triggered_at.is_none()
    }

    /// Non-terminal resumed profile completion.
    pub fn is_completion_triggered(&self) -> bool {
        !self.state.is_terminal() && self.profile_completion_triggered_at.is_some()
    }
}

/// Acknowledgements chosen by the user in one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentInput {
    #[serde(default)]
    pub privacy: bool,
    #[serde(default)]
    pub terms: bool,
    #[serde(default)]
    pub ai_processing: bool,
}

/// Per-user legal acknowledgements.
///
/// Invariant: `completed_at` is set if and only if both mandatory
/// timestamps are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub user_id: String,
    pub privacy_accepted_at: Option<DateTime<Utc>>,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub ai_processing_consent: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            privacy_accepted_at: None,
            terms_accepted_at: None,
            ai_processing_consent: false,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn mandatory_complete(&self) -> bool {
        self.privacy_accepted_at.is_some() && self.terms_accepted_at.is_some()
    }

    /// Fold a submission in. Existing timestamps are never cleared.
    /// Returns true when this call completed the mandatory pair.
    pub fn apply(&mut self, input: ConsentInput, now: DateTime<Utc>) -> bool {
        if input.privacy && self.privacy_accepted_at.is_none() {
            self.privacy_accepted_at = Some(now);
        }
        if input.terms && self.terms_accepted_at.is_none() {
            self.terms_accepted_at = Some(now);
        }
        self.ai_processing_consent = input.ai_processing;
        self.updated_at = now;

        if self.completed_at.is_none() && self.mandatory_complete() {
            self.completed_at = Some(now);
            return true;
        }
        false
    }
}

/// Public profile written by `update_profile`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub roles: BTreeSet<String>,
    pub bio: Option<String>,
    pub experience_level: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A boat registered by an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub length_ft: Option<f64>,
    pub home_port: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A planned journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub vessel_name: Option<String>,
    pub start_port: String,
    pub end_port: String,
    pub departure_date: Option<NaiveDate>,
    pub waypoints: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An archived transcript kept after erasure of the live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: Uuid,
    pub user_id: Option<String>,
    pub role: UserRole,
    pub transcript: Transcript,
    pub archived_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_crew_alias() {
        assert_eq!("crew".parse::<UserRole>().unwrap(), UserRole::Prospect);
        assert_eq!("Owner".parse::<UserRole>().unwrap(), UserRole::Owner);
        assert!("captain".parse::<UserRole>().is_err());
    }

    #[test]
    fn new_session_from_anonymous_identity() {
        let session = OnboardingSession::new(UserRole::Owner, &Identity::Anonymous("a1".into()));
        assert_eq!(session.state, OnboardingState::SignupPending);
        assert!(session.user_id.is_none());
        assert_eq!(session.anon_id.as_deref(), Some("a1"));
        assert_eq!(session.identity(), Identity::Anonymous("a1".into()));
        assert!(session.is_pending());
    }

    #[test]
    fn transcript_last_assistant_before() {
        let mut t = Transcript::default();
        t.push(TranscriptEntry::user("hi"));
        t.push(TranscriptEntry::assistant("summary"));
        t.push(TranscriptEntry::user("yes"));
        t.push(TranscriptEntry::assistant("later"));

        assert_eq!(t.last_assistant_before(2).unwrap().content, "summary");
        assert_eq!(t.last_assistant_before(100).unwrap().content, "later");
        assert!(t.last_assistant_before(1).is_none());
        assert_eq!(t.since(2).len(), 2);
        assert!(t.since(10).is_empty());
    }

    #[test]
    fn transcript_serializes_as_plain_array() {
        let mut t = Transcript::default();
        t.push(TranscriptEntry::tool_result("create_vessel", "{}"));
        let json = serde_json::to_value(&t).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["kind"], "tool_result");
        assert_eq!(json[0]["name"], "create_vessel");
    }

    #[test]
    fn consent_completion_requires_both_mandatory() {
        let mut record = ConsentRecord::new("u1");
        let now = Utc::now();

        let first = record.apply(
            ConsentInput {
                privacy: true,
                ..Default::default()
            },
            now,
        );
        assert!(!first);
        assert!(record.completed_at.is_none());

        let second = record.apply(
            ConsentInput {
                terms: true,
                ai_processing: true,
                ..Default::default()
            },
            now,
        );
        assert!(second);
        assert!(record.mandatory_complete());
        assert!(record.completed_at.is_some());
        // privacy timestamp preserved even though this submission omitted it
        assert!(record.privacy_accepted_at.is_some());

        let again = record.apply(
            ConsentInput {
                privacy: true,
                terms: true,
                ai_processing: false,
            },
            now,
        );
        assert!(!again, "completion happens exactly once");
        assert!(!record.ai_processing_consent);
    }
}
