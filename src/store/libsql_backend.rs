//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::model::{
    AuditEntry, ConsentRecord, JourneyRecord, OnboardingSession, SessionOwner, Transcript,
    UserProfile, UserRole, VesselRecord,
};
use crate::onboarding::state::OnboardingState;
use crate::store::migrations;
use crate::store::traits::{Database, LinkOutcome};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_sessions(
        &self,
        label: &str,
        sql: &str,
        args: impl libsql::params::IntoParams,
    ) -> Result<Vec<OnboardingSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{label}: {e}")))?;

        let mut sessions = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => sessions.push(row_to_session(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{label}: {e}"))),
            }
        }
        Ok(sessions)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

/// Map a write failure, surfacing unique-index violations as constraints.
fn write_err(label: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{label}: {msg}"))
    } else {
        DatabaseError::Query(format!("{label}: {msg}"))
    }
}

fn role_from_db(s: &str) -> Result<UserRole, DatabaseError> {
    s.parse()
        .map_err(|e: String| DatabaseError::Serialization(format!("role column: {e}")))
}

const SESSION_COLUMNS: &str = "id, role, user_id, anon_id, state, conversation, \
     profile_completion_triggered_at, created_at, updated_at";

/// Map a libsql Row to an OnboardingSession. Column order matches
/// SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<OnboardingSession, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("session row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let role_str: String = row.get(1).map_err(parse)?;
    let user_id: Option<String> = row.get::<String>(2).ok();
    let anon_id: Option<String> = row.get::<String>(3).ok();
    let state_str: String = row.get(4).map_err(parse)?;
    let conversation_str: String = row.get(5).map_err(parse)?;
    let triggered_str: Option<String> = row.get::<String>(6).ok();
    let created_str: String = row.get(7).map_err(parse)?;
    let updated_str: String = row.get(8).map_err(parse)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("session id: {e}")))?;
    let state: OnboardingState = state_str
        .parse()
        .map_err(|e: String| DatabaseError::Serialization(e))?;
    let conversation: Transcript = serde_json::from_str(&conversation_str)
        .map_err(|e| DatabaseError::Serialization(format!("conversation column: {e}")))?;

    Ok(OnboardingSession {
        id,
        role: role_from_db(&role_str)?,
        user_id,
        anon_id,
        state,
        conversation,
        profile_completion_triggered_at: parse_optional_datetime(&triggered_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_consent(row: &libsql::Row) -> Result<ConsentRecord, libsql::Error> {
    let user_id: String = row.get(0)?;
    let privacy: Option<String> = row.get::<String>(1).ok();
    let terms: Option<String> = row.get::<String>(2).ok();
    let ai: i64 = row.get(3)?;
    let completed: Option<String> = row.get::<String>(4).ok();
    let updated: String = row.get(5)?;

    Ok(ConsentRecord {
        user_id,
        privacy_accepted_at: parse_optional_datetime(&privacy),
        terms_accepted_at: parse_optional_datetime(&terms),
        ai_processing_consent: ai != 0,
        completed_at: parse_optional_datetime(&completed),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_profile(row: &libsql::Row) -> Result<UserProfile, libsql::Error> {
    let user_id: String = row.get(0)?;
    let roles_str: String = row.get(3)?;
    let updated: Option<String> = row.get::<String>(6).ok();
    let roles: BTreeSet<String> = serde_json::from_str(&roles_str).unwrap_or_default();

    Ok(UserProfile {
        user_id,
        username: row.get::<String>(1).ok(),
        full_name: row.get::<String>(2).ok(),
        roles,
        bio: row.get::<String>(4).ok(),
        experience_level: row.get::<String>(5).ok(),
        updated_at: parse_optional_datetime(&updated),
    })
}

fn row_to_journey(row: &libsql::Row) -> Result<JourneyRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("journey row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let waypoints_str: String = row.get(6).map_err(parse)?;
    let created: String = row.get(7).map_err(parse)?;
    let departure: Option<String> = row.get::<String>(5).ok();

    Ok(JourneyRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("journey id: {e}")))?,
        owner_id: row.get(1).map_err(parse)?,
        vessel_name: row.get::<String>(2).ok(),
        start_port: row.get(3).map_err(parse)?,
        end_port: row.get(4).map_err(parse)?,
        departure_date: departure.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        waypoints: serde_json::from_str(&waypoints_str).unwrap_or_default(),
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn get_session(
        &self,
        role: UserRole,
        owner: &SessionOwner,
    ) -> Result<Option<OnboardingSession>, DatabaseError> {
        // Live sessions sort ahead of finished ones.
        let sessions = match owner {
            SessionOwner::User(user_id) => {
                self.query_sessions(
                    "get_session",
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM onboarding_sessions \
                         WHERE role = ?1 AND user_id = ?2 \
                         ORDER BY state IN ('completed', 'deleted') ASC, updated_at DESC LIMIT 1"
                    ),
                    params![role.to_string(), user_id.as_str()],
                )
                .await?
            }
            SessionOwner::Anonymous(anon_id) => {
                self.query_sessions(
                    "get_session",
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM onboarding_sessions \
                         WHERE role = ?1 AND anon_id = ?2 AND user_id IS NULL \
                         ORDER BY updated_at DESC LIMIT 1"
                    ),
                    params![role.to_string(), anon_id.as_str()],
                )
                .await?
            }
        };
        Ok(sessions.into_iter().next())
    }

    async fn get_session_by_id(&self, id: Uuid) -> Result<Option<OnboardingSession>, DatabaseError> {
        let sessions = self
            .query_sessions(
                "get_session_by_id",
                &format!("SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        Ok(sessions.into_iter().next())
    }

    async fn put_session(&self, session: &OnboardingSession) -> Result<(), DatabaseError> {
        let conversation = serde_json::to_string(&session.conversation)
            .map_err(|e| DatabaseError::Serialization(format!("put_session: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO onboarding_sessions (id, role, user_id, anon_id, state, conversation, \
                 profile_completion_triggered_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT (id) DO UPDATE SET user_id = ?3, anon_id = ?4, state = ?5, \
                 conversation = ?6, profile_completion_triggered_at = ?7, updated_at = ?9",
                params![
                    session.id.to_string(),
                    session.role.to_string(),
                    opt_text(session.user_id.as_deref()),
                    opt_text(session.anon_id.as_deref()),
                    session.state.to_string(),
                    conversation,
                    opt_datetime(session.profile_completion_triggered_at),
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("put_session", e))?;

        debug!(session = %session.id, state = %session.state, "Session persisted");
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM onboarding_sessions WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_session: {e}")))?;
        debug!(session = %id, "Session deleted");
        Ok(())
    }

    async fn link_anonymous_session(
        &self,
        role: UserRole,
        anon_id: &str,
        user_id: &str,
    ) -> Result<LinkOutcome, DatabaseError> {
        let Some(anonymous) = self
            .get_session(role, &SessionOwner::Anonymous(anon_id.to_string()))
            .await?
        else {
            return Ok(LinkOutcome::NotFound);
        };

        if let Some(existing) = self
            .get_session(role, &SessionOwner::User(user_id.to_string()))
            .await?
            .filter(|s| !s.state.is_terminal())
        {
            warn!(
                role = %role,
                user = user_id,
                existing = %existing.id,
                anonymous = %anonymous.id,
                "User already has a live session; anonymous session left unlinked"
            );
            return Ok(LinkOutcome::Conflict {
                existing: existing.id,
            });
        }

        self.conn()
            .execute(
                "UPDATE onboarding_sessions SET user_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![user_id, Utc::now().to_rfc3339(), anonymous.id.to_string()],
            )
            .await
            .map_err(|e| write_err("link_anonymous_session", e))?;

        info!(session = %anonymous.id, role = %role, user = user_id, "Anonymous session linked");
        Ok(LinkOutcome::Linked {
            session_id: anonymous.id,
        })
    }

    async fn list_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<OnboardingSession>, DatabaseError> {
        self.query_sessions(
            "list_sessions_for_user",
            &format!(
                "SELECT {SESSION_COLUMNS} FROM onboarding_sessions \
                 WHERE user_id = ?1 ORDER BY created_at ASC"
            ),
            params![user_id],
        )
        .await
    }

    // ── Consent ─────────────────────────────────────────────────────

    async fn get_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, privacy_accepted_at, terms_accepted_at, ai_processing_consent, \
                 completed_at, updated_at FROM consent_records WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_consent: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_consent(&row).map_err(|e| {
                DatabaseError::Query(format!("get_consent row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_consent: {e}"))),
        }
    }

    async fn put_consent(&self, record: &ConsentRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO consent_records (user_id, privacy_accepted_at, terms_accepted_at, \
                 ai_processing_consent, completed_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (user_id) DO UPDATE SET privacy_accepted_at = ?2, \
                 terms_accepted_at = ?3, ai_processing_consent = ?4, completed_at = ?5, updated_at = ?6",
                params![
                    record.user_id.as_str(),
                    opt_datetime(record.privacy_accepted_at),
                    opt_datetime(record.terms_accepted_at),
                    record.ai_processing_consent as i64,
                    opt_datetime(record.completed_at),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_consent: {e}")))?;
        Ok(())
    }

    // ── Audit ───────────────────────────────────────────────────────

    async fn archive_transcript(&self, entry: &AuditEntry) -> Result<bool, DatabaseError> {
        let transcript = serde_json::to_string(&entry.transcript)
            .map_err(|e| DatabaseError::Serialization(format!("archive_transcript: {e}")))?;

        let written = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO transcript_audit (id, session_id, user_id, role, transcript, archived_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    entry.session_id.to_string(),
                    opt_text(entry.user_id.as_deref()),
                    entry.role.to_string(),
                    transcript,
                    entry.archived_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("archive_transcript: {e}")))?;

        Ok(written > 0)
    }

    async fn list_audit_entries(&self, session_id: Uuid) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT session_id, user_id, role, transcript, archived_at \
                 FROM transcript_audit WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_audit_entries: {e}")))?;

        let parse = |e: libsql::Error| DatabaseError::Query(format!("audit row parse: {e}"));
        let mut entries = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let role_str: String = row.get(2).map_err(parse)?;
                    let transcript_str: String = row.get(3).map_err(parse)?;
                    let archived: String = row.get(4).map_err(parse)?;
                    entries.push(AuditEntry {
                        session_id,
                        user_id: row.get::<String>(1).ok(),
                        role: role_from_db(&role_str)?,
                        transcript: serde_json::from_str(&transcript_str).map_err(|e| {
                            DatabaseError::Serialization(format!("audit transcript: {e}"))
                        })?,
                        archived_at: parse_datetime(&archived),
                    });
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_audit_entries: {e}"))),
            }
        }
        Ok(entries)
    }

    // ── Profiles and assets ─────────────────────────────────────────

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, username, full_name, roles, bio, experience_level, updated_at \
                 FROM profiles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_profile(&row).map_err(|e| {
                DatabaseError::Query(format!("get_profile row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_profile: {e}"))),
        }
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        let roles = serde_json::to_string(&profile.roles)
            .map_err(|e| DatabaseError::Serialization(format!("upsert_profile: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO profiles (user_id, username, full_name, roles, bio, experience_level, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT (user_id) DO UPDATE SET username = ?2, full_name = ?3, roles = ?4, \
                 bio = ?5, experience_level = ?6, updated_at = ?7",
                params![
                    profile.user_id.as_str(),
                    opt_text(profile.username.as_deref()),
                    opt_text(profile.full_name.as_deref()),
                    roles,
                    opt_text(profile.bio.as_deref()),
                    opt_text(profile.experience_level.as_deref()),
                    opt_datetime(profile.updated_at),
                ],
            )
            .await
            .map_err(|e| write_err("upsert_profile", e))?;
        Ok(())
    }

    async fn insert_vessel(&self, vessel: &VesselRecord) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM vessels WHERE owner_id = ?1 AND lower(name) = lower(?2)",
                params![vessel.owner_id.as_str(), vessel.name.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_vessel: {e}")))?;
        let existing: i64 = match rows.next().await {
            Ok(Some(row)) => row.get(0).unwrap_or(0),
            _ => 0,
        };
        if existing > 0 {
            return Err(DatabaseError::Constraint(format!(
                "a vessel named '{}' already exists",
                vessel.name
            )));
        }

        self.conn()
            .execute(
                "INSERT INTO vessels (id, owner_id, name, make, model, length_ft, home_port, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    vessel.id.to_string(),
                    vessel.owner_id.as_str(),
                    vessel.name.as_str(),
                    opt_text(vessel.make.as_deref()),
                    opt_text(vessel.model.as_deref()),
                    match vessel.length_ft {
                        Some(len) => libsql::Value::Real(len),
                        None => libsql::Value::Null,
                    },
                    opt_text(vessel.home_port.as_deref()),
                    vessel.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("insert_vessel", e))?;

        debug!(vessel = %vessel.id, owner = %vessel.owner_id, "Vessel inserted");
        Ok(())
    }

    async fn count_vessels(&self, owner_id: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM vessels WHERE owner_id = ?1",
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_vessels: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_vessels: {e}"))),
        }
    }

    async fn insert_journey(&self, journey: &JourneyRecord) -> Result<(), DatabaseError> {
        let waypoints = serde_json::to_string(&journey.waypoints)
            .map_err(|e| DatabaseError::Serialization(format!("insert_journey: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO journeys (id, owner_id, vessel_name, start_port, end_port, \
                 departure_date, waypoints, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    journey.id.to_string(),
                    journey.owner_id.as_str(),
                    opt_text(journey.vessel_name.as_deref()),
                    journey.start_port.as_str(),
                    journey.end_port.as_str(),
                    opt_text(
                        journey
                            .departure_date
                            .map(|d| d.format("%Y-%m-%d").to_string())
                            .as_deref()
                    ),
                    waypoints,
                    journey.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("insert_journey", e))?;

        debug!(journey = %journey.id, owner = %journey.owner_id, "Journey inserted");
        Ok(())
    }

    async fn list_journeys(&self, owner_id: &str) -> Result<Vec<JourneyRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, owner_id, vessel_name, start_port, end_port, departure_date, waypoints, created_at \
                 FROM journeys WHERE owner_id = ?1 ORDER BY created_at ASC",
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_journeys: {e}")))?;

        let mut journeys = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => journeys.push(row_to_journey(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_journeys: {e}"))),
            }
        }
        Ok(journeys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Identity;
    use crate::onboarding::model::TranscriptEntry;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn user_session(role: UserRole, user: &str) -> OnboardingSession {
        OnboardingSession::new(role, &Identity::User(user.to_string()))
    }

    fn vessel(owner: &str, name: &str) -> VesselRecord {
        VesselRecord {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            name: name.to_string(),
            make: Some("Beneteau".into()),
            model: Some("Oceanis 38".into()),
            length_ft: Some(38.0),
            home_port: None,
            created_at: Utc::now(),
        }
    }

    // ── Session tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn put_and_get_session_round_trip() {
        let db = test_db().await;
        let mut session = user_session(UserRole::Owner, "u1");
        session.state = OnboardingState::BoatPending;
        session.push(TranscriptEntry::user("hello"));
        session.push(TranscriptEntry::tool_result("create_vessel", "{\"ok\":true}"));
        db.put_session(&session).await.unwrap();

        let fetched = db
            .get_session(UserRole::Owner, &SessionOwner::User("u1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.state, OnboardingState::BoatPending);
        assert_eq!(fetched.conversation, session.conversation);

        assert!(db
            .get_session(UserRole::Prospect, &SessionOwner::User("u1".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn put_session_updates_in_place() {
        let db = test_db().await;
        let mut session = user_session(UserRole::Prospect, "u1");
        db.put_session(&session).await.unwrap();

        session.state = OnboardingState::ConsentPending;
        session.profile_completion_triggered_at = Some(Utc::now());
        db.put_session(&session).await.unwrap();

        let fetched = db.get_session_by_id(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.state, OnboardingState::ConsentPending);
        assert!(fetched.profile_completion_triggered_at.is_some());
        assert_eq!(db.list_sessions_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_live_session_for_role_is_a_constraint() {
        let db = test_db().await;
        db.put_session(&user_session(UserRole::Owner, "u1")).await.unwrap();
        let result = db.put_session(&user_session(UserRole::Owner, "u1")).await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn completed_sessions_do_not_block_new_ones() {
        let db = test_db().await;
        let mut done = user_session(UserRole::Owner, "u1");
        done.state = OnboardingState::Completed;
        db.put_session(&done).await.unwrap();

        let live = user_session(UserRole::Owner, "u1");
        db.put_session(&live).await.unwrap();

        let fetched = db
            .get_session(UserRole::Owner, &SessionOwner::User("u1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, live.id, "live session preferred");
    }

    #[tokio::test]
    async fn delete_session_removes_row() {
        let db = test_db().await;
        let session = user_session(UserRole::Owner, "u1");
        db.put_session(&session).await.unwrap();
        db.delete_session(session.id).await.unwrap();
        assert!(db.get_session_by_id(session.id).await.unwrap().is_none());
    }

    // ── Linking tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn link_anonymous_session_to_user() {
        let db = test_db().await;
        let anon = OnboardingSession::new(UserRole::Owner, &Identity::Anonymous("a1".into()));
        db.put_session(&anon).await.unwrap();

        let outcome = db
            .link_anonymous_session(UserRole::Owner, "a1", "u1")
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::Linked { session_id: anon.id });

        let fetched = db
            .get_session(UserRole::Owner, &SessionOwner::User("u1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, anon.id);
        assert!(db
            .get_session(UserRole::Owner, &SessionOwner::Anonymous("a1".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn link_conflicts_with_existing_live_session() {
        let db = test_db().await;
        let existing = user_session(UserRole::Owner, "u1");
        db.put_session(&existing).await.unwrap();
        let anon = OnboardingSession::new(UserRole::Owner, &Identity::Anonymous("a1".into()));
        db.put_session(&anon).await.unwrap();

        let outcome = db
            .link_anonymous_session(UserRole::Owner, "a1", "u1")
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::Conflict { existing: existing.id });

        let still_anon = db.get_session_by_id(anon.id).await.unwrap().unwrap();
        assert!(still_anon.user_id.is_none());
    }

    #[tokio::test]
    async fn link_without_anonymous_session() {
        let db = test_db().await;
        let outcome = db
            .link_anonymous_session(UserRole::Prospect, "nobody", "u1")
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::NotFound);
    }

    // ── Consent and audit tests ─────────────────────────────────────

    #[tokio::test]
    async fn consent_round_trip() {
        let db = test_db().await;
        assert!(db.get_consent("u1").await.unwrap().is_none());

        let mut record = ConsentRecord::new("u1");
        record.apply(
            crate::onboarding::model::ConsentInput {
                privacy: true,
                terms: true,
                ai_processing: true,
            },
            Utc::now(),
        );
        db.put_consent(&record).await.unwrap();

        let fetched = db.get_consent("u1").await.unwrap().unwrap();
        assert!(fetched.mandatory_complete());
        assert!(fetched.completed_at.is_some());
        assert!(fetched.ai_processing_consent);
    }

    #[tokio::test]
    async fn archive_transcript_is_written_once() {
        let db = test_db().await;
        let mut session = user_session(UserRole::Owner, "u1");
        session.push(TranscriptEntry::user("hi"));
        let entry = AuditEntry {
            session_id: session.id,
            user_id: session.user_id.clone(),
            role: session.role,
            transcript: session.conversation.clone(),
            archived_at: Utc::now(),
        };

        assert!(db.archive_transcript(&entry).await.unwrap());
        assert!(!db.archive_transcript(&entry).await.unwrap());

        let entries = db.list_audit_entries(session.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transcript.len(), 1);
    }

    // ── Profile and asset tests ─────────────────────────────────────

    #[tokio::test]
    async fn profile_upsert_and_get() {
        let db = test_db().await;
        let mut profile = UserProfile {
            user_id: "u1".into(),
            username: Some("sea_dog".into()),
            ..Default::default()
        };
        profile.roles.insert("owner".into());
        db.upsert_profile(&profile).await.unwrap();

        profile.bio = Some("Weekend racer".into());
        db.upsert_profile(&profile).await.unwrap();

        let fetched = db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(fetched.username.as_deref(), Some("sea_dog"));
        assert_eq!(fetched.bio.as_deref(), Some("Weekend racer"));
        assert!(fetched.roles.contains("owner"));
    }

    #[tokio::test]
    async fn taken_username_is_a_constraint() {
        let db = test_db().await;
        db.upsert_profile(&UserProfile {
            user_id: "u1".into(),
            username: Some("sea_dog".into()),
            ..Default::default()
        })
        .await
        .unwrap();
        let result = db
            .upsert_profile(&UserProfile {
                user_id: "u2".into(),
                username: Some("sea_dog".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn duplicate_vessel_name_is_case_insensitive() {
        let db = test_db().await;
        db.insert_vessel(&vessel("u1", "Sea Breeze")).await.unwrap();

        let result = db.insert_vessel(&vessel("u1", "sea breeze")).await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));

        // Another owner may reuse the name.
        db.insert_vessel(&vessel("u2", "Sea Breeze")).await.unwrap();
        assert_eq!(db.count_vessels("u1").await.unwrap(), 1);
        assert_eq!(db.count_vessels("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn journey_insert_and_list() {
        let db = test_db().await;
        let journey = JourneyRecord {
            id: Uuid::new_v4(),
            owner_id: "u1".into(),
            vessel_name: Some("Sea Breeze".into()),
            start_port: "Hamble".into(),
            end_port: "Cherbourg".into(),
            departure_date: NaiveDate::from_ymd_opt(2030, 6, 1),
            waypoints: vec!["Hamble".into(), "Cherbourg".into()],
            created_at: Utc::now(),
        };
        db.insert_journey(&journey).await.unwrap();

        let journeys = db.list_journeys("u1").await.unwrap();
        assert_eq!(journeys.len(), 1);
        assert_eq!(journeys[0].departure_date, journey.departure_date);
        assert_eq!(journeys[0].waypoints, journey.waypoints);
    }

    #[tokio::test]
    async fn local_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("onboarding.db");
        let session = user_session(UserRole::Owner, "u1");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.put_session(&session).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_session_by_id(session.id).await.unwrap().is_some());
    }
}
