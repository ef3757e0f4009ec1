//! `update_profile`: save the public profile gathered in conversation.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use crate::context::OperationContext;
use crate::error::{DatabaseError, OperationError};
use crate::onboarding::model::UserProfile;
use crate::store::Database;
use crate::tools::tool::{Operation, OperationId, ToolOutput, optional_str};

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]{3,30}$").expect("static username pattern"));

const EXPERIENCE_LEVELS: &[&str] = &["beginner", "intermediate", "experienced", "professional"];

pub struct UpdateProfileOperation {
    db: Arc<dyn Database>,
}

impl UpdateProfileOperation {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Operation for UpdateProfileOperation {
    fn id(&self) -> OperationId {
        OperationId::UpdateProfile
    }

    fn description(&self) -> &str {
        "Save the user's public profile. Call this once the user has confirmed \
         their details. Provide at least a username or a full name."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "username": {
                    "type": "string",
                    "description": "Lowercase letters, digits and underscores, 3-30 characters"
                },
                "full_name": {
                    "type": "string",
                    "description": "The user's name as they want it shown"
                },
                "bio": {
                    "type": "string",
                    "description": "A short description in the user's own words"
                },
                "experience_level": {
                    "type": "string",
                    "enum": EXPERIENCE_LEVELS,
                    "description": "Sailing experience"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<ToolOutput, OperationError> {
        let start = Instant::now();
        let user_id = ctx.require_user()?;

        let username = optional_str(params, "username").map(|u| u.to_lowercase());
        let full_name = optional_str(params, "full_name");
        if username.is_none() && full_name.is_none() {
            return Err(OperationError::Validation(
                "provide a username or a full_name".to_string(),
            ));
        }
        if let Some(ref name) = username
            && !USERNAME.is_match(name)
        {
            return Err(OperationError::Validation(format!(
                "username '{name}' must be 3-30 lowercase letters, digits or underscores"
            )));
        }
        let experience_level = optional_str(params, "experience_level").map(|l| l.to_lowercase());
        if let Some(ref level) = experience_level
            && !EXPERIENCE_LEVELS.contains(&level.as_str())
        {
            return Err(OperationError::Validation(format!(
                "experience_level must be one of: {}",
                EXPERIENCE_LEVELS.join(", ")
            )));
        }

        let mut profile = self
            .db
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile {
                user_id: user_id.to_string(),
                ..Default::default()
            });

        if username.is_some() {
            profile.username = username;
        }
        if full_name.is_some() {
            profile.full_name = full_name;
        }
        if let Some(bio) = optional_str(params, "bio") {
            profile.bio = Some(bio);
        }
        if experience_level.is_some() {
            profile.experience_level = experience_level;
        }
        profile.roles.insert(ctx.role.profile_role().to_string());
        profile.updated_at = Some(Utc::now());

        // A taken username belongs to someone else: correctable, not a duplicate
        // of this user's own profile.
        self.db
            .upsert_profile(&profile)
            .await
            .map_err(|e| match e {
                DatabaseError::Constraint(_) => OperationError::Validation(format!(
                    "the username '{}' is already taken",
                    profile.username.as_deref().unwrap_or_default()
                )),
                other => other.into(),
            })?;

        tracing::info!(user = user_id, role = %ctx.role, "Profile saved");

        Ok(ToolOutput::success(
            serde_json::json!({
                "status": "saved",
                "username": profile.username,
                "full_name": profile.full_name,
                "roles": profile.roles,
            }),
            start.elapsed(),
        ))
    }
}
