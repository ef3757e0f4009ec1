//! Consent gate: the mandatory acknowledgement checkpoint.
//!
//! Privacy and terms must both be accepted before any onboarding step past
//! sign-up runs. The AI-processing acknowledgement is optional but decides
//! whether onboarding continues at all; the service acts on it.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ConsentError, DatabaseError, Error};
use crate::onboarding::model::{ConsentInput, ConsentRecord};
use crate::store::Database;

/// What callers may know about a user's consent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentStatus {
    pub mandatory_complete: bool,
    pub ai_consent: bool,
}

impl From<&ConsentRecord> for ConsentStatus {
    fn from(record: &ConsentRecord) -> Self {
        Self {
            mandatory_complete: record.completed_at.is_some(),
            ai_consent: record.ai_processing_consent,
        }
    }
}

/// Result of recording a submission.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub record: ConsentRecord,
    /// This submission completed the mandatory pair for the first time.
    pub first_completion: bool,
}

pub struct ConsentGate {
    db: Arc<dyn Database>,
}

impl ConsentGate {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn status(&self, user_id: &str) -> Result<ConsentStatus, DatabaseError> {
        Ok(self
            .db
            .get_consent(user_id)
            .await?
            .as_ref()
            .map(ConsentStatus::from)
            .unwrap_or_default())
    }

    /// Fold a submission into the stored record and persist it.
    pub async fn record(&self, user_id: &str, input: ConsentInput) -> Result<Recorded, DatabaseError> {
        let mut record = self
            .db
            .get_consent(user_id)
            .await?
            .unwrap_or_else(|| ConsentRecord::new(user_id));
        let first_completion = record.apply(input, Utc::now());
        self.db.put_consent(&record).await?;

        tracing::info!(
            user = user_id,
            mandatory_complete = record.mandatory_complete(),
            ai_consent = record.ai_processing_consent,
            first_completion,
            "Consent recorded"
        );
        Ok(Recorded {
            record,
            first_completion,
        })
    }

    /// Gate check: errors unless the mandatory pair is complete.
    pub async fn require(&self, user_id: &str) -> Result<ConsentStatus, Error> {
        let status = self.status(user_id).await?;
        if !status.mandatory_complete {
            return Err(ConsentError::Incomplete {
                user_id: user_id.to_string(),
            }
            .into());
        }
        Ok(status)
    }
}
