//! Vessel operations: reference lookup and creation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::error::OperationError;
use crate::onboarding::model::VesselRecord;
use crate::store::Database;
use crate::tools::tool::{Operation, OperationId, ToolOutput, optional_str, require_str};

const MAX_LENGTH_FT: f64 = 500.0;

/// Published specs for a production sailboat.
#[derive(Debug, Clone, Copy)]
struct ReferenceBoat {
    make: &'static str,
    model: &'static str,
    length_ft: f64,
    beam_ft: f64,
    draft_ft: f64,
    berths: u8,
    rig: &'static str,
}

static CATALOGUE: &[ReferenceBoat] = &[
    ReferenceBoat { make: "Beneteau", model: "Oceanis 38", length_ft: 37.9, beam_ft: 13.0, draft_ft: 6.4, berths: 6, rig: "sloop" },
    ReferenceBoat { make: "Beneteau", model: "First 27", length_ft: 26.9, beam_ft: 8.9, draft_ft: 5.7, berths: 4, rig: "sloop" },
    ReferenceBoat { make: "Jeanneau", model: "Sun Odyssey 349", length_ft: 33.9, beam_ft: 11.4, draft_ft: 6.4, berths: 6, rig: "sloop" },
    ReferenceBoat { make: "Jeanneau", model: "Sun Fast 3300", length_ft: 32.6, beam_ft: 11.5, draft_ft: 7.2, berths: 4, rig: "sloop" },
    ReferenceBoat { make: "Hallberg-Rassy", model: "340", length_ft: 34.4, beam_ft: 11.3, draft_ft: 5.9, berths: 5, rig: "sloop" },
    ReferenceBoat { make: "Bavaria", model: "Cruiser 37", length_ft: 37.4, beam_ft: 12.8, draft_ft: 6.4, berths: 6, rig: "sloop" },
    ReferenceBoat { make: "Catalina", model: "30", length_ft: 29.9, beam_ft: 10.9, draft_ft: 5.3, berths: 6, rig: "sloop" },
    ReferenceBoat { make: "Hanse", model: "388", length_ft: 37.7, beam_ft: 12.9, draft_ft: 6.4, berths: 6, rig: "self-tacking sloop" },
    ReferenceBoat { make: "Contessa", model: "32", length_ft: 32.0, beam_ft: 9.5, draft_ft: 5.5, berths: 5, rig: "sloop" },
    ReferenceBoat { make: "Lagoon", model: "42", length_ft: 41.3, beam_ft: 25.3, draft_ft: 4.1, berths: 8, rig: "catamaran sloop" },
];

fn lookup(make: &str, model: &str) -> Option<&'static ReferenceBoat> {
    let model = model.to_lowercase();
    CATALOGUE.iter().find(|boat| {
        boat.make.eq_ignore_ascii_case(make)
            && (boat.model.to_lowercase() == model
                || format!("{} {}", boat.make, boat.model).to_lowercase() == model)
    })
}

/// Read-only lookup of published specs.
pub struct FetchReferenceDetailsOperation;

#[async_trait]
impl Operation for FetchReferenceDetailsOperation {
    fn id(&self) -> OperationId {
        OperationId::FetchReferenceDetails
    }

    fn description(&self) -> &str {
        "Look up published specifications for a production sailboat by make and \
         model. Use the result to pre-fill details before confirming the boat \
         with the user."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "make": {"type": "string", "description": "Builder, e.g. Beneteau"},
                "model": {"type": "string", "description": "Model, e.g. Oceanis 38"}
            },
            "required": ["make", "model"]
        })
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        _ctx: &OperationContext,
    ) -> Result<ToolOutput, OperationError> {
        let start = Instant::now();
        let make = require_str(params, "make")?;
        let model = require_str(params, "model")?;

        let result = match lookup(make, model) {
            Some(boat) => serde_json::json!({
                "found": true,
                "make": boat.make,
                "model": boat.model,
                "length_ft": boat.length_ft,
                "beam_ft": boat.beam_ft,
                "draft_ft": boat.draft_ft,
                "berths": boat.berths,
                "rig": boat.rig,
            }),
            None => serde_json::json!({"found": false, "make": make, "model": model}),
        };
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

/// Register the owner's boat.
pub struct CreateVesselOperation {
    db: Arc<dyn Database>,
}

impl CreateVesselOperation {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Operation for CreateVesselOperation {
    fn id(&self) -> OperationId {
        OperationId::CreateVessel
    }

    fn description(&self) -> &str {
        "Create the owner's boat. Call this after the user confirms the summary \
         of their boat's details."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "The boat's name"},
                "make": {"type": "string"},
                "model": {"type": "string"},
                "length_ft": {"type": "number", "description": "Length overall in feet"},
                "home_port": {"type": "string"}
            },
            "required": ["name"]
        })
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<ToolOutput, OperationError> {
        let start = Instant::now();
        let owner_id = ctx.require_user()?;
        let name = require_str(params, "name")?;

        let length_ft = match params.get("length_ft") {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => {
                let len = value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .ok_or_else(|| {
                        OperationError::Validation("length_ft must be a number".to_string())
                    })?;
                if !(len > 0.0 && len <= MAX_LENGTH_FT) {
                    return Err(OperationError::Validation(format!(
                        "length_ft must be greater than 0 and at most {MAX_LENGTH_FT}"
                    )));
                }
                Some(len)
            }
        };

        let vessel = VesselRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            make: optional_str(params, "make"),
            model: optional_str(params, "model"),
            length_ft,
            home_port: optional_str(params, "home_port"),
            created_at: Utc::now(),
        };

        // Constraint → Duplicate via From<DatabaseError>.
        self.db.insert_vessel(&vessel).await?;

        tracing::info!(vessel = %vessel.id, owner = owner_id, "Vessel created");
        Ok(ToolOutput::success(
            serde_json::json!({
                "status": "created",
                "vessel_id": vessel.id.to_string(),
                "name": vessel.name,
            }),
            start.elapsed(),
        ))
    }
}
