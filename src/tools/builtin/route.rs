//! `generate_route`: plan the owner's first journey.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::context::OperationContext;
use crate::error::OperationError;
use crate::onboarding::model::JourneyRecord;
use crate::store::Database;
use crate::tools::tool::{Operation, OperationId, ToolOutput, optional_str, require_str};

pub struct GenerateRouteOperation {
    db: Arc<dyn Database>,
}

impl GenerateRouteOperation {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Operation for GenerateRouteOperation {
    fn id(&self) -> OperationId {
        OperationId::GenerateRoute
    }

    fn description(&self) -> &str {
        "Create a journey between two ports. Call this once the user has \
         confirmed where they start, where they are heading, and optionally when."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "start_port": {"type": "string"},
                "end_port": {"type": "string"},
                "departure_date": {"type": "string", "description": "YYYY-MM-DD"},
                "vessel_name": {"type": "string"}
            },
            "required": ["start_port", "end_port"]
        })
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<ToolOutput, OperationError> {
        let start = Instant::now();
        let owner_id = ctx.require_user()?;
        let start_port = require_str(params, "start_port")?;
        let end_port = require_str(params, "end_port")?;
        if start_port.eq_ignore_ascii_case(end_port) {
            return Err(OperationError::Validation(
                "start_port and end_port must differ".to_string(),
            ));
        }

        let departure_date = match optional_str(params, "departure_date") {
            Some(raw) => {
                let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                    OperationError::Validation(format!("departure_date '{raw}' is not YYYY-MM-DD"))
                })?;
                if date < Utc::now().date_naive() {
                    return Err(OperationError::Validation(format!(
                        "departure_date {date} is in the past"
                    )));
                }
                Some(date)
            }
            None => None,
        };

        let journey = JourneyRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            vessel_name: optional_str(params, "vessel_name"),
            start_port: start_port.to_string(),
            end_port: end_port.to_string(),
            departure_date,
            waypoints: vec![start_port.to_string(), end_port.to_string()],
            created_at: Utc::now(),
        };
        self.db.insert_journey(&journey).await?;

        tracing::info!(journey = %journey.id, owner = owner_id, "Journey created");
        Ok(ToolOutput::success(
            serde_json::json!({
                "status": "created",
                "journey_id": journey.id.to_string(),
                "waypoints": journey.waypoints,
                "departure_date": journey.departure_date.map(|d| d.to_string()),
            }),
            start.elapsed(),
        ))
    }
}
