//! Request/response types and handlers for the enrichment API.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use sleuth_core::{EnrichmentResult, FactValue, ResearchIntensity, VariableHint};
use sleuth_runtime::{run_research, ResearchRequest, Services};
use sleuth_store::TrustedFactUpdate;

/// Wire format of `POST /api/enrich`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Vec<VariableHint>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub research_intensity: Option<ResearchIntensity>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
}

/// Operator feedback applied as a trusted fact before the run.
#[derive(Debug, Deserialize)]
pub struct Correction {
    pub entity: String,
    pub field: String,
    pub value: FactValue,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Validate the request shape beyond what serde enforces.
pub fn validate_request(request: &EnrichRequest) -> Vec<String> {
    let mut details = Vec::new();
    if request.query.trim().len() < 2 {
        details.push("query must be at least 2 characters".to_string());
    }
    for (i, correction) in request.corrections.iter().enumerate() {
        if correction.entity.trim().is_empty() {
            details.push(format!("corrections[{i}].entity must not be empty"));
        }
        if correction.field.trim().is_empty() {
            details.push(format!("corrections[{i}].field must not be empty"));
        }
    }
    details
}

pub fn router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/enrich", post(enrich))
        .with_state(services)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn enrich(
    State(services): State<Arc<Services>>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<EnrichmentResult>, (StatusCode, Json<ErrorBody>)> {
    let request: EnrichRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "invalid request".to_string(),
                    details: vec![e.to_string()],
                }),
            ))
        }
    };
    let details = validate_request(&request);
    if !details.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "invalid request".to_string(),
                details,
            }),
        ));
    }

    // Corrections are operator assertions: an unknown entity named by one is
    // created so the trusted fact has somewhere to land. Individual failures
    // are logged, never fatal.
    for correction in &request.corrections {
        if services
            .db
            .try_resolve_existing(&correction.entity)
            .ok()
            .flatten()
            .is_none()
        {
            if let Err(e) = services.db.resolve_entity(&correction.entity, "other") {
                warn!(entity = %correction.entity, error = %e, "could not create corrected entity");
                continue;
            }
        }
        let update = TrustedFactUpdate {
            entity: correction.entity.clone(),
            field: correction.field.clone(),
            value: correction.value.clone(),
            source: correction.source.clone(),
            updated_by: request.username.clone(),
        };
        if let Err(e) = services.db.set_trusted_fact(&update) {
            warn!(entity = %correction.entity, field = %correction.field, error = %e,
                  "failed to apply correction");
        }
    }

    let research = ResearchRequest {
        query: request.query,
        variables: request.variables,
        session_id: request.session_id,
        username: request.username,
        entity: request.entity,
        intensity: request.research_intensity.unwrap_or_default(),
    };

    match run_research(&services, research).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            warn!(error = %e, "enrichment run failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: format!("enrichment failed: {e}"),
                    details: Vec::new(),
                }),
            ))
        }
    }
}
