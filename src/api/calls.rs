//! Active call and lead listing endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::call::CallSnapshot;
use crate::lead::LeadRecord;

/// Default number of leads returned
const DEFAULT_LEAD_LIMIT: usize = 20;

/// Upper bound on a single lead listing
const MAX_LEAD_LIMIT: usize = 500;

#[derive(Serialize)]
pub struct CallsResponse {
    pub active: usize,
    pub shutting_down: bool,
    pub calls: Vec<CallSnapshot>,
}

#[derive(Deserialize)]
pub struct LeadsQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct LeadsResponse {
    pub leads: Vec<LeadRecord>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

async fn list_calls(State(state): State<Arc<ApiState>>) -> Json<CallsResponse> {
    let mut calls: Vec<CallSnapshot> = state
        .registry
        .list()
        .iter()
        .map(|handle| handle.snapshot())
        .collect();
    calls.sort_by_key(|c| c.started_at);

    Json(CallsResponse {
        active: calls.len(),
        shutting_down: state.registry.is_shutting_down(),
        calls,
    })
}

async fn list_leads(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<LeadsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEAD_LIMIT)
        .clamp(1, MAX_LEAD_LIMIT);

    match state.leads.recent(limit).await {
        Ok(leads) => Ok(Json(LeadsResponse { leads })),
        Err(e) => {
            tracing::error!(error = %e, "failed to list leads");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// Build calls and leads router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/calls", get(list_calls))
        .route("/leads", get(list_leads))
        .with_state(state)
}
