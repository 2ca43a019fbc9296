//! HTTP management API for the rule set.
//!
//! Routes:
//! - `GET /api/rules` lists rules in file notation
//! - `POST /api/rules` adds `{"domain": "..."}`
//! - `DELETE /api/rules` removes `{"domain": "..."}`
//! - `POST /api/reload` reloads from the rule source
//!
//! Mutations touch the rule file, so they run on the blocking pool.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::error::RuleError;
use crate::filter::RuleSet;

#[derive(Clone)]
pub struct ApiState {
    pub rules: Arc<RuleSet>,
}

/// Body of rule add/remove requests.
#[derive(Debug, Default, Deserialize)]
pub struct RuleRequest {
    pub domain: Option<String>,
}

pub enum ApiError {
    MissingDomain,
    Rule(RuleError),
    Internal(String),
}

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        Self::Rule(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingDomain => (StatusCode::BAD_REQUEST, "domain required".to_string()),
            ApiError::Rule(e @ RuleError::Invalid(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Rule(e @ RuleError::Source { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn create_api_routes(rules: Arc<RuleSet>) -> Router {
    Router::new()
        .route("/api/rules", get(list_rules).post(add_rule).delete(remove_rule))
        .route("/api/reload", post(reload_rules))
        .with_state(ApiState { rules })
}

#[instrument(skip(state), name = "api_list_rules")]
async fn list_rules(State(state): State<ApiState>) -> Json<Vec<String>> {
    let rules = state.rules.snapshot();
    debug!(count = rules.len(), "Rules listed");
    Json(rules)
}

#[instrument(skip(state, body), name = "api_add_rule")]
async fn add_rule(State(state): State<ApiState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let domain = required_domain(&body)?;
    let rules = state.rules.clone();

    let changed = run_blocking({
        let domain = domain.clone();
        move || rules.add(&domain)
    })
    .await?;

    info!(%domain, changed, "Rule added");
    Ok(Json(json!({ "ok": true })))
}

#[instrument(skip(state, body), name = "api_remove_rule")]
async fn remove_rule(State(state): State<ApiState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let domain = required_domain(&body)?;
    let rules = state.rules.clone();

    let changed = run_blocking({
        let domain = domain.clone();
        move || rules.remove(&domain)
    })
    .await?;

    info!(%domain, changed, "Rule removed");
    Ok(Json(json!({ "ok": true })))
}

#[instrument(skip(state), name = "api_reload_rules")]
async fn reload_rules(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let rules = state.rules.clone();
    let count = run_blocking(move || Ok(rules.reload())).await?;

    Ok(Json(json!({ "ok": true, "rules": count })))
}

/// Extract a non-blank `domain`. A missing or unparsable body counts as empty.
fn required_domain(body: &[u8]) -> Result<String, ApiError> {
    let request: RuleRequest = serde_json::from_slice(body).unwrap_or_default();
    request
        .domain
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or(ApiError::MissingDomain)
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, RuleError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}
