//! HTTP check service: lets other processes ask the limiter for a decision.

use crate::error::{LimiterError, Result};
use crate::rate_limit::middleware::create_rate_limit_response;
use crate::rate_limit::{Decision, PolicyPreset, RateLimitPolicy, RateLimiter};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Shared state of the check service
#[derive(Clone)]
pub struct ApiState {
    pub limiter: Arc<RateLimiter>,
    /// Policy for requests that name neither a preset nor explicit limits
    pub default_policy: RateLimitPolicy,
}

/// Body of `POST /v1/check`
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    /// Identity being throttled (user id, client IP, ...)
    pub subject: String,
    #[serde(default)]
    pub preset: Option<PolicyPreset>,
    #[serde(default)]
    pub window_millis: Option<u64>,
    #[serde(default)]
    pub max_operations: Option<u32>,
    /// Overrides the namespace of the chosen policy
    #[serde(default)]
    pub namespace: Option<String>,
}

impl CheckRequest {
    /// Resolve the policy this request asks for
    pub fn policy(&self, state: &ApiState) -> Result<RateLimitPolicy> {
        let mut policy = match (self.preset, self.window_millis, self.max_operations) {
            (Some(preset), None, None) => state.limiter.preset_policy(preset),
            (None, Some(window_millis), Some(max_operations)) => RateLimitPolicy::new(
                window_millis,
                max_operations,
                state.default_policy.key_namespace.clone(),
            ),
            (None, None, None) => state.default_policy.clone(),
            _ => {
                return Err(LimiterError::InvalidPolicy(
                    "give either a preset or both window_millis and max_operations".to_string(),
                ))
            }
        };

        if let Some(namespace) = &self.namespace {
            policy.key_namespace = namespace.clone();
        }
        Ok(policy)
    }
}

/// Body of a `POST /v1/check` answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResponse {
    pub admitted: bool,
    pub key: String,
    pub limit: u32,
    pub remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// `POST /v1/check`
pub async fn check_handler(
    State(state): State<ApiState>,
    Json(request): Json<CheckRequest>,
) -> Result<Response> {
    let policy = request.policy(&state)?;
    let key = policy.key_for(&request.subject);
    let decision = state.limiter.check_and_consume(&key, &policy).await?;

    let body = CheckResponse {
        admitted: decision.is_admitted(),
        key: key.to_string(),
        limit: policy.max_operations,
        remaining: decision.remaining(),
        retry_after_ms: match decision {
            Decision::Denied { retry_after_millis } => Some(retry_after_millis),
            Decision::Admitted { .. } => None,
        },
    };

    if decision.is_admitted() {
        return Ok((StatusCode::OK, Json(body)).into_response());
    }

    // Same status and headers as the middleware, with the check body
    let (parts, _) = create_rate_limit_response(policy.max_operations, &decision).into_parts();
    Ok((parts, Json(body)).into_response())
}

/// `GET /health`
pub async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "store": state.limiter.mode(),
    }))
}
