use super::service::RateLimiter;
use super::types::{Decision, RateLimitPolicy};
use crate::error::LimiterError;
use crate::metrics;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Identity of an authenticated caller, inserted into request extensions by
/// whatever authenticates the request upstream of the rate limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimitMiddleware {
    /// The rate limiter shared by every request
    limiter: Arc<RateLimiter>,
    /// Policy applied to requests passing through this middleware
    policy: RateLimitPolicy,
}

impl RateLimitMiddleware {
    /// Create a new rate limiting middleware
    pub fn new(limiter: Arc<RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }
}

/// Axum middleware function for rate limiting.
///
/// Install with `axum::middleware::from_fn_with_state(state, rate_limit_middleware)`.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    let subject = subject_for(&request);
    let path = request.uri().path().to_string();

    match state.limiter.check(&subject, &state.policy).await {
        Ok(decision @ Decision::Admitted { .. }) => {
            debug!("Request from {} to {} admitted", subject, path);
            let response = next.run(request).await;
            add_rate_limit_headers(response, state.policy.max_operations, decision.remaining())
        }
        Ok(decision) => {
            metrics::record_rejected_request(&state.policy.key_namespace, &path);
            create_rate_limit_response(state.policy.max_operations, &decision)
        }
        // The policy is server configuration, so a rejection here is our fault
        Err(e) => {
            error!("Rate limit middleware misconfigured: {}", e);
            LimiterError::Internal(e.to_string()).into_response()
        }
    }
}

/// Pick the subject to throttle: the authenticated identity when present,
/// otherwise the client IP
fn subject_for(request: &Request) -> String {
    if let Some(AuthenticatedSubject(id)) = request.extensions().get::<AuthenticatedSubject>() {
        return format!("user:{}", id);
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "ip:unknown".to_string())
}

/// Headers carried by every rate limited response
fn rate_limit_headers(limit: u32, remaining: u32) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
    headers
}

/// Create a 429 Too Many Requests response with a retry hint
pub fn create_rate_limit_response(limit: u32, decision: &Decision) -> Response {
    let mut headers = rate_limit_headers(limit, 0);
    let retry_after_ms = match decision {
        Decision::Denied { retry_after_millis } => *retry_after_millis,
        Decision::Admitted { .. } => 0,
    };

    if let Some(secs) = decision.retry_after_secs() {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }

    let body = json!({
        "error": "Rate limit exceeded",
        "status": 429,
        "limit": limit,
        "retry_after_ms": retry_after_ms,
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

/// Add rate limit headers to admitted responses
pub fn add_rate_limit_headers(mut response: Response, limit: u32, remaining: u32) -> Response {
    response
        .headers_mut()
        .extend(rate_limit_headers(limit, remaining));
    response
}
