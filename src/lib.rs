pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;

use crate::api::{check_handler, health_handler, ApiState};
use crate::config::{LogFormat, ServiceConfig};
use crate::error::{LimiterError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::RateLimiter;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the HTTP app around an existing limiter
pub fn build_app(state: ApiState, metrics: Option<MetricsService>) -> Router {
    let mut app = Router::new()
        .route("/v1/check", post(check_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

/// Initialize and run the rate limit service
pub async fn init_service(config: ServiceConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting rate limit service");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let metrics = MetricsService::new()?;
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limiting).await);
    info!("Rate limiter ready in {} mode", limiter.mode());

    let state = ApiState {
        limiter,
        default_policy: config.rate_limiting.default_policy.clone(),
    };
    let app = build_app(state, Some(metrics));

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Rate limit service ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| LimiterError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging
pub fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sparkle_ratelimit=debug,tower_http=debug".into());

    match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init(),
    }
}
