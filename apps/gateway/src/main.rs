use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use gateway_core::{AdminKeySet, ClientKeySet, Dispatcher, WreqUpstreamClient};
use gateway_pool::{CredentialPool, FailureConfig};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

mod error_response;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = gateway_core::load_from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool = Arc::new(CredentialPool::new(config.gemini_api_keys.clone()));
    let upstream = WreqUpstreamClient::new(config.gemini_request_timeout)
        .context("failed to build upstream HTTP client")?;
    let failure_config = FailureConfig {
        base_cooling_period: config.gemini_cooling_period,
        max_retries: config.gemini_max_retries,
    };
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        upstream,
        failure_config,
        config.gemini_max_retries,
    ));

    let client_auth = Arc::new(ClientKeySet::new(config.client_api_keys.clone()));
    let admin_auth = Arc::new(AdminKeySet::new(config.admin_api_keys.clone()));
    let config = Arc::new(config);

    let state = AppState {
        dispatcher,
        pool,
        client_auth,
        admin_auth,
        started_at: SystemTime::now(),
        config: Arc::clone(&config),
    };

    let cors = build_cors_layer(&config.cors_origins);
    let app = routes::build_router(state).layer(cors);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }
    if origins.is_empty() {
        return CorsLayer::new();
    }
    let parsed: Vec<http::HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new().allow_origin(parsed)
}
