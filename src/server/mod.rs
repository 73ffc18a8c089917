//! HTTP server
//!
//! Thin axum boundary over [`ShellService`](crate::service::ShellService).
//! Handlers translate requests into service calls and service errors into
//! the uniform JSON envelope; no isolation or accounting logic lives here.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod session;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::MwsError;
use crate::service::ShellService;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: String,
    /// HTTP port
    pub http_port: u16,
    /// Run the idle-tenant expiry sweep in the background
    pub enable_sweeper: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0".to_string(),
            http_port: 5000,
            enable_sweeper: true,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: ShellService,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

impl IntoResponse for MwsError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "error": self.status(),
            "reason": self.reason(),
            "detail": self.detail(),
        });
        (status, Json(body)).into_response()
    }
}

/// Builds the application router around a service context.
pub fn build_app(service: ShellService) -> Router {
    let cors = match service.config().cors_origin.as_deref() {
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => CorsLayer::permissive(),
        },
        None => CorsLayer::permissive(),
    };

    Router::new()
        .merge(routes::shell_routes())
        .merge(routes::health_routes())
        .layer(axum::middleware::from_fn(middleware::no_cache))
        .layer(Extension(Arc::new(AppState { service })))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the web shell server
pub async fn start_server(config: ServerConfig, service: ShellService) -> anyhow::Result<()> {
    info!(
        addr = %config.http_addr,
        port = config.http_port,
        "Starting mwshell HTTP server"
    );

    if config.enable_sweeper {
        let sweeper = service.clone();
        let every = service.config().expire_session_every_secs.max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(every));
            loop {
                interval.tick().await;
                match sweeper.expire_idle_tenants().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "expiry sweep finished"),
                    Err(err) => error!(error = %err, "expiry sweep failed"),
                }
            }
        });
        info!(every_secs = every, "Idle-tenant sweeper started");
    }

    let app = build_app(service);

    let addr = format!("{}:{}", config.http_addr, config.http_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server failed: {}", e)
    })
}
