//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the gateway's own endpoints
//! - Wire up middleware (tracing, request ID, timeout, body limit, metrics)
//! - Bind plain TCP or TLS and serve until shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::auth::authenticate;
use crate::http::{handlers, health};
use crate::lifecycle::Services;
use crate::net::tls::load_tls_config;
use crate::observability::middleware::track_requests;

/// Grace period for in-flight requests after shutdown is triggered.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid bind address {0:?}")]
    InvalidAddress(String),
    #[error("TLS setup failed: {0}")]
    Tls(std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(services: Arc<Services>) -> Self {
        Self::with_routes(services, Router::new())
    }

    /// Mount application routes next to the gateway's own endpoints. They
    /// get the same middleware stack.
    pub fn with_routes(services: Arc<Services>, routes: Router<AppState>) -> Self {
        let state = AppState::new(services);
        let router = Self::build_router(state.clone(), routes);
        Self { router, state }
    }

    /// The fully layered router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    fn build_router(state: AppState, routes: Router<AppState>) -> Router {
        let services = &state.services;
        let config = &services.config;

        let mut router = routes
            .route("/health", get(health::health))
            .route(
                "/api/me",
                get(handlers::me).route_layer(from_fn_with_state(services.auth.clone(), authenticate)),
            );

        if config.observability.metrics_enabled {
            router = router.route("/metrics", get(handlers::metrics));
        }

        if config.admin.enabled {
            router = router.merge(admin::router(state.clone()));
        }

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            // Outside the timeout so 504s are counted too.
            .layer(from_fn_with_state(services.metrics.clone(), track_requests))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                Duration::from_secs(config.timeouts.request_secs),
            ));

        router
            .layer(DefaultBodyLimit::max(config.security.max_body_size))
            .layer(middleware)
            .with_state(state)
    }

    /// Serve on the configured address until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener_config = self.state.services.config.listener.clone();

        match listener_config.tls {
            Some(tls) => {
                let addr: SocketAddr = listener_config
                    .bind_address
                    .parse()
                    .map_err(|_| ServerError::InvalidAddress(listener_config.bind_address.clone()))?;
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))
                    .await
                    .map_err(ServerError::Tls)?;

                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    shutdown.await;
                    drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
                });

                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::bind_rustls(addr, rustls)
                    .handle(handle)
                    .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
                    .await?;
                tracing::info!("HTTPS server stopped");
                Ok(())
            }
            None => {
                let listener = TcpListener::bind(&listener_config.bind_address).await?;
                self.serve(listener, shutdown).await
            }
        }
    }

    /// Serve plain HTTP on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
