//! Request metrics middleware.

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;

use crate::observability::metrics::{normalize_route, template_route, MetricsRegistry};

/// Paths never recorded.
const SKIPPED_PATHS: &[&str] = &["/metrics", "/favicon.ico"];

/// Decrements the in-flight gauge when the request finishes or is dropped.
struct InFlight<'a>(&'a MetricsRegistry);

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a MetricsRegistry) -> Self {
        metrics.connection_opened();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

/// Count every request by method, status class and route, and sample its duration.
pub async fn track_requests(
    State(metrics): State<Arc<MetricsRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if SKIPPED_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let route = match request.extensions().get::<MatchedPath>() {
        Some(matched) => template_route(matched.as_str()),
        None => normalize_route(path),
    };
    let method = request.method().to_string();

    let _in_flight = InFlight::enter(&metrics);
    let start = Instant::now();
    let response = next.run(request).await;

    metrics.record_http(&method, response.status().as_u16(), &route, start.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(metrics: Arc<MetricsRegistry>) -> Router {
        Router::new()
            .route("/api/pedidos/{id}", get(|| async { "ok" }))
            .route("/metrics", get(|| async { "" }))
            .layer(from_fn_with_state(metrics, track_requests))
    }

    async fn send(app: Router, uri: &str) -> StatusCode {
        app.oneshot(axum::http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_records_normalized_route() {
        let metrics = Arc::new(MetricsRegistry::new(Duration::from_secs(300), 100));
        let app = app(metrics.clone());

        assert_eq!(send(app.clone(), "/api/pedidos/123").await, StatusCode::OK);
        assert_eq!(send(app.clone(), "/api/pedidos/456?x=1").await, StatusCode::OK);
        assert_eq!(send(app, "/nope/9").await, StatusCode::NOT_FOUND);

        assert_eq!(metrics.http_count("GET", 200, "/api/pedidos/:id"), 2);
        assert_eq!(metrics.http_count("GET", 404, "/nope/:id"), 1);
        assert_eq!(metrics.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_metrics_path_not_recorded() {
        let metrics = Arc::new(MetricsRegistry::new(Duration::from_secs(300), 100));
        send(app(metrics.clone()), "/metrics").await;
        assert_eq!(metrics.http_histogram().count, 0);
    }
}
