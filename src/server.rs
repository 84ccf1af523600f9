// HTTP server wiring
// Builds the axum application: demo endpoints, the request tracking
// middleware and the Prometheus text exposition route
//
// Numan Thabit 2025 Nov

use crate::config::AppConfig;
use crate::middleware::track_requests;
use crate::pipeline::Instrumentation;
use crate::route::{RequestRoute, RouteTable};
use crate::sink::prometheus::encode_text;
use crate::sink::PrometheusSink;
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub const HEALTH_PATH: &str = "/health";
pub const USER_PATH: &str = "/users/:id";

#[derive(Clone)]
pub struct ServerState {
    pub instrumentation: Arc<Instrumentation>,
    pub sink: Arc<PrometheusSink>,
}

/// Instrumentation route table for the demo app. Patterns are shared with
/// `create_app` through the path constants.
pub fn demo_routes() -> RouteTable {
    RouteTable::new()
        .route(Method::GET, HEALTH_PATH, "HealthController@check")
        .route(Method::GET, USER_PATH, "UserController@show")
}

/// Create the HTTP app. The exposition route is added outside the tracking
/// middleware so scrapes do not show up as traffic.
pub fn create_app(state: ServerState, cfg: &AppConfig) -> Router {
    let tracked = Router::new()
        .route(HEALTH_PATH, get(health_check))
        .route(USER_PATH, get(show_user))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.instrumentation.clone(),
            track_requests,
        ))
        .with_state(state.clone());

    let app = if cfg.metrics_route_enabled {
        tracked.merge(
            Router::new()
                .route(&cfg.metrics_route(), get(render_metrics))
                .with_state(state),
        )
    } else {
        tracked
    };
    app.layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}

// Set before `layer` so unmatched requests are tracked as well.
async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: u64,
    pub route: String,
}

/// Demo endpoint that issues one query through the instrumentation
async fn show_user(
    State(state): State<ServerState>,
    Extension(route): Extension<RequestRoute>,
    Path(id): Path<u64>,
) -> Json<UserResponse> {
    state.instrumentation.record_query(
        &format!("SELECT * FROM users WHERE id = {id}"),
        Duration::from_micros(350),
    );
    Json(UserResponse {
        id,
        route: route.resolve().uri_pattern.clone(),
    })
}

/// Text exposition of the sink's families plus the pipeline self-metrics
async fn render_metrics(State(state): State<ServerState>) -> Response {
    let mut families = state.sink.registry().gather();
    families.extend(prometheus::gather());
    match encode_text(&families) {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            warn!(error = %err, "metrics exposition failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
