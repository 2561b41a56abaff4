use crate::infra::AppState;
use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use gatekeeper::workflows::membership::{
    membership_router, require_admin, AdminToken, ApplicationStore, MembershipService,
    RemoteConsole, Transport,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_DRAIN_LIMIT: usize = 100;
const MAX_DRAIN_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DrainParams {
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

pub(crate) fn with_membership_routes<S, C, T>(
    service: Arc<MembershipService<S, C, T>>,
    admin: AdminToken,
) -> axum::Router
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    let outbox = axum::Router::new()
        .route("/api/v1/outbox", axum::routing::get(outbox_endpoint))
        .route_layer(middleware::from_fn_with_state(admin.clone(), require_admin));

    membership_router(service, admin)
        .merge(outbox)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Hands queued chat events to the bridge, oldest first. Drained events are gone.
pub(crate) async fn outbox_endpoint(
    Extension(state): Extension<AppState>,
    Query(params): Query<DrainParams>,
) -> Response {
    let Some(outbox) = state.outbox else {
        let payload = json!({ "error": "outbox disabled; events are delivered by webhook" });
        return (StatusCode::NOT_FOUND, Json(payload)).into_response();
    };

    let limit = params
        .limit
        .unwrap_or(DEFAULT_DRAIN_LIMIT)
        .clamp(1, MAX_DRAIN_LIMIT);
    let events = outbox.drain(limit);
    let payload = json!({ "events": events, "remaining": outbox.len() });
    (StatusCode::OK, Json(payload)).into_response()
}
