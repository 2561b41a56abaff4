use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{ApplicationSubmission, ArtifactHandle, Decision, Nickname};
use super::rcon::RemoteConsole;
use super::repository::{ApplicationStore, StoreError};
use super::service::{MembershipError, MembershipService};
use super::transport::Transport;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Bearer token required on administrative routes; `None` leaves them open, which
/// configuration only allows outside production.
#[derive(Debug, Clone, Default)]
pub struct AdminToken(Option<Arc<str>>);

impl AdminToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.map(Arc::from))
    }

    fn permits(&self, request: &Request) -> bool {
        let Some(expected) = self.0.as_deref() else {
            return true;
        };
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| tokens_match(presented.trim(), expected))
    }
}

/// Compares every byte so the time taken does not reveal the matching prefix.
pub(crate) fn tokens_match(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Router exposing intake for the chat bridge and the moderator/admin surface.
pub fn membership_router<S, C, T>(
    service: Arc<MembershipService<S, C, T>>,
    admin: AdminToken,
) -> Router
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    let privileged = Router::new()
        .route("/api/v1/applications", get(pending_handler::<S, C, T>))
        .route(
            "/api/v1/applications/:nickname",
            get(status_handler::<S, C, T>).delete(purge_handler::<S, C, T>),
        )
        .route(
            "/api/v1/applications/:nickname/decision",
            post(nickname_decision_handler::<S, C, T>),
        )
        .route(
            "/api/v1/decisions/:artifact",
            post(decision_handler::<S, C, T>),
        )
        .route_layer(middleware::from_fn_with_state(admin, require_admin))
        .with_state(service.clone());

    Router::new()
        .route("/api/v1/applications", post(submit_handler::<S, C, T>))
        .with_state(service)
        .merge(privileged)
}

/// Rejects requests without the configured administrator token.
pub async fn require_admin(
    State(admin): State<AdminToken>,
    request: Request,
    next: Next,
) -> Response {
    if admin.permits(&request) {
        next.run(request).await
    } else {
        let payload = json!({ "error": "administrator token required" });
        (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionBody {
    pub(crate) decision: Decision,
    pub(crate) decided_by: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListParams {
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}

pub(crate) async fn submit_handler<S, C, T>(
    State(service): State<Arc<MembershipService<S, C, T>>>,
    axum::Json(submission): axum::Json<ApplicationSubmission>,
) -> Response
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    match service.submit(submission).await {
        Ok(receipt) => {
            let payload = json!({
                "nickname": receipt.application.nickname,
                "status": receipt.application.status.label(),
                "artifact": receipt.artifact,
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn decision_handler<S, C, T>(
    State(service): State<Arc<MembershipService<S, C, T>>>,
    Path(artifact): Path<String>,
    axum::Json(body): axum::Json<DecisionBody>,
) -> Response
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    let Some(decided_by) = actor(&body) else {
        return missing_actor();
    };
    match service
        .decide(&ArtifactHandle(artifact), body.decision, decided_by)
        .await
    {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn nickname_decision_handler<S, C, T>(
    State(service): State<Arc<MembershipService<S, C, T>>>,
    Path(nickname): Path<String>,
    axum::Json(body): axum::Json<DecisionBody>,
) -> Response
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    let nickname = Nickname::from_stored(nickname);
    let Some(decided_by) = actor(&body) else {
        return missing_actor();
    };
    match service
        .decide_nickname(&nickname, body.decision, decided_by)
        .await
    {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<S, C, T>(
    State(service): State<Arc<MembershipService<S, C, T>>>,
    Path(nickname): Path<String>,
) -> Response
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    let nickname = Nickname::from_stored(nickname);
    match service.query_status(&nickname).await {
        Ok(Some(application)) => {
            (StatusCode::OK, axum::Json(application.status_view())).into_response()
        }
        Ok(None) => error_response(MembershipError::NotFound(nickname)),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn purge_handler<S, C, T>(
    State(service): State<Arc<MembershipService<S, C, T>>>,
    Path(nickname): Path<String>,
) -> Response
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    let nickname = Nickname::from_stored(nickname);
    match service.purge_record(&nickname).await {
        Ok(()) => {
            let payload = json!({ "nickname": nickname, "purged": true });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn pending_handler<S, C, T>(
    State(service): State<Arc<MembershipService<S, C, T>>>,
    Query(params): Query<ListParams>,
) -> Response
where
    S: ApplicationStore + 'static,
    C: RemoteConsole + 'static,
    T: Transport + 'static,
{
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    match service.pending(limit).await {
        Ok(applications) => (StatusCode::OK, axum::Json(applications)).into_response(),
        Err(err) => error_response(err),
    }
}

fn actor(body: &DecisionBody) -> Option<&str> {
    let decided_by = body.decided_by.trim();
    (!decided_by.is_empty()).then_some(decided_by)
}

fn missing_actor() -> Response {
    let payload = json!({ "error": "decided_by must not be blank" });
    (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
}

pub(crate) fn error_response(err: MembershipError) -> Response {
    let status = match &err {
        MembershipError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        MembershipError::DuplicateApplication(_) => StatusCode::CONFLICT,
        MembershipError::NotFound(_) | MembershipError::UnknownArtifact(_) => {
            StatusCode::NOT_FOUND
        }
        MembershipError::RemoteCommand { .. } | MembershipError::Transport(_) => {
            StatusCode::BAD_GATEWAY
        }
        MembershipError::Store(StoreError::AlreadyProcessed(_)) => StatusCode::CONFLICT,
        MembershipError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({ "error": err.to_string() });
    (status, axum::Json(payload)).into_response()
}
