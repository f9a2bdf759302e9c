use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Request, State, WebSocketUpgrade},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use parley_gateway::connection;
use parley_gateway::gateway::Gateway;
use parley_types::events::{GroupNotification, MembershipApproved};

#[derive(Clone)]
pub struct ServerState {
    pub gateway: Gateway,
    pub internal_token: Option<Arc<str>>,
}

pub fn build_router(state: ServerState) -> Router {
    // Called by the group/user management side of the system, not by clients.
    let internal_routes = Router::new()
        .route("/internal/groups/{group_id}/notifications", post(notify_group))
        .route("/internal/users/{user_id}/membership-approved", post(membership_approved))
        .layer(middleware::from_fn_with_state(state.clone(), require_internal_token));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/gateway", get(ws_upgrade))
        .merge(internal_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.gateway))
}

/// Reject internal calls without the configured bearer token. Open when no
/// token is configured.
async fn require_internal_token(
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.internal_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented != Some(expected) {
        warn!("Rejected internal call to {} without valid token", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

async fn notify_group(
    State(state): State<ServerState>,
    Path(group_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, StatusCode> {
    let notification: GroupNotification =
        serde_json::from_value(body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let delivered = state.gateway.notify_group_admins(&group_id, notification);
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))))
}

async fn membership_approved(
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, StatusCode> {
    let approved: MembershipApproved =
        serde_json::from_value(body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let delivered = state
        .gateway
        .notify_membership_approved(&user_id, &approved.group_id);
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))))
}
