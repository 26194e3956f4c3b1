use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::availability::connect_back;
use crate::capabilities::{
    is_timestamp_in_valid_range, AppBroadcast, BroadcastKind, PortCheckRequest,
    PortCheckResponse, RunLocation,
};
use crate::lifecycle::{InstallMode, RemoveOptions};
use crate::progress::{self, ProgressMessage};
use crate::server::state::AppState;
use crate::spec::{validate_shape, AppSpecification};

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct RedeployQuery {
    #[serde(default)]
    pub hard: bool,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"status": "error", "data": {"message": message.into()}})),
    )
        .into_response()
}

/// Stream progress lines as NDJSON until the sender side is dropped
fn ndjson(rx: UnboundedReceiver<ProgressMessage>) -> Response {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|message| (Ok::<_, Infallible>(message.to_line()), rx))
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Node specs, locked resources, DOS state and progress flags
pub async fn status(State(state): State<AppState>) -> Response {
    match state.node_status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn list_apps(State(state): State<AppState>) -> Response {
    match state.agent.caps.store.installed_apps().await {
        Ok(apps) => Json(apps).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Hard install with streamed progress
pub async fn install_app(
    State(state): State<AppState>,
    Json(spec): Json<AppSpecification>,
) -> Response {
    if let Err(e) = validate_shape(&spec) {
        return error_body(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
    }
    info!("Install of {} requested", spec.name);

    let (tx, rx) = progress::channel();
    let lifecycle = state.agent.lifecycle.clone();
    tokio::spawn(async move {
        let _ = lifecycle.install(spec, InstallMode::Hard, &tx).await;
    });
    ndjson(rx)
}

/// Hard removal with streamed progress
pub async fn remove_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> Response {
    info!("Removal of {} requested (force: {})", name, query.force);

    let (tx, rx) = progress::channel();
    let lifecycle = state.agent.lifecycle.clone();
    tokio::spawn(async move {
        let _ = lifecycle
            .remove(&name, RemoveOptions::user(query.force), &tx)
            .await;
    });
    ndjson(rx)
}

pub async fn redeploy_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RedeployQuery>,
) -> Response {
    info!("Redeploy of {} requested (hard: {})", name, query.hard);

    let (tx, rx) = progress::channel();
    let lifecycle = state.agent.lifecycle.clone();
    tokio::spawn(async move {
        let _ = lifecycle.redeploy(&name, query.hard, &tx).await;
    });
    ndjson(rx)
}

pub async fn app_monitoring(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.agent.monitor.snapshot(&id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => error_body(
            StatusCode::NOT_FOUND,
            format!("No monitoring data for {}", id),
        ),
    }
}

/// Peer side of the availability probe: connect back to the requester
pub async fn check_ports(
    State(state): State<AppState>,
    Json(request): Json<PortCheckRequest>,
) -> Response {
    let network = &state.agent.caps.network;
    let message = PortCheckRequest::message(&request.ip, &request.ports, request.timestamp);
    if !is_timestamp_in_valid_range(request.timestamp)
        || !network.verify(&message, &request.signature)
    {
        warn!("Rejected unsigned port check from {}", request.ip);
        let body = PortCheckResponse {
            status: "error".to_string(),
            message: Some("Invalid signature".to_string()),
        };
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }

    let timeout = state.agent.config.probe.connect_timeout();
    let reachable = connect_back(&request.ip, &request.ports, timeout).await;
    let body = if reachable {
        PortCheckResponse {
            status: "success".to_string(),
            message: None,
        }
    } else {
        PortCheckResponse {
            status: "error".to_string(),
            message: Some(format!("Ports {:?} not reachable", request.ports)),
        }
    };
    Json(body).into_response()
}

/// Run, removal and error announcements from peers
pub async fn receive_broadcast(
    State(state): State<AppState>,
    Json(broadcast): Json<AppBroadcast>,
) -> Response {
    let caps = &state.agent.caps;
    if !is_timestamp_in_valid_range(broadcast.timestamp)
        || !caps
            .network
            .verify(&broadcast.signed_message(), &broadcast.signature)
    {
        warn!("Rejected unsigned broadcast from {}", broadcast.ip);
        return error_body(StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let result = match broadcast.kind {
        BroadcastKind::Running => {
            let location = RunLocation {
                name: broadcast.app.clone(),
                ip: broadcast.ip.clone(),
                hash: String::new(),
                running_since: broadcast.running_since,
            };
            caps.store.upsert_run_location(&location).await
        }
        BroadcastKind::Removed => {
            caps.store
                .remove_run_location(&broadcast.app, &broadcast.ip)
                .await
        }
        BroadcastKind::Error => {
            warn!(
                "Peer {} reported error for {}: {}",
                broadcast.ip,
                broadcast.app,
                broadcast.message.as_deref().unwrap_or("unknown")
            );
            Ok(())
        }
    };

    match result {
        Ok(()) => Json(json!({"status": "success"})).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/apps", get(list_apps).post(install_app))
        .route("/v1/apps/{name}", delete(remove_app))
        .route("/v1/apps/{name}/redeploy", post(redeploy_app))
        .route("/v1/apps/{name}/monitoring", get(app_monitoring))
        .route("/v1/ports/check", post(check_ports))
        .route("/v1/broadcast", post(receive_broadcast))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::NodeAgent;
    use crate::config::Config;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_app() -> Router {
        let agent = NodeAgent::with_host_capabilities(Config::default());
        create_router(AppState::new(Arc::new(agent)))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_apps_empty() {
        let app = create_test_app();

        let response = app
            .oneshot(Request::builder().uri("/v1/apps").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn test_monitoring_unknown_app() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/apps/apphostweb/monitoring")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_install_rejects_malformed_spec() {
        let app = create_test_app();
        let body = serde_json::json!({"version": 3, "name": "bad-name", "repotag": "nginx:1"});

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/apps")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_unsigned_port_check_rejected() {
        let app = create_test_app();
        let body = serde_json::json!({
            "ip": "127.0.0.1",
            "ports": [31000],
            "timestamp": chrono::Utc::now().timestamp(),
            "signature": "00"
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/ports/check")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
