use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tracing::warn;
use w100_common::ThermostatRequest;

use crate::{
    coordinator::{ActionOutcome, Coordinator, DeviceDiagnostics},
    error::BridgeError,
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusView {
    devices: Vec<DeviceDiagnostics>,
    thermostats: usize,
}

#[derive(Debug, Serialize)]
struct CreatedThermostat {
    entity_id: String,
}

#[derive(Debug, Serialize)]
struct SyncView {
    delivered: bool,
}

pub fn router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/devices/{name}/action", post(handle_post_action))
        .route("/api/devices/{name}/sync", post(handle_post_sync))
        .route(
            "/api/devices/{name}/thermostats",
            post(handle_post_thermostat),
        )
        .route(
            "/api/thermostats",
            get(handle_get_thermostats).delete(handle_delete_thermostats),
        )
        .route(
            "/api/thermostats/{entity_id}",
            put(handle_put_thermostat).delete(handle_delete_thermostat),
        )
        .with_state(coordinator)
}

async fn handle_get_status(State(coordinator): State<Coordinator>) -> impl IntoResponse {
    let devices = coordinator.diagnostics().await;
    let thermostats = coordinator.thermostats().await.len();
    Json(StatusView {
        devices,
        thermostats,
    })
}

async fn handle_post_action(
    State(coordinator): State<Coordinator>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    match coordinator.handle_action(&name, value).await {
        ActionOutcome::Ignored => error_response(
            StatusCode::BAD_REQUEST,
            "Invalid action. Use 'toggle', 'plus' or 'minus'",
        ),
        ActionOutcome::UnknownDevice => {
            error_response(StatusCode::NOT_FOUND, &format!("Unknown device '{name}'"))
        }
        outcome => Json(outcome).into_response(),
    }
}

async fn handle_post_sync(
    State(coordinator): State<Coordinator>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !coordinator.device_names().await.contains(&name) {
        return error_response(StatusCode::NOT_FOUND, &format!("Unknown device '{name}'"));
    }
    let delivered = coordinator.sync_display(&name).await;
    Json(SyncView { delivered }).into_response()
}

async fn handle_get_thermostats(State(coordinator): State<Coordinator>) -> impl IntoResponse {
    Json(coordinator.thermostats().await)
}

async fn handle_delete_thermostats(State(coordinator): State<Coordinator>) -> impl IntoResponse {
    match coordinator.remove_all_thermostats().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => bridge_error_response(err),
    }
}

async fn handle_post_thermostat(
    State(coordinator): State<Coordinator>,
    Path(name): Path<String>,
    Json(request): Json<ThermostatRequest>,
) -> impl IntoResponse {
    match coordinator.create_thermostat(&name, &request).await {
        Ok(entity_id) => {
            (StatusCode::CREATED, Json(CreatedThermostat { entity_id })).into_response()
        }
        Err(err) => bridge_error_response(err),
    }
}

async fn handle_put_thermostat(
    State(coordinator): State<Coordinator>,
    Path(entity_id): Path<String>,
    Json(request): Json<ThermostatRequest>,
) -> impl IntoResponse {
    if let Err(err) = coordinator.update_thermostat(&entity_id, &request).await {
        return bridge_error_response(err);
    }
    match coordinator.thermostat(&entity_id).await {
        Some(record) => Json(record).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Thermostat no longer owned"),
    }
}

async fn handle_delete_thermostat(
    State(coordinator): State<Coordinator>,
    Path(entity_id): Path<String>,
) -> impl IntoResponse {
    match coordinator.remove_thermostat(&entity_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &format!("{entity_id} is not owned by this bridge"),
        ),
        Err(err) => bridge_error_response(err),
    }
}

fn bridge_error_response(err: BridgeError) -> axum::response::Response {
    let status = match &err {
        BridgeError::Config(_) => StatusCode::BAD_REQUEST,
        BridgeError::UnknownDevice(_) | BridgeError::NotOwned(_) => StatusCode::NOT_FOUND,
        BridgeError::DeviceExists(_) => StatusCode::CONFLICT,
        BridgeError::Communication(_) | BridgeError::Registry(_) | BridgeError::Cleanup { .. } => {
            StatusCode::BAD_GATEWAY
        }
        BridgeError::Io(_) | BridgeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = match &err {
        BridgeError::Cleanup { failed } => {
            let ids: Vec<&str> = failed.iter().map(|(id, _)| id.as_str()).collect();
            format!("{err}: {}", ids.join(", "))
        }
        _ => err.to_string(),
    };
    if status.is_server_error() {
        warn!("api request failed: {message}");
    }
    error_response(status, &message)
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
