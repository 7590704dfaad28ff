use crate::ack::AckReceipt;
use crate::api::error::{ApiError, ApiResult};
use crate::api::types::*;
use crate::coordinator::{
    CreateDistressMessageInput, MaintenanceReport, MeshCoordinator, MeshStats, RegisterDeviceInput,
};
use crate::metrics::render_metrics;
use crate::model::{DeviceNode, DistressMessage, MessageRoute};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

pub struct RestApi {
    coordinator: Arc<MeshCoordinator>,
}

impl RestApi {
    pub fn new(coordinator: MeshCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(prometheus_metrics))
            .route("/api/v1/messages", post(create_message))
            .route("/api/v1/messages", get(list_messages))
            .route("/api/v1/messages/:id", get(get_message))
            .route("/api/v1/messages/:id/routes", get(get_message_routes))
            .route("/api/v1/messages/:id/acknowledgments", post(acknowledge_message))
            .route("/api/v1/messages/:id/relay", post(relay_message))
            .route("/api/v1/devices", post(register_device))
            .route("/api/v1/devices", get(list_devices))
            .route("/api/v1/devices/:id", get(get_device))
            .route("/api/v1/devices/:id/heartbeat", post(heartbeat))
            .route("/api/v1/devices/:id/offline", post(set_device_offline))
            .route("/api/v1/maintenance", post(run_maintenance))
            .route("/api/v1/stats", get(get_stats))
            .with_state(self.coordinator.clone())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn prometheus_metrics() -> ApiResult<String> {
    render_metrics().ok_or_else(|| ApiError::NotFound("Metrics exporter not installed".into()))
}

// --- Messages ---

async fn create_message(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Json(input): Json<CreateDistressMessageInput>,
) -> ApiResult<(StatusCode, Json<DistressMessage>)> {
    let message = coordinator.create_distress_message(input).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<ListMessagesResponse>> {
    let filter = query.filter()?;
    let messages = match query.near()? {
        Some((center, radius_km)) => coordinator
            .list_messages_near(&center, radius_km)?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect(),
        None => coordinator.list_messages(&filter),
    };
    let count = messages.len();

    Ok(Json(ListMessagesResponse { messages, count }))
}

async fn get_message(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<DistressMessage>> {
    Ok(Json(coordinator.get_message(&message_id)?))
}

async fn get_message_routes(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<Vec<MessageRoute>>> {
    Ok(Json(coordinator.get_message_routes(&message_id)?))
}

async fn acknowledge_message(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Path(message_id): Path<String>,
    Json(req): Json<AcknowledgeRequest>,
) -> ApiResult<Json<AckReceipt>> {
    let receipt = coordinator
        .submit_acknowledgment(&message_id, &req.device_id)
        .await?;
    Ok(Json(receipt))
}

async fn relay_message(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Path(message_id): Path<String>,
    Json(req): Json<RelayRequest>,
) -> ApiResult<Json<RelayResponse>> {
    let report = coordinator.relay(&message_id, &req.holder_id).await?;
    Ok(Json(report.into()))
}

// --- Devices ---

async fn register_device(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Json(input): Json<RegisterDeviceInput>,
) -> ApiResult<Json<DeviceNode>> {
    Ok(Json(coordinator.register_device(input).await?))
}

async fn list_devices(State(coordinator): State<Arc<MeshCoordinator>>) -> Json<ListDevicesResponse> {
    let devices = coordinator.list_devices();
    let count = devices.len();

    Json(ListDevicesResponse { devices, count })
}

async fn get_device(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceNode>> {
    Ok(Json(coordinator.get_device(&device_id)?))
}

async fn heartbeat(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceNode>> {
    Ok(Json(coordinator.heartbeat(&device_id).await?))
}

async fn set_device_offline(
    State(coordinator): State<Arc<MeshCoordinator>>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceNode>> {
    Ok(Json(coordinator.set_device_offline(&device_id).await?))
}

// --- Node ---

async fn run_maintenance(
    State(coordinator): State<Arc<MeshCoordinator>>,
) -> Json<MaintenanceReport> {
    Json(coordinator.maintenance_cycle().await)
}

async fn get_stats(State(coordinator): State<Arc<MeshCoordinator>>) -> Json<MeshStats> {
    Json(coordinator.stats())
}
