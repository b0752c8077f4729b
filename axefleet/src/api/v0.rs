//! API v0 endpoints.
//!
//! Version 0 signals an unstable API. Breaking changes are expected
//! until the daemon reaches 1.0.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::net::Ipv4Addr;

use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::api_client::types::{
    AddDeviceRequest, DevicePatchRequest, DeviceStatus, ErrorResponse, FleetOverview,
    MinerSettings, ScanProgress, ScanRequest,
};
use crate::control::ControlError;
use crate::registry::{AddOutcome, RegistryError, parse_address};
use crate::scanner::{ScanError, resolve_prefix};
use crate::tracing::prelude::*;

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(list_devices, add_device))
        .routes(routes!(get_device, patch_device, delete_device))
        .routes(routes!(restart_device))
        .routes(routes!(patch_settings))
        .routes(routes!(start_scan, get_scan))
        .routes(routes!(get_fleet))
}

/// Handler error carrying the HTTP status to answer with.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl ToString) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match e {
            RegistryError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e)
    }
}

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::InvalidPrefix(_) => Self::new(StatusCode::BAD_REQUEST, e),
            ScanError::AlreadyRunning => Self::new(StatusCode::CONFLICT, e),
            ScanError::Registry(e) => e.into(),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        let status = match e {
            ControlError::InvalidSetting(_) => StatusCode::BAD_REQUEST,
            ControlError::Request { .. } | ControlError::Rejected { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e)
    }
}

/// Resolve a path address to a registered device.
fn registered(state: &SharedState, address: &str) -> Result<Ipv4Addr, ApiError> {
    let address = parse_address(address)?;
    if !state.registry.contains(address) {
        return Err(RegistryError::NotFound(address).into());
    }
    Ok(address)
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return every registered device with its latest status.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    responses(
        (status = OK, description = "Registered devices", body = Vec<DeviceStatus>),
    ),
)]
async fn list_devices(State(state): State<SharedState>) -> Json<Vec<DeviceStatus>> {
    Json(state.registry.list().to_vec())
}

/// Register a device by address. The device is probed once; it is stored
/// even if it does not answer.
#[utoipa::path(
    post,
    path = "/devices",
    tag = "devices",
    request_body = AddDeviceRequest,
    responses(
        (status = CREATED, description = "Device registered", body = DeviceStatus),
        (status = BAD_REQUEST, description = "Malformed address", body = ErrorResponse),
        (status = CONFLICT, description = "Already registered", body = ErrorResponse),
    ),
)]
async fn add_device(
    State(state): State<SharedState>,
    Json(req): Json<AddDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceStatus>), ApiError> {
    match state.registry.add(&req.address).await? {
        AddOutcome::Added(status) => Ok((StatusCode::CREATED, Json(status))),
        AddOutcome::AlreadyExists => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("{} is already registered", req.address.trim()),
        )),
    }
}

/// Return a single device.
#[utoipa::path(
    get,
    path = "/devices/{address}",
    tag = "devices",
    params(
        ("address" = String, Path, description = "Device IPv4 address"),
    ),
    responses(
        (status = OK, description = "Device status", body = DeviceStatus),
        (status = NOT_FOUND, description = "Not registered", body = ErrorResponse),
    ),
)]
async fn get_device(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<Json<DeviceStatus>, ApiError> {
    let address = parse_address(&address)?;
    state
        .registry
        .get(address)
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound(address).into())
}

/// Change a device's label. Never touches the device itself.
#[utoipa::path(
    patch,
    path = "/devices/{address}",
    tag = "devices",
    params(
        ("address" = String, Path, description = "Device IPv4 address"),
    ),
    request_body = DevicePatchRequest,
    responses(
        (status = OK, description = "Updated device", body = DeviceStatus),
        (status = NOT_FOUND, description = "Not registered", body = ErrorResponse),
    ),
)]
async fn patch_device(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Json(req): Json<DevicePatchRequest>,
) -> Result<Json<DeviceStatus>, ApiError> {
    let address = parse_address(&address)?;
    state
        .registry
        .rename(address, req.display_name.as_deref().unwrap_or_default())
        .await?;
    state
        .registry
        .get(address)
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound(address).into())
}

/// Forget a device.
#[utoipa::path(
    delete,
    path = "/devices/{address}",
    tag = "devices",
    params(
        ("address" = String, Path, description = "Device IPv4 address"),
    ),
    responses(
        (status = NO_CONTENT, description = "Device removed"),
        (status = NOT_FOUND, description = "Not registered", body = ErrorResponse),
    ),
)]
async fn delete_device(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<StatusCode, ApiError> {
    let address = parse_address(&address)?;
    state.registry.remove(address).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Ask a registered device to reboot.
#[utoipa::path(
    post,
    path = "/devices/{address}/restart",
    tag = "control",
    params(
        ("address" = String, Path, description = "Device IPv4 address"),
    ),
    responses(
        (status = ACCEPTED, description = "Restart requested"),
        (status = NOT_FOUND, description = "Not registered", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Device unreachable", body = ErrorResponse),
    ),
)]
async fn restart_device(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<StatusCode, ApiError> {
    let address = registered(&state, &address)?;
    state.control.restart(address).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Push a partial settings update to a registered device.
#[utoipa::path(
    patch,
    path = "/devices/{address}/settings",
    tag = "control",
    params(
        ("address" = String, Path, description = "Device IPv4 address"),
    ),
    request_body = MinerSettings,
    responses(
        (status = NO_CONTENT, description = "Settings applied"),
        (status = BAD_REQUEST, description = "Invalid or empty update", body = ErrorResponse),
        (status = NOT_FOUND, description = "Not registered", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Device refused or unreachable", body = ErrorResponse),
    ),
)]
async fn patch_settings(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Json(settings): Json<MinerSettings>,
) -> Result<StatusCode, ApiError> {
    let address = registered(&state, &address)?;
    state.control.update_settings(address, &settings).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start a subnet scan in the background.
#[utoipa::path(
    post,
    path = "/scan",
    tag = "scan",
    request_body = ScanRequest,
    responses(
        (status = ACCEPTED, description = "Scan started", body = ScanProgress),
        (status = BAD_REQUEST, description = "Malformed prefix", body = ErrorResponse),
        (status = CONFLICT, description = "A scan is already running", body = ErrorResponse),
    ),
)]
async fn start_scan(
    State(state): State<SharedState>,
    Json(req): Json<ScanRequest>,
) -> Result<(StatusCode, Json<ScanProgress>), ApiError> {
    let prefix = resolve_prefix(req.prefix.as_deref())?;
    let handle = state.scanner.spawn(Some(&prefix.to_string()))?;

    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Scan failed"),
            Err(e) => error!(error = %e, "Scan task panicked"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ScanProgress {
            running: true,
            prefix: Some(prefix.to_string()),
            total: prefix.candidates().len(),
            ..Default::default()
        }),
    ))
}

/// Progress of the current or most recent scan.
#[utoipa::path(
    get,
    path = "/scan",
    tag = "scan",
    responses(
        (status = OK, description = "Scan progress", body = ScanProgress),
    ),
)]
async fn get_scan(State(state): State<SharedState>) -> Json<ScanProgress> {
    Json(state.scanner.progress().borrow().clone())
}

/// Fleet totals, with pool figures when a pool service is reachable.
#[utoipa::path(
    get,
    path = "/fleet",
    tag = "fleet",
    responses(
        (status = OK, description = "Fleet overview", body = FleetOverview),
    ),
)]
async fn get_fleet(State(state): State<SharedState>) -> Json<FleetOverview> {
    let pool = state.pool.borrow().clone();
    Json(FleetOverview::new(&state.registry.list(), pool))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{Router, body::Body};
    use http::{Method, Request};
    use http_body_util::BodyExt;
    use serde::de::DeserializeOwned;
    use serde_json::{Value, json};
    use tokio::sync::watch;
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::control::DeviceControl;
    use crate::pool_api::HashRateSource;
    use crate::registry::{self, store::MemoryStore};
    use crate::scanner::Scanner;
    use crate::test_support::ScriptedProber;

    struct Harness {
        app: Router,
        prober: Arc<ScriptedProber>,
    }

    async fn harness() -> Harness {
        let prober = Arc::new(ScriptedProber::with_delay(Duration::from_secs(5)));
        let store = Arc::new(MemoryStore::default());
        let registry = registry::start(store, prober.clone()).await;
        let scanner = Arc::new(Scanner::new(prober.clone(), registry.clone()));
        let (_, pool) = watch::channel(None);
        let state = SharedState {
            registry,
            scanner,
            control: DeviceControl::new().unwrap(),
            pool,
        };
        Harness {
            app: router(state),
            prober,
        }
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn health_answers_ok() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/api/v0/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test(start_paused = true)]
    async fn device_lifecycle() {
        let h = harness().await;
        h.prober.set_online(Ipv4Addr::new(10, 0, 0, 5), 550.0, 15.0);

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/api/v0/devices",
            Some(json!({"address": "10.0.0.5"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let added: DeviceStatus = parse(&body);
        assert!(added.is_active);
        assert_eq!(added.hash_rate, 550.0);

        let (status, _) = call(
            &h.app,
            Method::POST,
            "/api/v0/devices",
            Some(json!({"address": "10.0.0.5"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &h.app,
            Method::PATCH,
            "/api/v0/devices/10.0.0.5",
            Some(json!({"displayName": "Garage"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let renamed: DeviceStatus = parse(&body);
        assert_eq!(renamed.display_name.as_deref(), Some("Garage"));
        assert_eq!(renamed.hash_rate, 550.0);

        let (_, body) = call(&h.app, Method::GET, "/api/v0/devices", None).await;
        let devices: Vec<DeviceStatus> = parse(&body);
        assert_eq!(devices.len(), 1);

        let (status, _) = call(&h.app, Method::DELETE, "/api/v0/devices/10.0.0.5", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&h.app, Method::GET, "/api/v0/devices/10.0.0.5", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_address_is_bad_request() {
        let h = harness().await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/api/v0/devices",
            Some(json!({"address": "10.0.0.300"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = parse(&body);
        assert!(error.error.contains("10.0.0.300"));
        assert_eq!(h.prober.calls(), 0);

        let (status, _) = call(&h.app, Method::GET, "/api/v0/devices/bitaxe", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn control_requires_registered_device() {
        let h = harness().await;

        let (status, _) = call(&h.app, Method::POST, "/api/v0/devices/10.0.0.9/restart", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &h.app,
            Method::PATCH,
            "/api/v0/devices/10.0.0.9/settings",
            Some(json!({"fanSpeed": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn one_scan_at_a_time() {
        let h = harness().await;

        let (status, body) = call(&h.app, Method::POST, "/api/v0/scan", Some(json!({"prefix": "10.0.0"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let progress: ScanProgress = parse(&body);
        assert!(progress.running);
        assert_eq!(progress.prefix.as_deref(), Some("10.0.0"));
        assert_eq!(progress.total, 254);

        let (status, _) = call(&h.app, Method::POST, "/api/v0/scan", Some(json!({"prefix": "10.0.0"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_scan_prefix_is_bad_request() {
        let h = harness().await;
        let (status, _) = call(&h.app, Method::POST, "/api/v0/scan", Some(json!({"prefix": "10.0"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.prober.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fleet_falls_back_to_device_figures() {
        let h = harness().await;
        h.prober.set_online(Ipv4Addr::new(10, 0, 0, 5), 550.0, 16.0);
        call(&h.app, Method::POST, "/api/v0/devices", Some(json!({"address": "10.0.0.5"}))).await;

        let (status, body) = call(&h.app, Method::GET, "/api/v0/fleet", None).await;
        assert_eq!(status, StatusCode::OK);
        let fleet: FleetOverview = parse(&body);
        assert_eq!(fleet.hash_rate_source, HashRateSource::Devices);
        assert_eq!(fleet.hash_rate, 550.0);
        assert_eq!(fleet.summary.active_count, 1);
        assert!(fleet.pool.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn swagger_ui_is_served() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        let doc: Value = parse(&body);
        assert!(doc["paths"]["/api/v0/devices/{address}"].is_object());
    }
}
