//! API server wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::v0;
use crate::control::DeviceControl;
use crate::pool_api::PoolSnapshot;
use crate::registry::RegistryHandle;
use crate::scanner::Scanner;
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(info(
    title = "axefleet",
    description = "Discovery, monitoring, and control of BitAxe-family miners"
))]
struct ApiDoc;

/// Handles shared by all request handlers.
#[derive(Clone)]
pub struct SharedState {
    pub registry: RegistryHandle,
    pub scanner: Arc<Scanner>,
    pub control: DeviceControl,
    /// Latest pool snapshot, `None` when no pool service is reachable.
    pub pool: watch::Receiver<Option<PoolSnapshot>>,
}

/// Build the full application router.
pub fn router(state: SharedState) -> Router {
    let (api, openapi) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    api.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `cancellation` fires.
pub async fn serve(
    addr: SocketAddr,
    state: SharedState,
    cancellation: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await.inspect_err(|e| {
        error!(%addr, error = %e, "Failed to bind API server");
    })?;
    info!(%addr, "API server listening");
    debug!("Swagger UI at http://{addr}/swagger-ui");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancellation.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}
