//! API data transfer objects.
//!
//! These types define the API contract shared between the daemon and
//! clients. Device, fleet, and scan payloads reuse the domain types
//! directly.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use crate::control::MinerSettings;
pub use crate::pool_api::{FleetOverview, HashRateSource, PoolSnapshot};
pub use crate::scanner::ScanProgress;
pub use crate::types::DeviceStatus;

/// Body of `POST /devices`.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct AddDeviceRequest {
    /// IPv4 address of the miner, e.g. `192.168.1.100`.
    pub address: String,
}

/// Body of `PATCH /devices/{address}`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicePatchRequest {
    /// New label. Empty or absent clears it.
    pub display_name: Option<String>,
}

/// Body of `POST /scan`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ScanRequest {
    /// Subnet like `192.168.1`. Detected from local interfaces if absent.
    pub prefix: Option<String>,
}

/// Error body returned with every non-2xx response.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
