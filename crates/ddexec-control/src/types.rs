//! Request and response bodies of the control-plane routes.

use serde::{Deserialize, Serialize};

pub const ROUTE_MKDIR: &str = "/mkdir";
pub const ROUTE_CHECK_DEVICE: &str = "/checkDevice";
pub const ROUTE_RUN_COMMAND: &str = "/runCommand";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MkdirRequest {
    #[serde(alias = "Path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MkdirResponse {
    #[serde(alias = "CreatedPath")]
    pub created_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDeviceRequest {
    #[serde(alias = "Path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDeviceResponse {
    #[serde(alias = "Exists")]
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandRequest {
    #[serde(alias = "ContainerId")]
    pub container_id: String,
    #[serde(alias = "Command")]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandResponse {
    #[serde(alias = "ExitCode")]
    pub exit_code: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
