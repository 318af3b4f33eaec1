use axum::{Json, body::Bytes, extract::State};
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::{ControlError, ControlResult};
use crate::types::{
    CheckDeviceRequest, CheckDeviceResponse, HealthResponse, MkdirRequest, MkdirResponse,
    RunCommandRequest, RunCommandResponse,
};

/// Decode a JSON body. Any decoding problem is the caller's fault, so it maps to 400.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ControlResult<T> {
    serde_json::from_slice(body).map_err(|e| ControlError::BadRequest(e.to_string()))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /mkdir - Create a bind mount source on the host
pub async fn mkdir(
    State(state): State<AppState>,
    body: Bytes,
) -> ControlResult<Json<MkdirResponse>> {
    let request: MkdirRequest = parse_body(&body)?;
    if request.path.is_empty() {
        return Err(ControlError::BadRequest("path is required".to_string()));
    }

    let created = state.resolver.ensure_directory(&request.path).await?;
    info!("mkdir {} -> {}", request.path, created.display());

    Ok(Json(MkdirResponse {
        created_path: created.display().to_string(),
    }))
}

/// POST /checkDevice - Report whether a host path exists
pub async fn check_device(
    State(_state): State<AppState>,
    body: Bytes,
) -> ControlResult<Json<CheckDeviceResponse>> {
    let request: CheckDeviceRequest = parse_body(&body)?;
    let exists = fs::metadata(&request.path).await.is_ok();
    debug!("checkDevice {} -> {}", request.path, exists);

    Ok(Json(CheckDeviceResponse { exists }))
}

/// POST /runCommand - Run a shell command in a sibling container
pub async fn run_command(
    State(state): State<AppState>,
    body: Bytes,
) -> ControlResult<Json<RunCommandResponse>> {
    let request: RunCommandRequest = parse_body(&body)?;
    if request.container_id.is_empty() {
        return Err(ControlError::BadRequest(
            "containerId is required".to_string(),
        ));
    }

    info!("runCommand in {}: {}", request.container_id, request.command);
    let exit_code = match state
        .runner
        .run_command(&request.container_id, &request.command)
        .await
    {
        Ok(code) => code,
        Err(e) => {
            warn!("Command in {} failed to run: {:#}", request.container_id, e);
            1
        }
    };

    Ok(Json(RunCommandResponse { exit_code }))
}
