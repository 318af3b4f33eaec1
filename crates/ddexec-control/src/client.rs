use std::path::{Path, PathBuf};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode, header};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::types::{
    CheckDeviceRequest, CheckDeviceResponse, MkdirRequest, MkdirResponse, ROUTE_CHECK_DEVICE,
    ROUTE_MKDIR, ROUTE_RUN_COMMAND, RunCommandRequest, RunCommandResponse,
};

/// Client for the control-plane service on a Unix socket.
#[derive(Clone)]
pub struct ControlClient {
    socket: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl ControlClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            client: Client::unix(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Ask the host to create `path`, returning the resolved host path.
    pub async fn mkdir(&self, path: &str) -> ClientResult<PathBuf> {
        let response: MkdirResponse = self
            .post(
                ROUTE_MKDIR,
                &MkdirRequest {
                    path: path.to_string(),
                },
            )
            .await?;
        Ok(PathBuf::from(response.created_path))
    }

    pub async fn check_device(&self, path: &str) -> ClientResult<bool> {
        let response: CheckDeviceResponse = self
            .post(
                ROUTE_CHECK_DEVICE,
                &CheckDeviceRequest {
                    path: path.to_string(),
                },
            )
            .await?;
        Ok(response.exists)
    }

    pub async fn run_command(&self, container_id: &str, command: &str) -> ClientResult<i64> {
        let response: RunCommandResponse = self
            .post(
                ROUTE_RUN_COMMAND,
                &RunCommandRequest {
                    container_id: container_id.to_string(),
                    command: command.to_string(),
                },
            )
            .await?;
        Ok(response.exit_code)
    }

    async fn post<B, R>(&self, route: &'static str, body: &B) -> ClientResult<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let uri: hyper::Uri = Uri::new(&self.socket, route).into();
        let payload = serde_json::to_vec(body)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        debug!("control request {} via {}", route, self.socket.display());
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .to_bytes();

        if status != StatusCode::OK {
            return Err(ClientError::Status {
                route,
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}
