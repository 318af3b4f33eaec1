use std::env;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::client::ControlClient;
use crate::error::{ControlError, ControlResult};
use crate::paths::PathResolver;
use crate::server::RunningServer;
use crate::{ENV_CONTROL_DIR, ENV_SERVER_SOCK};

/// How this process reaches the control plane, and which directory it shares with the
/// containers it starts.
///
/// Built once where the process is wired together and passed to everything that needs
/// it. A process started inside a ddexec container inherits the endpoint through its
/// environment and is "brokered": host filesystem operations go through the socket
/// because the local filesystem is the container's, not the host's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEndpoint {
    socket: Option<PathBuf>,
    share_dir: PathBuf,
    brokered: bool,
}

impl ControlEndpoint {
    /// Endpoint inherited from a parent process, if there is one.
    pub fn inherited(server_sock: Option<PathBuf>, control_dir: Option<PathBuf>) -> Option<Self> {
        if let Some(socket) = server_sock {
            let share_dir = control_dir
                .or_else(|| socket.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("/"));
            return Some(Self {
                socket: Some(socket),
                share_dir,
                brokered: true,
            });
        }

        control_dir.map(|share_dir| Self {
            socket: None,
            share_dir,
            brokered: false,
        })
    }

    /// Read `DDEXEC_SERVER_SOCK` and `DDEXEC_CONTROL_DIR`.
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| {
            env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self::inherited(var(ENV_SERVER_SOCK), var(ENV_CONTROL_DIR))
    }

    /// Endpoint of a service started by this process.
    pub fn hosted(server: &RunningServer) -> Self {
        Self {
            socket: Some(server.socket_path().to_path_buf()),
            share_dir: server.directory().to_path_buf(),
            brokered: false,
        }
    }

    pub fn socket(&self) -> Option<&Path> {
        self.socket.as_deref()
    }

    pub fn share_dir(&self) -> &Path {
        &self.share_dir
    }

    pub fn is_brokered(&self) -> bool {
        self.brokered
    }

    /// A client for the socket, whether or not host operations are brokered.
    pub fn client(&self) -> Option<ControlClient> {
        self.socket.as_ref().map(ControlClient::new)
    }

    fn broker(&self) -> Option<ControlClient> {
        if self.brokered { self.client() } else { None }
    }

    /// Make sure a bind mount source exists on the host and return its host path.
    ///
    /// When `restricted` is set a missing directory is only created inside the shared
    /// host home or `/tmp`. Broker failures fall back to the resolved path as-is.
    pub async fn ensure_source(
        &self,
        resolver: &PathResolver,
        path: &str,
        restricted: bool,
    ) -> ControlResult<PathBuf> {
        if let Some(client) = self.broker() {
            return match client.mkdir(path).await {
                Ok(created) => Ok(created),
                Err(e) => {
                    debug!("Control mkdir for {} failed: {}", path, e);
                    Ok(resolver.source(path))
                }
            };
        }

        let resolved = resolver.source(path);
        match fs::metadata(&resolved).await {
            Ok(_) => return Ok(resolved),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if restricted && !resolver.is_shareable(&resolved) {
            return Err(ControlError::Forbidden(path.to_string()));
        }

        info!("Creating directory: {}", resolved.display());
        fs::create_dir_all(&resolved).await?;
        Ok(resolved)
    }

    /// Whether a device (or any path) exists on the host.
    pub async fn device_exists(&self, path: &str) -> bool {
        if let Some(client) = self.broker() {
            match client.check_device(path).await {
                Ok(exists) => return exists,
                Err(e) => debug!("Control checkDevice for {} failed: {}", path, e),
            }
        }
        fs::metadata(path).await.is_ok()
    }
}
