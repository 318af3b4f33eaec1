use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::SOCKET_NAME;
use crate::error::{ControlError, ControlResult};
use crate::routes::create_router;

/// Control-plane service bound to a socket inside a private temporary directory.
pub struct ControlServer {
    state: AppState,
}

/// A running service. Dropping it without [`RunningServer::shutdown`] aborts the
/// server task; either way the temporary directory is removed.
pub struct RunningServer {
    socket: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
    dir: TempDir,
}

impl ControlServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Create a `ddexec*` temporary directory and start serving on `ddexec.sock` in it.
    pub async fn start(self) -> ControlResult<RunningServer> {
        let dir = tempfile::Builder::new().prefix("ddexec").tempdir()?;
        let socket = dir.path().join(SOCKET_NAME);

        // Remove a stale socket left behind by a crashed process
        let _ = tokio::fs::remove_file(&socket).await;

        let listener = UnixListener::bind(&socket)?;
        info!("Control plane listening on {}", socket.display());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = create_router(self.state);
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(RunningServer {
            socket,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            dir,
        })
    }
}

impl RunningServer {
    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Directory that containers bind-mount to reach the socket.
    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    /// Stop accepting requests, wait for in-flight ones, then remove the directory.
    pub async fn shutdown(mut self) -> ControlResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => debug!("Control plane stopped"),
                Ok(Err(e)) => warn!("Control plane exited with error: {}", e),
                Err(e) => return Err(ControlError::Internal(e.to_string())),
            }
        }
        Ok(())
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
