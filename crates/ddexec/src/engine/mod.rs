//! Container engine contract and the Docker implementation.
//!
//! Everything the lifecycle needs from the engine goes through the [`Engine`] trait, so
//! tests can drive the lifecycle against an in-memory engine.

pub mod archive;
mod docker;
mod error;

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub use bollard::container::LogOutput;
pub use docker::DockerEngine;
pub use error::{EngineError, EngineResult};

/// Body of a container creation request.
pub type CreateContainer = bollard::models::ContainerCreateBody;

/// Streams of an attached container. Output frames keep their stdout/stderr origin; a
/// TTY container sends everything as console output.
pub struct Attached {
    pub output: BoxStream<'static, EngineResult<LogOutput>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Copy output frames to `stdout` and `stderr` until the stream ends.
pub async fn write_output<S, O, E>(output: S, stdout: &mut O, stderr: &mut E) -> EngineResult<()>
where
    S: Stream<Item = EngineResult<LogOutput>>,
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut output = std::pin::pin!(output);
    while let Some(frame) = output.next().await {
        match frame? {
            LogOutput::StdErr { message } => {
                stderr.write_all(&message).await?;
                stderr.flush().await?;
            }
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                stdout.write_all(&message).await?;
                stdout.flush().await?;
            }
            LogOutput::StdIn { .. } => {}
        }
    }
    Ok(())
}

/// Resolves with the container's exit code.
pub type ExitWaiter = BoxFuture<'static, EngineResult<i64>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDetails {
    pub id: String,
    pub user: Option<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl ImageDetails {
    /// Value of a `KEY=VALUE` entry in the image environment.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub tag: String,
    pub labels: BTreeMap<String, String>,
    pub pull: bool,
    pub no_cache: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub cmd: Vec<String>,
    pub user: Option<String>,
    /// Start without waiting for the command to finish
    pub detach: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Names without the leading `/`
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub running: bool,
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInfo {
    pub security_options: Vec<String>,
}

impl EngineInfo {
    pub fn supports_seccomp(&self) -> bool {
        self.security_options
            .iter()
            .any(|opt| opt.split(',').any(|part| part == "name=seccomp"))
    }
}

/// The container engine operations ddexec relies on.
#[async_trait]
pub trait Engine: Send + Sync {
    /// `Ok(None)` when the image does not exist locally.
    async fn inspect_image(&self, image: &str) -> EngineResult<Option<ImageDetails>>;

    async fn pull_image(&self, image: &str) -> EngineResult<()>;

    /// Build from a tar context and tag the result.
    async fn build_image(&self, context: Vec<u8>, options: &BuildOptions) -> EngineResult<()>;

    /// Create a container and return its id.
    async fn create_container(&self, name: &str, spec: &CreateContainer) -> EngineResult<String>;

    /// Extract a tar stream into `dir` inside the container.
    async fn copy_to_container(&self, id: &str, dir: &str, archive: Vec<u8>) -> EngineResult<()>;

    /// Fetch `path` from the container as a tar stream.
    async fn copy_from_container(&self, id: &str, path: &str) -> EngineResult<Vec<u8>>;

    async fn attach(&self, id: &str, stdin: bool) -> EngineResult<Attached>;

    /// Register a wait for the next exit. Must be called before `start` for auto-removed
    /// containers.
    async fn wait(&self, id: &str) -> EngineResult<ExitWaiter>;

    async fn start(&self, id: &str) -> EngineResult<()>;

    async fn stop(&self, id: &str) -> EngineResult<()>;

    /// Force-remove a container and its anonymous volumes.
    async fn remove(&self, id: &str) -> EngineResult<()>;

    async fn kill(&self, id: &str, signal: i32) -> EngineResult<()>;

    async fn resize(&self, id: &str, rows: u16, cols: u16) -> EngineResult<()>;

    /// Run a command; the exit code is `None` for detached runs.
    async fn exec(&self, id: &str, options: &ExecOptions) -> EngineResult<Option<i64>>;

    /// Containers whose name contains `name`.
    async fn list_containers(&self, name: &str) -> EngineResult<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails>;

    /// Gateway address of a network, e.g. `bridge`.
    async fn network_gateway(&self, network: &str) -> EngineResult<Option<String>>;

    async fn info(&self) -> EngineResult<EngineInfo>;
}
