//! Docker engine on top of `bollard`, talking to the daemon's Unix socket.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::task::Poll;

use async_trait::async_trait;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, BuildImageOptionsBuilder, CreateContainerOptionsBuilder,
    CreateImageOptionsBuilder, DownloadFromContainerOptionsBuilder, InspectContainerOptions,
    InspectNetworkOptions, KillContainerOptionsBuilder, ListContainersOptions,
    RemoveContainerOptionsBuilder, ResizeContainerTTYOptionsBuilder, StartContainerOptions,
    StopContainerOptions, UploadToContainerOptionsBuilder, WaitContainerOptionsBuilder,
};
use bollard::{API_DEFAULT_VERSION, Docker, errors::Error as BollardError};
use futures::{FutureExt, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use super::error::status_code;
use super::{
    Attached, BuildOptions, ContainerDetails, ContainerSummary, CreateContainer, Engine,
    EngineError, EngineInfo, EngineResult, ExecOptions, ExitWaiter, ImageDetails, write_output,
};

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Split `repo[:tag]` for an image pull. Digest references are passed whole.
fn split_reference(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&image[..colon], Some(&image[colon + 1..]))
        }
        None => (image, Some("latest")),
    }
}

/// Fail on an error record of a pull or build progress stream.
fn progress_error(operation: &str, message: Option<String>) -> EngineResult<()> {
    match message.filter(|m| !m.is_empty()) {
        Some(message) => Err(EngineError::Stream {
            operation: operation.to_string(),
            message,
        }),
        None => Ok(()),
    }
}

/// Exit code of a finished wait. A non-zero status arrives as an error from `bollard`.
fn wait_outcome(
    item: Option<Result<bollard::models::ContainerWaitResponse, BollardError>>,
) -> EngineResult<i64> {
    match item {
        Some(Ok(response)) => {
            if let Some(error) = response.error.and_then(|e| e.message) {
                if !error.is_empty() {
                    return Err(EngineError::Stream {
                        operation: "wait".to_string(),
                        message: error,
                    });
                }
            }
            Ok(response.status_code)
        }
        Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
        Some(Err(e)) => Err(e.into()),
        None => Err(EngineError::Stream {
            operation: "wait".to_string(),
            message: "stream closed without an exit status".to_string(),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    socket: PathBuf,
}

impl DockerEngine {
    pub fn new(socket: impl Into<PathBuf>) -> EngineResult<Self> {
        let socket = socket.into();
        let docker = Docker::connect_with_unix(
            &socket.to_string_lossy(),
            DEFAULT_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        )
        .map_err(|e| EngineError::Connect {
            socket: socket.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { docker, socket })
    }

    /// Socket named by `DOCKER_HOST` (`unix://` only), else the default daemon socket.
    pub fn default_socket() -> PathBuf {
        std::env::var("DOCKER_HOST")
            .ok()
            .and_then(|host| host.strip_prefix("unix://").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET))
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Turn a 404 into [`EngineError::NotFound`] naming the missing object.
    fn not_found(target: &str, error: BollardError) -> EngineError {
        if status_code(&error) == Some(404) {
            EngineError::NotFound(target.to_string())
        } else {
            error.into()
        }
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn inspect_image(&self, image: &str) -> EngineResult<Option<ImageDetails>> {
        let inspect = match self.docker.inspect_image(image).await {
            Ok(inspect) => inspect,
            Err(e) if status_code(&e) == Some(404) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config = inspect.config.unwrap_or_default();
        Ok(Some(ImageDetails {
            id: inspect.id.unwrap_or_default(),
            user: config.user.filter(|u| !u.is_empty()),
            env: config.env.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
        }))
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        let (name, tag) = split_reference(image);
        let mut options = CreateImageOptionsBuilder::new().from_image(name);
        if let Some(tag) = tag {
            options = options.tag(tag);
        }
        info!("Pulling image {}", image);

        let mut progress = self
            .docker
            .create_image(Some(options.build()), None, None)
            .boxed();
        while let Some(record) = progress.try_next().await? {
            progress_error("pull image", record.error_detail.and_then(|d| d.message))?;
            if let Some(status) = record.status {
                debug!("pull image: {}", status);
            }
        }
        Ok(())
    }

    async fn build_image(&self, context: Vec<u8>, options: &BuildOptions) -> EngineResult<()> {
        let labels: HashMap<String, String> = options.labels.clone().into_iter().collect();
        let mut builder = BuildImageOptionsBuilder::new()
            .t(&options.tag)
            .labels(&labels)
            .rm(true)
            .forcerm(true)
            .nocache(options.no_cache);
        if options.pull {
            builder = builder.pull("1");
        }
        info!("Building image {}", options.tag);

        let mut progress = self
            .docker
            .build_image(builder.build(), None, Some(bollard::body_full(context.into())))
            .boxed();
        while let Some(record) = progress.try_next().await? {
            progress_error("build image", record.error_detail.and_then(|d| d.message))?;
            if let Some(stream) = record.stream {
                let stream = stream.trim_end();
                if !stream.is_empty() {
                    info!("{}", stream);
                }
            }
        }
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: &CreateContainer) -> EngineResult<String> {
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(name).build()),
                spec.clone(),
            )
            .await?;
        for warning in created.warnings {
            warn!("{}: {}", name, warning);
        }
        Ok(created.id)
    }

    async fn copy_to_container(&self, id: &str, dir: &str, archive: Vec<u8>) -> EngineResult<()> {
        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptionsBuilder::new().path(dir).build()),
                bollard::body_full(archive.into()),
            )
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn copy_from_container(&self, id: &str, path: &str) -> EngineResult<Vec<u8>> {
        let mut chunks = self
            .docker
            .download_from_container(
                id,
                Some(DownloadFromContainerOptionsBuilder::new().path(path).build()),
            )
            .boxed();
        let mut archive = Vec::new();
        while let Some(chunk) = chunks
            .try_next()
            .await
            .map_err(|e| Self::not_found(path, e))?
        {
            archive.extend_from_slice(&chunk);
        }
        Ok(archive)
    }

    async fn attach(&self, id: &str, stdin: bool) -> EngineResult<Attached> {
        let options = AttachContainerOptionsBuilder::new()
            .stream(true)
            .stdin(stdin)
            .stdout(true)
            .stderr(true)
            .build();
        let attached = self.docker.attach_container(id, Some(options)).await?;
        Ok(Attached {
            output: attached.output.map_err(EngineError::from).boxed(),
            input: attached.input,
        })
    }

    async fn wait(&self, id: &str) -> EngineResult<ExitWaiter> {
        let options = WaitContainerOptionsBuilder::new()
            .condition("next-exit")
            .build();
        let mut stream = self.docker.wait_container(id, Some(options)).boxed();
        // The request goes out on the first poll.
        let first = futures::poll!(stream.next());
        Ok(async move {
            match first {
                Poll::Ready(item) => wait_outcome(item),
                Poll::Pending => wait_outcome(stream.next().await),
            }
        }
        .boxed())
    }

    async fn start(&self, id: &str) -> EngineResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn stop(&self, id: &str) -> EngineResult<()> {
        match self.docker.stop_container(id, None::<StopContainerOptions>).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(Self::not_found(id, e)),
        }
    }

    async fn remove(&self, id: &str) -> EngineResult<()> {
        let options = RemoveContainerOptionsBuilder::new()
            .force(true)
            .v(true)
            .build();
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn kill(&self, id: &str, signal: i32) -> EngineResult<()> {
        let options = KillContainerOptionsBuilder::new()
            .signal(&signal.to_string())
            .build();
        self.docker
            .kill_container(id, Some(options))
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn resize(&self, id: &str, rows: u16, cols: u16) -> EngineResult<()> {
        let options = ResizeContainerTTYOptionsBuilder::new()
            .h(i32::from(rows))
            .w(i32::from(cols))
            .build();
        self.docker
            .resize_container_tty(id, options)
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn exec(&self, id: &str, options: &ExecOptions) -> EngineResult<Option<i64>> {
        let config = CreateExecOptions {
            cmd: Some(options.cmd.clone()),
            user: options.user.clone(),
            attach_stdout: Some(!options.detach),
            attach_stderr: Some(!options.detach),
            tty: Some(false),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(id, config)
            .await
            .map_err(|e| Self::not_found(id, e))?;

        let start = StartExecOptions {
            detach: options.detach,
            ..Default::default()
        };
        match self.docker.start_exec(&created.id, Some(start)).await? {
            StartExecResults::Detached => return Ok(None),
            StartExecResults::Attached { output, .. } => {
                let mut stdout = tokio::io::stdout();
                let mut stderr = tokio::io::stderr();
                write_output(output.map_err(EngineError::from), &mut stdout, &mut stderr)
                    .await?;
            }
        }

        let inspect = self.docker.inspect_exec(&created.id).await?;
        Ok(Some(inspect.exit_code.unwrap_or(0)))
    }

    async fn list_containers(&self, name: &str) -> EngineResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions {
            all: true,
            filters: Some(HashMap::from([(
                "name".to_string(),
                vec![name.to_string()],
            )])),
            ..Default::default()
        };
        let entries = self.docker.list_containers(Some(options)).await?;
        Ok(entries
            .into_iter()
            .map(|entry| ContainerSummary {
                id: entry.id.unwrap_or_default(),
                names: entry
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Self::not_found(id, e))?;
        let gateway = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default()
            .into_values()
            .find_map(|n| n.gateway.filter(|g| !g.is_empty()));
        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_default(),
            running: inspect.state.and_then(|s| s.running).unwrap_or(false),
            gateway,
        })
    }

    async fn network_gateway(&self, network: &str) -> EngineResult<Option<String>> {
        let inspect = self
            .docker
            .inspect_network(network, None::<InspectNetworkOptions>)
            .await
            .map_err(|e| Self::not_found(network, e))?;
        Ok(inspect
            .ipam
            .and_then(|ipam| ipam.config)
            .unwrap_or_default()
            .into_iter()
            .find_map(|c| c.gateway.filter(|g| !g.is_empty())))
    }

    async fn info(&self) -> EngineResult<EngineInfo> {
        let info = self.docker.info().await?;
        Ok(EngineInfo {
            security_options: info.security_options.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerWaitExitError, ContainerWaitResponse};

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("alpine"), ("alpine", Some("latest")));
        assert_eq!(split_reference("alpine:3.19"), ("alpine", Some("3.19")));
        assert_eq!(
            split_reference("localhost:5000/team/app"),
            ("localhost:5000/team/app", Some("latest"))
        );
        assert_eq!(
            split_reference("localhost:5000/team/app:dev"),
            ("localhost:5000/team/app", Some("dev"))
        );
        assert_eq!(
            split_reference("alpine@sha256:abc"),
            ("alpine@sha256:abc", None)
        );
    }

    #[test]
    fn test_wait_outcome() {
        let clean = ContainerWaitResponse {
            status_code: 0,
            error: None,
        };
        assert_eq!(wait_outcome(Some(Ok(clean))).unwrap(), 0);

        let failed = BollardError::DockerContainerWaitError {
            error: String::new(),
            code: 3,
        };
        assert_eq!(wait_outcome(Some(Err(failed))).unwrap(), 3);

        let broken = ContainerWaitResponse {
            status_code: 0,
            error: Some(ContainerWaitExitError {
                message: Some("container vanished".to_string()),
            }),
        };
        assert!(wait_outcome(Some(Ok(broken))).is_err());
        assert!(wait_outcome(None).is_err());
    }

    #[test]
    fn test_progress_error() {
        assert!(progress_error("build image", None).is_ok());
        assert!(progress_error("build image", Some(String::new())).is_ok());
        let err = progress_error("build image", Some("no such file".to_string())).unwrap_err();
        assert_eq!(err.to_string(), "build image failed: no such file");
    }

    #[tokio::test]
    async fn test_unreachable_socket() {
        let dir = tempfile::tempdir().unwrap();
        let err = match DockerEngine::new(dir.path().join("missing.sock")) {
            Ok(engine) => engine.info().await.unwrap_err(),
            Err(e) => e,
        };
        assert!(err.is_unreachable());
    }
}
