//! Per-application container lifecycle.
//!
//! One [`Lifecycle::run`] call walks an application through image resolution, environment
//! and mount assembly, creation, bootstrap copies, stream attachment and start. The
//! returned [`RunningApp`] owns every background task of the container (output and input
//! pumps, signal forwarding, resize monitoring, hosts patching) and is the stop handle.

pub mod bootstrap;
pub mod create;
pub mod environment;
mod error;
pub mod image;
pub mod mounts;
pub mod network;
pub mod resources;
mod signals;
mod streams;
mod terminal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ddexec_control::{ControlEndpoint, PathResolver, TargetIdentity};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, ExitWaiter};
use crate::host::HostEnvironment;
use crate::model::{ApplicationSpec, HostFlags, Startup};
use crate::registry::MappingRegistry;

pub use error::{LifecycleError, LifecycleResult};
pub use terminal::RawTerminal;

/// Version stamped into container labels.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Build and run switches that apply to every application of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub pull: bool,
    pub no_cache: bool,
    pub rebuild: bool,
    /// Stop after the image is ready
    pub image_only: bool,
    /// Suffix container names with a timestamp instead of a counter
    pub unique_names: bool,
    /// Replaces the command of the applications
    pub args: Vec<String>,
}

impl LaunchOptions {
    pub fn force_pull(&self) -> bool {
        self.pull || self.rebuild
    }

    pub fn skip_cache(&self) -> bool {
        self.no_cache || self.rebuild
    }
}

/// Host files and directories handed to containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub xauth: PathBuf,
    pub xorg_logs: PathBuf,
    pub mapping_dir: PathBuf,
}

/// Everything the lifecycle knows about the host, captured once per process.
#[derive(Debug, Clone)]
pub struct Session {
    pub host: HostEnvironment,
    pub flags: HostFlags,
    pub options: LaunchOptions,
    pub endpoint: ControlEndpoint,
    pub resolver: PathResolver,
    pub paths: SessionPaths,
}

impl Session {
    /// The user the container runs as, seen from inside.
    pub fn identity(&self, startup: &Startup) -> TargetIdentity {
        if startup.keep_user {
            let user = startup
                .discovered
                .image_user
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "root".to_string());
            let home = startup.discovered.image_home.clone().unwrap_or_else(|| {
                if user == "root" {
                    "/root".to_string()
                } else {
                    format!("/home/{user}")
                }
            });
            TargetIdentity { home, user }
        } else {
            TargetIdentity {
                home: format!("/home/{}", self.host.user),
                user: self.host.user.clone(),
            }
        }
    }
}

/// Outcome of [`Lifecycle::run`].
pub enum Launch {
    /// The image was prepared and no container was requested
    ImageOnly,
    Started(RunningApp),
}

pub struct Lifecycle {
    engine: Arc<dyn Engine>,
    session: Arc<Session>,
    registry: MappingRegistry,
}

impl Lifecycle {
    pub fn new(engine: Arc<dyn Engine>, session: Arc<Session>) -> Self {
        let registry = MappingRegistry::new(&session.paths.mapping_dir);
        Self {
            engine,
            session,
            registry,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Start one application and return its handle.
    pub async fn run(&self, mut app: ApplicationSpec) -> LifecycleResult<Launch> {
        let session = self.session.as_ref();
        let name = app.name();
        let mut startup = app.take_startup().resolve(&session.flags);
        if startup.interactive {
            app.stdin_open = true;
        }
        if startup.tty {
            app.tty = true;
        }

        let details = image::resolve(self.engine.as_ref(), &app, &session.options).await?;
        startup.discovered.env_path = details.env_var("PATH").map(str::to_string);
        startup.discovered.image_home = details.env_var("HOME").map(str::to_string);
        startup.discovered.image_user = details.user.clone();
        if session.options.image_only {
            info!("Image {} is ready", app.image);
            return Ok(Launch::ImageOnly);
        }

        if !app.security_opt.is_empty() {
            startup.discovered.seccomp = self.engine.info().await?.supports_seccomp();
        }

        let identity = session.identity(&startup);
        let env = environment::assemble(&app, &startup, session, &identity);
        let mount_list = mounts::mounts(&app, &startup, session, &identity).await?;
        let devices = mounts::devices(&app, &startup, &session.endpoint).await;
        let group_add = mounts::group_add(&app, &startup);

        let spec = create::container_spec(create::CreateInput {
            app: &app,
            startup: &startup,
            session,
            identity: &identity,
            env,
            mounts: mount_list,
            devices,
            group_add,
        })?;
        let container_name = create::container_name(
            self.engine.as_ref(),
            &name,
            session.options.unique_names,
            chrono::Utc::now().timestamp(),
        )
        .await?;
        let id = self.engine.create_container(&container_name, &spec).await?;
        info!("Created {} ({})", container_name, short_id(&id));

        let prepared = async {
            bootstrap::copy_files(self.engine.as_ref(), &id, &startup, session).await?;
            let attached = self.engine.attach(&id, app.stdin_open).await?;
            // Registered before start: the container is auto-removed on exit.
            let exit = self.engine.wait(&id).await?;
            LifecycleResult::Ok((attached, exit))
        }
        .await;
        let (attached, exit) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.discard(&container_name, &id).await;
                return Err(e);
            }
        };

        let host = &session.host;
        let raw = app.tty && app.stdin_open && host.is_interactive_terminal();
        let terminal = if raw {
            match RawTerminal::enable() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!("Cannot switch the terminal to raw mode: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let output = streams::spawn_output(attached.output);
        if app.stdin_open {
            streams::spawn_input(&mut tasks, cancel.clone(), attached.input, host.stdin_tty);
        }

        if let Err(e) = self.engine.start(&id).await {
            cancel.cancel();
            output.abort();
            drop(terminal);
            self.discard(&container_name, &id).await;
            return Err(e.into());
        }
        debug!("Started {}", container_name);

        signals::spawn_forwarder(&mut tasks, cancel.clone(), self.engine.clone(), id.clone());
        let track_size = (app.stdin_open || app.tty) && host.stdout_tty;
        if track_size {
            terminal::spawn_resize_monitor(
                &mut tasks,
                cancel.clone(),
                self.engine.clone(),
                id.clone(),
            );
        }
        network::spawn_patch(
            &mut tasks,
            cancel.clone(),
            self.engine.clone(),
            id.clone(),
            startup.hostnames.clone(),
        );

        if let Err(e) = self.registry.register(&id, &startup.xdg_open).await {
            warn!("Cannot register xdg-open handlers for {}: {}", name, e);
        }

        Ok(Launch::Started(RunningApp {
            name,
            id,
            daemon: startup.daemon,
            engine: self.engine.clone(),
            registry: self.registry.clone(),
            exit: Some(exit),
            exit_code: None,
            output: Some(output),
            tasks,
            cancel,
            terminal,
            track_size,
        }))
    }
}

impl Lifecycle {
    /// Remove a container that was created but never got running.
    async fn discard(&self, name: &str, id: &str) {
        match self.engine.remove(id).await {
            Ok(()) => debug!("Removed {} after a failed start", name),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Cannot remove {}: {}", name, e),
        }
    }
}

/// A started container and the tasks serving it.
pub struct RunningApp {
    name: String,
    id: String,
    daemon: bool,
    engine: Arc<dyn Engine>,
    registry: MappingRegistry,
    exit: Option<ExitWaiter>,
    exit_code: Option<i64>,
    output: Option<JoinHandle<()>>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    terminal: Option<RawTerminal>,
    track_size: bool,
}

impl RunningApp {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_id(&self) -> &str {
        &self.id
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Wait for the container to exit and return its exit code.
    pub async fn wait(&mut self) -> LifecycleResult<i64> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let Some(exit) = self.exit.take() else {
            return Ok(0);
        };

        let code = exit.await?;
        info!("{} exited with code {}", self.name, code);
        self.exit_code = Some(code);

        if let Some(output) = self.output.take() {
            if tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, output).await.is_err() {
                debug!("Output of {} did not finish in time", self.name);
            }
        }

        if let Err(e) = self.registry.clear(&self.id).await {
            warn!("Cannot clear xdg-open handlers of {}: {}", self.name, e);
        }
        Ok(code)
    }

    /// Cancel background tasks, restore the terminal and stop the container.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        while self.tasks.join_next().await.is_some() {}
        if let Some(output) = self.output.take() {
            output.abort();
        }

        if let Some(terminal) = self.terminal.take() {
            terminal.restore();
        }
        if self.track_size {
            terminal::reapply_host_size();
        }

        if self.exit_code.is_none() {
            match self.engine.stop(&self.id).await {
                Ok(()) => debug!("Stopped {}", self.name),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Cannot stop {}: {}", self.name, e),
            }
        }

        if let Err(e) = self.registry.clear(&self.id).await {
            warn!("Cannot clear xdg-open handlers of {}: {}", self.name, e);
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
