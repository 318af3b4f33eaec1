use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use log::{LevelFilter, debug, info};

use ddexec::dispatch::{self, Dispatcher};
use ddexec::host::env_flag;
use ddexec::lifecycle::environment::ENV_MAPPING_DIR;
use ddexec::model::{DoNotShare, HostFlags, load_applications};
use ddexec::settings::{APP_NAME, Settings};
use ddexec::supervisor::{self, Supervisor};
use ddexec::{
    DockerEngine, Engine, HostEnvironment, LaunchOptions, Lifecycle, MappingRegistry, Session,
    SessionPaths,
};
use ddexec_control::{ControlEndpoint, PathResolver};

const DEFAULT_XAUTH: &str = "/tmp/.docker.xauth";
const XDG_OPEN_NAME: &str = "xdg-open";
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

fn main() {
    let program = invoked_name();
    if program == XDG_OPEN_NAME {
        std::process::exit(xdg_open_main(&program));
    }

    match try_main() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let _ = writeln!(io::stderr(), "{err:?}");
            std::process::exit(1);
        }
    }
}

fn invoked_name() -> String {
    env::args_os()
        .next()
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| APP_NAME.to_string())
}

fn try_main() -> Result<i32> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("settings: {:#?}", ctx.settings);

    // Blocking stdin reads must not hold the process open after the last container exits.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the async runtime")?;
    let result = runtime.block_on(async_main(ctx, cli.launch));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run desktop applications in containers that share the host session.",
    after_help = "When invoked as `xdg-open`, opens a URL or file with the handler a running container registered."
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(flatten)]
    launch: LaunchCommand,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the settings file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Args)]
struct LaunchCommand {
    /// Application document (YAML)
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Replace the command of the applications
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    #[command(flatten)]
    build: BuildOpts,
    #[command(flatten)]
    host: HostOpts,
}

// Each switch is also on when its `DDEXEC_*` variable is set to a non-empty value.
#[derive(Debug, Clone, Args)]
struct BuildOpts {
    /// Always pull (or rebuild) the image
    #[arg(long)]
    pull: bool,
    /// Build without the layer cache
    #[arg(long = "no-cache")]
    no_cache: bool,
    /// Pull base images and build without cache
    #[arg(long)]
    rebuild: bool,
    /// Prepare images and exit without starting containers
    #[arg(long = "image-only")]
    image_only: bool,
    /// Suffix container names with a timestamp instead of a counter
    #[arg(long = "unique-names")]
    unique_names: bool,
    /// Keep stdin open
    #[arg(short = 'i', long)]
    interactive: bool,
    /// Allocate a TTY
    #[arg(short = 't', long)]
    tty: bool,
}

// Switches mirror `KEEP_USER`, `USE_HOST*`, `DO_NOT_SHARE_*` and the other host variables.
#[derive(Debug, Clone, Args)]
struct HostOpts {
    /// Run as a full desktop session
    #[arg(long = "desktop-mode")]
    desktop_mode: bool,
    /// Keep the image's user instead of the caller's
    #[arg(long = "keep-user")]
    keep_user: bool,
    /// Bind the host X11 socket directory
    #[arg(long = "use-host-x11")]
    use_host_x11: bool,
    /// Bind the host D-Bus sockets
    #[arg(long = "use-host-dbus")]
    use_host_dbus: bool,
    /// Both --use-host-x11 and --use-host-dbus
    #[arg(long = "use-host")]
    use_host: bool,
    /// Rewrite arguments under $HOME to the shared home
    #[arg(long = "fix-home-args")]
    fix_home_args: bool,
    /// Give the container access to USB security keys
    #[arg(long = "yubikey")]
    yubikey: bool,
    /// File holding the container user's password
    #[arg(long = "password-file", env = "PASSWORD_FILE", value_name = "PATH")]
    password_file: Option<PathBuf>,
    /// Extra `name=target` host mappings, comma separated
    #[arg(long, env = "DDEXEC_HOSTNAMES", value_name = "LIST")]
    hostnames: Option<String>,

    #[arg(long = "no-share-x11", hide = true)]
    no_share_x11: bool,
    #[arg(long = "no-share-dbus", hide = true)]
    no_share_dbus: bool,
    #[arg(long = "no-share-shm", hide = true)]
    no_share_shm: bool,
    #[arg(long = "no-share-sound", hide = true)]
    no_share_sound: bool,
    #[arg(long = "no-share-video", hide = true)]
    no_share_video: bool,
    #[arg(long = "no-share-docker", hide = true)]
    no_share_docker: bool,
    #[arg(long = "no-share-home", hide = true)]
    no_share_home: bool,
    #[arg(long = "no-share-tools", hide = true)]
    no_share_tools: bool,
}

impl LaunchCommand {
    /// Build toggles from the command line, each also switched on by its variable.
    fn options(&self, env: &HostEnvironment) -> LaunchOptions {
        let build = &self.build;
        LaunchOptions {
            pull: build.pull || env.flag("DDEXEC_PULL"),
            no_cache: build.no_cache || env.flag("DDEXEC_NO_CACHE"),
            rebuild: build.rebuild || env.flag("DDEXEC_REBUILD"),
            image_only: build.image_only || env.flag("DDEXEC_IMAGE_ONLY"),
            unique_names: build.unique_names || env.flag("DDEXEC_UNIQUE_NAMES"),
            args: self.args.clone(),
        }
    }

    fn host_flags(&self, settings: &Settings, env: &HostEnvironment) -> HostFlags {
        let host = &self.host;
        let use_host = host.use_host || env.flag("USE_HOST");
        HostFlags {
            desktop_mode: host.desktop_mode || env.flag("DDEXEC_DESKTOP_MODE"),
            keep_user: host.keep_user || env.flag("KEEP_USER"),
            use_host_x11: host.use_host_x11 || use_host || env.flag("USE_HOST_X11"),
            use_host_dbus: host.use_host_dbus || use_host || env.flag("USE_HOST_DBUS"),
            fix_home_args: host.fix_home_args || env.flag("FIX_HOME_ARGS"),
            yubikey: host.yubikey || env.flag("YUBIKEY_SUPPORT"),
            interactive: self.build.interactive || env.flag("DDEXEC_INTERACTIVE"),
            tty: self.build.tty || env.flag("DDEXEC_TTY"),
            do_not_share: DoNotShare {
                x11: host.no_share_x11 || env.flag("DO_NOT_SHARE_X11"),
                dbus: host.no_share_dbus || env.flag("DO_NOT_SHARE_DBUS"),
                shm: host.no_share_shm || env.flag("DO_NOT_SHARE_SHM"),
                sound: host.no_share_sound || env.flag("DO_NOT_SHARE_SOUND"),
                video: host.no_share_video || env.flag("DO_NOT_SHARE_VIDEO"),
                docker: host.no_share_docker || env.flag("DO_NOT_SHARE_DOCKER"),
                home: host.no_share_home || env.flag("DO_NOT_SHARE_HOME"),
                tools: host.no_share_tools || env.flag("DO_NOT_SHARE_TOOLS"),
            },
            password_file: host
                .password_file
                .clone()
                .or_else(|| settings.password_file.clone()),
            hostnames: host.hostnames.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    settings: Settings,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let settings = Settings::load(common.config.as_deref()).context("loading settings")?;
        Ok(Self { common, settings })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{APP_NAME}={level},ddexec_control={level}"))
        });

        // Container output owns stdout.
        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.target(env_logger::Target::Stderr);
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug || env_flag("DDEXEC_DEBUG") {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

async fn async_main(ctx: RuntimeContext, cmd: LaunchCommand) -> Result<i32> {
    let settings = &ctx.settings;
    let apps = load_applications(&cmd.file)
        .with_context(|| format!("loading applications from {}", cmd.file.display()))?;

    let host = HostEnvironment::capture();
    let socket = settings
        .docker_socket
        .clone()
        .unwrap_or_else(DockerEngine::default_socket);
    let engine: Arc<dyn Engine> = Arc::new(DockerEngine::new(socket)?);

    let resolver = match (&settings.home, host.var(ddexec_control::ENV_HOST_HOME)) {
        (Some(home), None) => PathResolver::new(home),
        _ => PathResolver::from_env(),
    };

    let (endpoint, server) = match ControlEndpoint::from_env() {
        Some(endpoint) => {
            debug!("Using inherited control endpoint {:?}", endpoint);
            (endpoint, None)
        }
        None => {
            let server = supervisor::host_control_plane(engine.clone(), resolver.clone())
                .await
                .context("starting the control plane")?;
            (ControlEndpoint::hosted(&server), Some(server))
        }
    };

    let paths = SessionPaths {
        xauth: settings
            .xauth
            .clone()
            .or_else(|| host.var("XAUTH").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_XAUTH)),
        xorg_logs: settings.xorg_logs.clone(),
        mapping_dir: host
            .var(ENV_MAPPING_DIR)
            .map(PathBuf::from)
            .or_else(|| settings.mapping_dir.clone())
            .unwrap_or_else(|| endpoint.share_dir().to_path_buf()),
    };

    let session = Session {
        flags: cmd.host_flags(settings, &host),
        options: cmd.options(&host),
        host,
        endpoint,
        resolver,
        paths,
    };
    let lifecycle = Arc::new(Lifecycle::new(engine, Arc::new(session)));
    let mut supervisor = Supervisor::new(lifecycle);

    let result = supervisor.run(apps).await;
    supervisor.shutdown().await;
    if let Some(server) = server {
        if let Err(e) = server.shutdown().await {
            log::warn!("Control plane shutdown failed: {}", e);
        }
    }

    let code = result?;
    info!("Exiting with code {}", code);
    Ok(i32::try_from(code).unwrap_or(1))
}

fn xdg_open_main(program: &str) -> i32 {
    let args: Vec<String> = env::args().skip(1).collect();
    let target = match args.first().map(String::as_str) {
        Some("-h" | "--help") => {
            print!("{}", dispatch::usage(program));
            return dispatch::EXIT_OK;
        }
        Some("--version") => {
            println!("{}", dispatch::version(program));
            return dispatch::EXIT_OK;
        }
        Some(target) if args.len() == 1 => target.to_string(),
        _ => {
            eprint!("{}", dispatch::usage(program));
            return dispatch::EXIT_MALFORMED_URL;
        }
    };

    let level = if env::var_os("DDEXEC_DEBUG").is_some() {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(format!("{APP_NAME}={level},ddexec_control={level}"))
        .try_init()
        .ok();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = writeln!(io::stderr(), "{e}");
            return dispatch::EXIT_FAILED;
        }
    };

    runtime.block_on(async {
        let endpoint = ControlEndpoint::from_env();
        let mapping_dir = env::var_os(ENV_MAPPING_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| endpoint.as_ref().map(|e| e.share_dir().to_path_buf()))
            .unwrap_or_else(env::temp_dir);
        let engine: Arc<dyn Engine> = match DockerEngine::new(DockerEngine::default_socket()) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                let _ = writeln!(io::stderr(), "{e}");
                return dispatch::EXIT_FAILED;
            }
        };
        let dispatcher = Dispatcher::new(
            engine,
            MappingRegistry::new(mapping_dir),
            endpoint.as_ref().and_then(ControlEndpoint::client),
        );
        dispatcher.invoke(&target).await
    })
}
