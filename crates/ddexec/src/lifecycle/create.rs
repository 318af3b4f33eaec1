//! Container creation body and naming.

use std::collections::HashMap;

use bollard::models::{DeviceMapping, HostConfig, Mount, PortBinding};
use ddexec_control::TargetIdentity;
use tracing::{debug, warn};

use super::error::{LifecycleError, LifecycleResult};
use super::resources::{nano_cpus, ram_in_bytes};
use super::{Session, VERSION};
use crate::engine::{CreateContainer, Engine, EngineResult};
use crate::model::{ApplicationSpec, ConfigError, Scalar, Startup, StringOrList, parse_duration};

pub const LABEL_NAME: &str = "ddexec.name";
pub const LABEL_VERSION: &str = "ddexec.version";

/// Assembled pieces handed to [`container_spec`].
pub struct CreateInput<'a> {
    pub app: &'a ApplicationSpec,
    pub startup: &'a Startup,
    pub session: &'a Session,
    pub identity: &'a TargetIdentity,
    pub env: Vec<String>,
    pub mounts: Vec<Mount>,
    pub devices: Vec<DeviceMapping>,
    pub group_add: Vec<String>,
}

pub fn container_spec(input: CreateInput<'_>) -> LifecycleResult<CreateContainer> {
    let CreateInput {
        app,
        startup,
        session,
        identity,
        env,
        mounts,
        devices,
        group_add,
    } = input;
    let host = &session.host;

    let mut labels: HashMap<String, String> = app.labels.to_map().into_iter().collect();
    labels.insert(LABEL_NAME.to_string(), app.name());
    labels.insert(LABEL_VERSION.to_string(), VERSION.to_string());

    let (exposed_ports, port_bindings) = ports(&app.ports)?;

    let stop_timeout = match &app.stop_timeout {
        Some(value) => Some(parse_duration(value)?.as_secs() as i64),
        None => None,
    };

    let entrypoint = if app.entrypoint.is_empty() {
        None
    } else {
        Some(split_words(&app.entrypoint)?)
    };
    let cmd = command(app, startup, session)?;
    let security_opt = security_options(&app.security_opt, startup.discovered.seccomp)?;
    let tmpfs = tmpfs(&app.tmpfs);

    let host_config = HostConfig {
        auto_remove: Some(true),
        privileged: Some(app.privileged || startup.yubikey),
        readonly_rootfs: Some(app.read_only),
        init: app.init,
        mounts: Some(mounts),
        devices: non_empty(devices),
        group_add: non_empty(group_add),
        security_opt: non_empty(security_opt),
        cap_add: non_empty(app.cap_add.clone()),
        cap_drop: non_empty(app.cap_drop.clone()),
        network_mode: app.network_mode.clone(),
        ipc_mode: app.ipc.clone(),
        pid_mode: app.pid.clone(),
        tmpfs: (!tmpfs.is_empty()).then_some(tmpfs),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        memory: bytes(&app.mem_limit)?,
        memory_reservation: bytes(&app.mem_reservation)?,
        memory_swap: bytes(&app.memswap_limit)?,
        memory_swappiness: app.mem_swappiness,
        shm_size: bytes(&app.shm_size)?,
        nano_cpus: match &app.cpus {
            Some(cpus) => Some(nano_cpus(cpus)?),
            None => None,
        },
        cpu_shares: app.cpu_shares,
        cpu_period: app.cpu_period,
        cpu_quota: app.cpu_quota,
        cpuset_cpus: app.cpuset.clone(),
        pids_limit: app.pids_limit,
        oom_score_adj: app.oom_score_adj,
        oom_kill_disable: app.oom_kill_disable,
        ..Default::default()
    };

    Ok(CreateContainer {
        image: Some(app.image.clone()),
        hostname: app.hostname.clone(),
        user: (!startup.keep_user).then(|| format!("{}:{}", host.uid, host.gid)),
        attach_stdin: Some(app.stdin_open),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(app.tty),
        open_stdin: Some(app.stdin_open),
        stdin_once: Some(false),
        env: Some(env),
        cmd: non_empty(cmd),
        entrypoint,
        working_dir: app
            .working_dir
            .as_deref()
            .map(|dir| session.resolver.target(dir, identity)),
        labels: Some(labels),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        stop_signal: app.stop_signal.clone(),
        stop_timeout,
        host_config: Some(host_config),
        ..Default::default()
    })
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

fn bytes(value: &Option<Scalar>) -> LifecycleResult<Option<i64>> {
    match value {
        Some(value) => Ok(Some(ram_in_bytes(value)?)),
        None => Ok(None),
    }
}

/// Command line of the container: extra arguments replace the declared command.
fn command(
    app: &ApplicationSpec,
    startup: &Startup,
    session: &Session,
) -> LifecycleResult<Vec<String>> {
    let args = &session.options.args;
    if args.is_empty() {
        return split_words(&app.command);
    }
    if !startup.fix_home_args {
        return Ok(args.clone());
    }

    let caller_home = session.host.home.to_string_lossy();
    let shared_home = session.resolver.host_home().to_string_lossy();
    Ok(args
        .iter()
        .map(|arg| rewrite_home(arg, &caller_home, &shared_home))
        .collect())
}

/// Replace a leading `caller_home` path component with `shared_home`.
pub fn rewrite_home(arg: &str, caller_home: &str, shared_home: &str) -> String {
    let caller_home = caller_home.trim_end_matches('/');
    if caller_home.is_empty() || caller_home == shared_home {
        return arg.to_string();
    }
    match arg.strip_prefix(caller_home) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{}", shared_home.trim_end_matches('/'), rest)
        }
        _ => arg.to_string(),
    }
}

/// A single string, or a list holding one string, is split with shell word rules. Longer
/// lists are taken as-is.
fn split_words(value: &StringOrList) -> LifecycleResult<Vec<String>> {
    let words = value.to_vec();
    match words.as_slice() {
        [line] => shlex::split(line).ok_or_else(|| LifecycleError::InvalidCommand {
            command: line.clone(),
        }),
        _ => Ok(words),
    }
}

/// `path[:options]` entries.
fn tmpfs(value: &StringOrList) -> HashMap<String, String> {
    value
        .to_vec()
        .into_iter()
        .map(|entry| match entry.split_once(':') {
            Some((path, options)) => (path.to_string(), options.to_string()),
            None => (entry, String::new()),
        })
        .collect()
}

/// Security options, applied only when the daemon supports seccomp.
///
/// A `seccomp=<file>` profile is read and sent inline as compact JSON.
fn security_options(options: &[String], seccomp: bool) -> LifecycleResult<Vec<String>> {
    if options.is_empty() {
        return Ok(Vec::new());
    }
    if !seccomp {
        warn!("The engine does not support seccomp, ignoring security_opt");
        return Ok(Vec::new());
    }

    let mut resolved = Vec::with_capacity(options.len());
    for option in options {
        let Some((key, value)) = option.split_once(['=', ':']) else {
            resolved.push(option.clone());
            continue;
        };
        if key != "seccomp" || value == "unconfined" {
            resolved.push(option.clone());
            continue;
        }

        let text = std::fs::read_to_string(value)
            .map_err(|e| LifecycleError::SecurityOpt(format!("{option}: {e}")))?;
        let profile: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| LifecycleError::SecurityOpt(format!("{option}: {e}")))?;
        debug!("Inlined seccomp profile {}", value);
        resolved.push(format!("seccomp={profile}"));
    }
    Ok(resolved)
}

type PortMaps = (
    HashMap<String, HashMap<(), ()>>,
    HashMap<String, Option<Vec<PortBinding>>>,
);

fn ports(ports: &[Scalar]) -> Result<PortMaps, ConfigError> {
    let mut exposed = HashMap::new();
    let mut bindings: HashMap<String, Vec<PortBinding>> = HashMap::new();
    for port in ports {
        let (key, binding) = parse_port(&port.to_string())?;
        exposed.insert(key.clone(), HashMap::new());
        bindings.entry(key).or_default().push(binding);
    }
    let bindings = bindings.into_iter().map(|(k, v)| (k, Some(v))).collect();
    Ok((exposed, bindings))
}

/// Parse `[ip:]host:container[/proto]` or a bare `container[/proto]`.
///
/// Returns the `port/proto` key and the host side of the binding; a bare container
/// port gets a random host port.
pub fn parse_port(spec: &str) -> Result<(String, PortBinding), ConfigError> {
    let invalid = || ConfigError::InvalidPort(spec.to_string());
    let (address, protocol) = spec.split_once('/').unwrap_or((spec, "tcp"));

    let (host_ip, rest) = match address.strip_prefix('[') {
        Some(bracketed) => {
            let (ip, rest) = bracketed.split_once("]:").ok_or_else(invalid)?;
            (ip.to_string(), rest)
        }
        None => ("".to_string(), address),
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let (host_ip, host_port, container) = match parts.as_slice() {
        [container] if host_ip.is_empty() => (String::new(), "", *container),
        [host, container] => (host_ip, *host, *container),
        [ip, host, container] if host_ip.is_empty() => (ip.to_string(), *host, *container),
        _ => return Err(invalid()),
    };

    let valid = |p: &str| p.chars().all(|c| c.is_ascii_digit() || c == '-');
    if container.is_empty() || !valid(container) || !valid(host_port) || protocol.is_empty() {
        return Err(invalid());
    }

    Ok((
        format!("{container}/{protocol}"),
        PortBinding {
            host_ip: Some(host_ip),
            host_port: Some(host_port.to_string()),
        },
    ))
}

/// Pick the container name.
///
/// With `unique` the name gets a `-<now>` suffix. Otherwise the base name is used when
/// free, else the first free `-<n>` starting at 2.
pub async fn container_name(
    engine: &dyn Engine,
    base: &str,
    unique: bool,
    now: i64,
) -> EngineResult<String> {
    if unique {
        return Ok(format!("{base}-{now}"));
    }

    let taken: Vec<String> = engine
        .list_containers(base)
        .await?
        .into_iter()
        .flat_map(|c| c.names)
        .collect();
    if !taken.iter().any(|n| n == base) {
        return Ok(base.to_string());
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}
