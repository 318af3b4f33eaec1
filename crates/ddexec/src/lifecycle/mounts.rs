//! Mounts, devices and supplementary groups of a container.

use std::collections::HashSet;

use bollard::models::{
    DeviceMapping, Mount, MountBindOptions, MountBindOptionsPropagationEnum, MountTmpfsOptions,
    MountTypeEnum, MountVolumeOptions,
};
use ddexec_control::{ControlEndpoint, TargetIdentity};
use tracing::debug;

use super::error::LifecycleResult;
use super::resources::ram_in_bytes;
use super::Session;
use crate::model::{ApplicationSpec, ConfigError, MountKind, Startup};

pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";
pub const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";
pub const X11_VOLUME: &str = "Xsocket";
pub const DBUS_VOLUME: &str = "Xdbus";
pub const DBUS_USER_VOLUME: &str = "XdbusUser";
pub const TOOLS_TARGET: &str = "/usr/local/ddexec/bin";
const USB_BUS: &str = "/dev/bus/usb";
const DEFAULT_DEVICE_PERMISSIONS: &str = "rwm";

pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Mount {
    Mount {
        typ: Some(MountTypeEnum::BIND),
        source: Some(source.into()),
        target: Some(target.into()),
        read_only: Some(false),
        ..Default::default()
    }
}

pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Mount {
    Mount {
        typ: Some(MountTypeEnum::VOLUME),
        ..bind(name, target)
    }
}

fn propagation(value: &str) -> Result<MountBindOptionsPropagationEnum, ConfigError> {
    Ok(match value {
        "private" => MountBindOptionsPropagationEnum::PRIVATE,
        "rprivate" => MountBindOptionsPropagationEnum::RPRIVATE,
        "shared" => MountBindOptionsPropagationEnum::SHARED,
        "rshared" => MountBindOptionsPropagationEnum::RSHARED,
        "slave" => MountBindOptionsPropagationEnum::SLAVE,
        "rslave" => MountBindOptionsPropagationEnum::RSLAVE,
        other => {
            return Err(ConfigError::InvalidVolume(format!(
                "unknown bind propagation {other:?}"
            )));
        }
    })
}

/// Mounts in their fixed order: control directory, host session sockets, desktop extras,
/// shared home and tools, then the application's volumes.
pub async fn mounts(
    app: &ApplicationSpec,
    startup: &Startup,
    session: &Session,
    identity: &TargetIdentity,
) -> LifecycleResult<Vec<Mount>> {
    let endpoint = &session.endpoint;
    let resolver = &session.resolver;
    let share_dir = endpoint.share_dir().to_string_lossy().into_owned();
    let mut list = vec![bind(&share_dir, &share_dir)];

    if startup.share_docker {
        list.push(bind(DOCKER_SOCKET, DOCKER_SOCKET));
    }

    if startup.use_host_x11 {
        list.push(bind(X11_SOCKET_DIR, X11_SOCKET_DIR));
    } else if startup.share_x11 {
        list.push(volume(X11_VOLUME, X11_SOCKET_DIR));
    }

    if startup.share_dbus {
        let user_run = format!("/run/user/{}", session.host.uid);
        if startup.use_host_dbus {
            list.push(bind("/run/dbus", "/run/dbus"));
            list.push(bind(&user_run, &user_run));
        } else {
            list.push(volume(DBUS_VOLUME, "/run/dbus"));
            list.push(volume(DBUS_USER_VOLUME, &user_run));
        }
    }

    if startup.share_shm {
        list.push(bind("/dev/shm", "/dev/shm"));
    }

    if startup.desktop_mode {
        if endpoint.device_exists("/run/udev").await {
            list.push(bind("/run/udev", "/run/udev"));
        }
        let logs = session.paths.xorg_logs.to_string_lossy();
        let source = endpoint.ensure_source(resolver, &logs, false).await?;
        list.push(bind(source.to_string_lossy(), "/var/log"));
    }

    if startup.share_home {
        let source = endpoint.ensure_source(resolver, "$HOME", true).await?;
        list.push(bind(
            source.to_string_lossy(),
            resolver.target("$HOME", identity),
        ));
    }

    if startup.share_tools {
        let source = endpoint
            .ensure_source(resolver, "${HOME}/../bin", false)
            .await?;
        list.push(bind(source.to_string_lossy(), TOOLS_TARGET));
    }

    for volume in &app.volumes {
        let def = volume.definition()?;
        let kind = match def.kind {
            Some(kind) => kind,
            None => match &def.source {
                Some(source) if resolver.source(source).is_absolute() => MountKind::Bind,
                _ => MountKind::Volume,
            },
        };

        let source = match (kind, &def.source) {
            (MountKind::Bind, Some(source)) => Some(
                endpoint
                    .ensure_source(resolver, source, true)
                    .await?
                    .to_string_lossy()
                    .into_owned(),
            ),
            (MountKind::Bind, None) => {
                return Err(
                    ConfigError::InvalidVolume(format!("bind mount without source: {}", def.target))
                        .into(),
                );
            }
            (_, source) => source.clone(),
        };

        let tmpfs_options = match def.tmpfs.as_ref().and_then(|t| t.size.as_ref()) {
            Some(size) => Some(MountTmpfsOptions {
                size_bytes: Some(ram_in_bytes(size)?),
                ..Default::default()
            }),
            None => None,
        };
        let bind_options = match def.bind.and_then(|b| b.propagation) {
            Some(value) => Some(MountBindOptions {
                propagation: Some(propagation(&value)?),
                ..Default::default()
            }),
            None => None,
        };

        list.push(Mount {
            typ: Some(match kind {
                MountKind::Bind => MountTypeEnum::BIND,
                MountKind::Volume => MountTypeEnum::VOLUME,
                MountKind::Tmpfs => MountTypeEnum::TMPFS,
            }),
            source,
            target: Some(resolver.target(&def.target, identity)),
            read_only: Some(def.read_only),
            bind_options,
            volume_options: def.volume.filter(|v| v.nocopy).map(|_| MountVolumeOptions {
                no_copy: Some(true),
                ..Default::default()
            }),
            tmpfs_options,
            ..Default::default()
        });
    }

    if startup.yubikey && endpoint.device_exists(USB_BUS).await {
        list.push(bind(USB_BUS, USB_BUS));
    }

    for mount in &list {
        debug!("mount: {:?}", mount);
    }
    Ok(list)
}

/// Split `host[:container[:permissions]]`.
pub fn parse_device(spec: &str) -> Result<DeviceMapping, ConfigError> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (host, container, perms) = match parts.as_slice() {
        [host] => (*host, *host, DEFAULT_DEVICE_PERMISSIONS),
        [host, container] => (*host, *container, DEFAULT_DEVICE_PERMISSIONS),
        [host, container, perms] => (*host, *container, *perms),
        _ => return Err(ConfigError::InvalidDevice(spec.to_string())),
    };
    if host.is_empty() || container.is_empty() {
        return Err(ConfigError::InvalidDevice(spec.to_string()));
    }
    Ok(DeviceMapping {
        path_on_host: Some(host.to_string()),
        path_in_container: Some(container.to_string()),
        cgroup_permissions: Some(if perms.is_empty() {
            DEFAULT_DEVICE_PERMISSIONS.to_string()
        } else {
            perms.to_string()
        }),
    })
}

/// Devices present on the host: declared ones first, then sound and video devices.
pub async fn devices(
    app: &ApplicationSpec,
    startup: &Startup,
    endpoint: &ControlEndpoint,
) -> Vec<DeviceMapping> {
    let mut candidates = Vec::new();
    for spec in &app.devices {
        match parse_device(spec) {
            Ok(device) => candidates.push(device),
            Err(e) => tracing::warn!("{}", e),
        }
    }
    if startup.share_sound {
        candidates.push(same_path("/dev/snd"));
    }
    if startup.share_video {
        candidates.push(same_path("/dev/dri"));
        candidates.push(same_path("/dev/video0"));
    }

    let mut seen = HashSet::new();
    let mut devices = Vec::new();
    for device in candidates {
        let host_path = device.path_on_host.clone().unwrap_or_default();
        if seen.contains(&host_path) {
            continue;
        }
        if endpoint.device_exists(&host_path).await {
            seen.insert(host_path);
            devices.push(device);
        } else {
            debug!("Skipping missing device {}", host_path);
        }
    }
    devices
}

fn same_path(path: &str) -> DeviceMapping {
    DeviceMapping {
        path_on_host: Some(path.to_string()),
        path_in_container: Some(path.to_string()),
        cgroup_permissions: Some(DEFAULT_DEVICE_PERMISSIONS.to_string()),
    }
}

/// Declared groups plus `docker`, `audio` and `video` for the shared resources.
pub fn group_add(app: &ApplicationSpec, startup: &Startup) -> Vec<String> {
    let mut groups: Vec<String> = app.group_add.iter().map(ToString::to_string).collect();
    if startup.keep_user {
        return groups;
    }
    for (enabled, group) in [
        (startup.share_docker, "docker"),
        (startup.share_sound, "audio"),
        (startup.share_video, "video"),
    ] {
        if enabled && !groups.iter().any(|g| g == group) {
            groups.push(group.to_string());
        }
    }
    groups
}
