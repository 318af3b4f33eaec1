//! Container environment assembly.
//!
//! The list is built in a fixed order and the application's own environment comes last,
//! so a declared variable always overrides a generated one. Duplicates are kept; the
//! engine applies the last occurrence.

use ddexec_control::{ENV_HOST_HOME, ENV_SERVER_SOCK, TargetIdentity};

use super::Session;
use crate::model::{ApplicationSpec, Startup};

pub const ENV_MARKER: &str = "DDEXEC_ENV";
pub const ENV_MAPPING_DIR: &str = "DDEXEC_MAPPING_DIR";
pub const ENV_HOSTNAMES: &str = "DDEXEC_HOSTNAMES";
pub const ENV_UNIQUE_NAMES: &str = "DDEXEC_UNIQUE_NAMES";

const XDG_BIN: &str = "/usr/local/ddexec-xdg/bin";
const TOOLS_BIN: &str = "/usr/local/ddexec/bin";
const DESKTOP_XAUTHORITY: &str = "/tmp/.server.xauth";

/// Environment of the container, as `KEY=VALUE` entries.
pub fn assemble(
    app: &ApplicationSpec,
    startup: &Startup,
    session: &Session,
    identity: &TargetIdentity,
) -> Vec<String> {
    let host = &session.host;
    let mut env = Vec::new();

    env.push(format!("{ENV_MARKER}=1"));
    env.push(format!(
        "{ENV_HOST_HOME}={}",
        session.resolver.host_home().display()
    ));
    if let Some(socket) = session.endpoint.socket() {
        env.push(format!("{ENV_SERVER_SOCK}={}", socket.display()));
    }
    env.push(format!(
        "{ENV_MAPPING_DIR}={}",
        session.paths.mapping_dir.display()
    ));
    for key in [ENV_HOSTNAMES, ENV_UNIQUE_NAMES] {
        if let Some(value) = host.var(key) {
            env.push(format!("{key}={value}"));
        }
    }

    if startup.desktop_mode {
        env.push(format!("XAUTHORITY={DESKTOP_XAUTHORITY}"));
    } else {
        env.push(format!("DISPLAY={}", host.var("DISPLAY").unwrap_or_default()));
        env.push(format!("XAUTHORITY={}", session.paths.xauth.display()));
    }

    if let Some(tz) = &host.timezone {
        env.push(format!("TZ={tz}"));
    }

    env.push(match &startup.discovered.env_path {
        Some(path) if !path.is_empty() => format!("PATH={XDG_BIN}:{path}:{TOOLS_BIN}"),
        _ => format!("PATH={XDG_BIN}:{TOOLS_BIN}"),
    });

    if (app.stdin_open || app.tty) && host.stdout_tty {
        if let Some((rows, cols)) = host.terminal_size {
            env.push(format!("LINES={rows}"));
            env.push(format!("COLUMNS={cols}"));
        }
    }

    if !startup.keep_user {
        env.push(format!("HOME={}", identity.home));
        env.push(format!("USER={}", identity.user));
    }

    if startup.share_dbus {
        if let Some(address) = &host.dbus_address {
            env.push(format!("DBUS_SESSION_BUS_ADDRESS={address}"));
        }
        if let Some(dir) = &host.runtime_dir {
            env.push(format!("XDG_RUNTIME_DIR={dir}"));
        }
    }

    env.extend(app.environment.to_vec());
    env
}
