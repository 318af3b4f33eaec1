use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use super::values::StringOrList;

/// The `x-startup` block of an application: how it shares the host session.
///
/// Sharing toggles are tri-state. Unset means "share unless the host disabled it",
/// see [`HostFlags`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartupSpec {
    pub desktop_mode: bool,
    pub keep_user: bool,
    pub use_host_x11: bool,
    pub use_host_dbus: bool,
    pub daemon: bool,
    pub fix_home_args: bool,
    #[serde(alias = "yubikey_support")]
    pub yubikey: bool,

    pub share_x11: Option<bool>,
    pub share_dbus: Option<bool>,
    pub share_shm: Option<bool>,
    pub share_sound: Option<bool>,
    pub share_video: Option<bool>,
    #[serde(alias = "share_docker_socket")]
    pub share_docker: Option<bool>,
    #[serde(alias = "share_home_dir")]
    pub share_home: Option<bool>,
    pub share_tools: Option<bool>,

    /// `hostname=target` entries; a target of `host` means the bridge gateway
    pub hostnames: StringOrList,
    /// MIME type to command template, registered while the container runs
    pub xdg_open: BTreeMap<String, String>,
    pub password_file: Option<PathBuf>,
}

/// Host-side switches, read from the command line and the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFlags {
    pub desktop_mode: bool,
    pub keep_user: bool,
    pub use_host_x11: bool,
    pub use_host_dbus: bool,
    pub fix_home_args: bool,
    pub yubikey: bool,
    pub interactive: bool,
    pub tty: bool,
    pub do_not_share: DoNotShare,
    pub password_file: Option<PathBuf>,
    /// Comma separated `hostname=target` list
    pub hostnames: Option<String>,
}

/// `DO_NOT_SHARE_*` switches; each one flips the default of the matching toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoNotShare {
    pub x11: bool,
    pub dbus: bool,
    pub shm: bool,
    pub sound: bool,
    pub video: bool,
    pub docker: bool,
    pub home: bool,
    pub tools: bool,
}

/// Values learned while the lifecycle runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    /// `PATH` declared by the image
    pub env_path: Option<String>,
    /// `USER` declared by the image
    pub image_user: Option<String>,
    /// `HOME` declared by the image
    pub image_home: Option<String>,
    /// Whether the daemon applies seccomp profiles
    pub seccomp: bool,
}

/// A [`StartupSpec`] with every toggle decided, owned by one lifecycle run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Startup {
    pub desktop_mode: bool,
    pub keep_user: bool,
    pub use_host_x11: bool,
    pub use_host_dbus: bool,
    pub daemon: bool,
    pub fix_home_args: bool,
    pub yubikey: bool,
    pub interactive: bool,
    pub tty: bool,

    pub share_x11: bool,
    pub share_dbus: bool,
    pub share_shm: bool,
    pub share_sound: bool,
    pub share_video: bool,
    pub share_docker: bool,
    pub share_home: bool,
    pub share_tools: bool,

    pub hostnames: Vec<(String, String)>,
    pub xdg_open: BTreeMap<String, String>,
    pub password_file: Option<PathBuf>,
    pub discovered: Discovered,
}

impl StartupSpec {
    /// Decide every toggle against the host flags.
    pub fn resolve(&self, flags: &HostFlags) -> Startup {
        let dns = flags.do_not_share;
        let mut hostnames = parse_hostnames(self.hostnames.to_vec());
        if let Some(extra) = &flags.hostnames {
            hostnames.extend(parse_hostnames(
                extra.split(',').map(str::to_string).collect(),
            ));
        }

        Startup {
            desktop_mode: self.desktop_mode || flags.desktop_mode,
            keep_user: self.keep_user || flags.keep_user,
            use_host_x11: self.use_host_x11 || flags.use_host_x11,
            use_host_dbus: self.use_host_dbus || flags.use_host_dbus,
            daemon: self.daemon,
            fix_home_args: self.fix_home_args || flags.fix_home_args,
            yubikey: self.yubikey || flags.yubikey,
            interactive: flags.interactive,
            tty: flags.tty,

            share_x11: self.share_x11.unwrap_or(!dns.x11),
            share_dbus: self.share_dbus.unwrap_or(!dns.dbus),
            share_shm: self.share_shm.unwrap_or(!dns.shm),
            share_sound: self.share_sound.unwrap_or(!dns.sound),
            share_video: self.share_video.unwrap_or(!dns.video),
            share_docker: self.share_docker.unwrap_or(!dns.docker),
            share_home: self.share_home.unwrap_or(!dns.home),
            share_tools: self.share_tools.unwrap_or(!dns.tools),

            hostnames,
            xdg_open: self.xdg_open.clone(),
            password_file: flags
                .password_file
                .clone()
                .or_else(|| self.password_file.clone()),
            discovered: Discovered::default(),
        }
    }
}

fn parse_hostnames(entries: Vec<String>) -> Vec<(String, String)> {
    entries
        .into_iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, target)) if !name.is_empty() && !target.is_empty() => {
                Some((name.trim().to_string(), target.trim().to_string()))
            }
            _ => {
                warn!("Ignoring invalid hostname mapping: {}", entry);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_toggles_follow_host_defaults() {
        let spec = StartupSpec {
            share_docker: Some(true),
            ..Default::default()
        };
        let flags = HostFlags {
            do_not_share: DoNotShare {
                docker: true,
                sound: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let startup = spec.resolve(&flags);
        assert!(startup.share_docker, "explicit setting wins over host default");
        assert!(!startup.share_sound);
        assert!(startup.share_x11);
        assert!(startup.share_home);
    }

    #[test]
    fn test_mode_flags_are_combined() {
        let spec = StartupSpec {
            keep_user: true,
            ..Default::default()
        };
        let flags = HostFlags {
            use_host_x11: true,
            ..Default::default()
        };

        let startup = spec.resolve(&flags);
        assert!(startup.keep_user);
        assert!(startup.use_host_x11);
        assert!(!startup.desktop_mode);
    }

    #[test]
    fn test_hostnames_from_spec_and_host() {
        let spec: StartupSpec =
            serde_yaml::from_str("hostnames: [printer=10.0.0.5, 'api = host']").unwrap();
        let flags = HostFlags {
            hostnames: Some("db=host,broken,".to_string()),
            ..Default::default()
        };

        let startup = spec.resolve(&flags);
        assert_eq!(
            startup.hostnames,
            vec![
                ("printer".to_string(), "10.0.0.5".to_string()),
                ("api".to_string(), "host".to_string()),
                ("db".to_string(), "host".to_string()),
            ]
        );
    }
}
