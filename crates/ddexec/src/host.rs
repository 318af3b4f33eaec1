//! One captured view of the host session.
//!
//! Assembly code reads the host only through [`HostEnvironment`], so the same snapshot
//! always produces the same container configuration.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use tracing::debug;

const ZONEINFO: &str = "/usr/share/zoneinfo/";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    vars: BTreeMap<String, String>,
    pub uid: u32,
    pub gid: u32,
    pub user: String,
    /// The caller's real home directory
    pub home: PathBuf,
    pub timezone: Option<String>,
    /// `DBUS_SESSION_BUS_ADDRESS`, or the per-user bus when its socket exists
    pub dbus_address: Option<String>,
    /// `XDG_RUNTIME_DIR`, or `/run/user/<uid>` when it exists
    pub runtime_dir: Option<String>,
    pub stdin_tty: bool,
    pub stdout_tty: bool,
    /// Rows and columns of the controlling terminal
    pub terminal_size: Option<(u16, u16)>,
    pub executable: Option<PathBuf>,
}

impl HostEnvironment {
    pub fn capture() -> Self {
        let vars: BTreeMap<String, String> = env::vars().collect();
        let uid = rustix::process::getuid().as_raw();
        let gid = rustix::process::getgid().as_raw();

        let user = vars
            .get("USER")
            .filter(|u| !u.is_empty())
            .cloned()
            .or_else(|| passwd_user(uid))
            .unwrap_or_else(|| uid.to_string());
        let home = vars
            .get("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));

        let runtime = format!("/run/user/{uid}");
        let dbus_address = vars
            .get("DBUS_SESSION_BUS_ADDRESS")
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| {
                let bus = format!("{runtime}/bus");
                Path::new(&bus)
                    .exists()
                    .then(|| format!("unix:path={bus}"))
            });
        let runtime_dir = vars
            .get("XDG_RUNTIME_DIR")
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| Path::new(&runtime).is_dir().then_some(runtime));

        let timezone = detect_timezone(
            vars.get("TZ").map(String::as_str),
            fs::read_to_string("/etc/timezone").ok().as_deref(),
            fs::read_link("/etc/localtime").ok().as_deref(),
        );

        let stdout = std::io::stdout();
        let terminal_size = rustix::termios::tcgetwinsize(&stdout)
            .ok()
            .filter(|ws| ws.ws_row > 0 && ws.ws_col > 0)
            .map(|ws| (ws.ws_row, ws.ws_col));

        let snapshot = Self {
            uid,
            gid,
            user,
            home,
            timezone,
            dbus_address,
            runtime_dir,
            stdin_tty: std::io::stdin().is_terminal(),
            stdout_tty: stdout.is_terminal(),
            terminal_size,
            executable: env::current_exe().ok(),
            vars,
        };
        debug!(
            "host: user={} uid={} gid={} tz={:?} tty={}/{}",
            snapshot.user,
            snapshot.uid,
            snapshot.gid,
            snapshot.timezone,
            snapshot.stdin_tty,
            snapshot.stdout_tty
        );
        snapshot
    }

    /// A snapshot with only the given variables, for tests and embedding.
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> =
            vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            user: vars.get("USER").cloned().unwrap_or_default(),
            home: vars.get("HOME").map(PathBuf::from).unwrap_or_default(),
            timezone: vars.get("TZ").cloned(),
            vars,
            ..Default::default()
        }
    }

    /// Non-empty value of a host variable.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// A switch variable is on when set to any non-empty value, `0` and `false` included.
    pub fn flag(&self, key: &str) -> bool {
        self.var(key).is_some()
    }

    /// Whether both ends of the session are terminals.
    pub fn is_interactive_terminal(&self) -> bool {
        self.stdin_tty && self.stdout_tty
    }
}

/// [`HostEnvironment::flag`] against the live process environment.
pub fn env_flag(key: &str) -> bool {
    env::var_os(key).is_some_and(|v| !v.is_empty())
}

/// `TZ`, else `/etc/timezone`, else the zone name behind `/etc/localtime`.
pub fn detect_timezone(
    tz: Option<&str>,
    timezone_file: Option<&str>,
    localtime_link: Option<&Path>,
) -> Option<String> {
    if let Some(tz) = tz.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(tz.to_string());
    }
    if let Some(zone) = timezone_file.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(zone.to_string());
    }
    let link = localtime_link?.to_string_lossy().into_owned();
    let zone = match link.find(ZONEINFO) {
        Some(pos) => link[pos + ZONEINFO.len()..].to_string(),
        None => link,
    };
    (!zone.is_empty()).then_some(zone)
}

fn passwd_user(uid: u32) -> Option<String> {
    let passwd = fs::read_to_string("/etc/passwd").ok()?;
    passwd.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let entry_uid: u32 = fields.nth(1)?.parse().ok()?;
        (entry_uid == uid).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timezone_sources() {
        assert_eq!(
            detect_timezone(Some("Europe/Berlin"), Some("UTC\n"), None).as_deref(),
            Some("Europe/Berlin")
        );
        assert_eq!(
            detect_timezone(None, Some("America/Chicago\n"), None).as_deref(),
            Some("America/Chicago")
        );
        assert_eq!(
            detect_timezone(
                Some(""),
                None,
                Some(Path::new("/usr/share/zoneinfo/Asia/Tokyo"))
            )
            .as_deref(),
            Some("Asia/Tokyo")
        );
        assert_eq!(
            detect_timezone(
                None,
                None,
                Some(Path::new("../usr/share/zoneinfo/Etc/UTC"))
            )
            .as_deref(),
            Some("Etc/UTC")
        );
        assert_eq!(detect_timezone(None, None, None), None);
    }

    #[test]
    fn test_flags() {
        let host = HostEnvironment::with_vars([
            ("KEEP_USER", "1"),
            ("USE_HOST_X11", "false"),
            ("DDEXEC_TTY", ""),
            ("USER", "alice"),
        ]);
        assert!(host.flag("KEEP_USER"));
        assert!(host.flag("USE_HOST_X11"));
        assert!(!host.flag("DDEXEC_TTY"));
        assert!(!host.flag("MISSING"));
        assert_eq!(host.user, "alice");
        assert_eq!(host.var("DDEXEC_TTY"), None);
    }

    #[test]
    fn test_env_flag() {
        assert!(env_flag("PATH"));
        assert!(!env_flag("DDEXEC_TEST_UNSET_SWITCH"));
    }
}
