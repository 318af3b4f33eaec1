//! Host settings file (`~/.config/ddexec/config.toml`).
//!
//! Every key can also be set through `DDEXEC__<KEY>` environment variables. Paths are
//! expanded with the caller's environment.

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

pub const APP_NAME: &str = "ddexec";
const DEFAULT_XORG_LOGS: &str = "/var/tmp/ddexec-xorg-logs";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Unable to determine the configuration directory")]
    NoConfigDir,

    #[error("Invalid settings: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cannot expand {path}: {message}")]
    Expand { path: String, message: String },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Engine socket; `DOCKER_HOST` or `/var/run/docker.sock` when unset
    pub docker_socket: Option<PathBuf>,
    /// X authority file handed to containers; `XAUTH` or `/tmp/.docker.xauth` when unset
    pub xauth: Option<PathBuf>,
    /// Host directory mounted as `/var/log` in desktop mode
    pub xorg_logs: PathBuf,
    /// Shared host home; `DDEXEC_HOME` wins
    pub home: Option<PathBuf>,
    /// Directory for `xdg_open.*` registrations; `DDEXEC_MAPPING_DIR` wins
    pub mapping_dir: Option<PathBuf>,
    /// Password for the container user; `PASSWORD_FILE` wins
    pub password_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_socket: None,
            xauth: None,
            xorg_logs: PathBuf::from(DEFAULT_XORG_LOGS),
            home: None,
            mapping_dir: None,
            password_file: None,
        }
    }
}

impl Settings {
    /// Load from `path` (or the default location) plus `DDEXEC__*` overrides. A missing
    /// file is not an error.
    pub fn load(path: Option<&Path>) -> SettingsResult<Self> {
        let file = match path {
            Some(path) => {
                let expanded = expand(&path.to_string_lossy())?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        let built = Config::builder()
            .set_default("xorg_logs", DEFAULT_XORG_LOGS)?
            .add_source(
                File::from(file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix("DDEXEC").separator("__"))
            .build()?;

        let settings: Settings = built.try_deserialize()?;
        settings.expanded()
    }

    fn expanded(self) -> SettingsResult<Self> {
        let opt = |p: Option<PathBuf>| -> SettingsResult<Option<PathBuf>> {
            p.map(|p| expand(&p.to_string_lossy())).transpose()
        };
        Ok(Self {
            docker_socket: opt(self.docker_socket)?,
            xauth: opt(self.xauth)?,
            xorg_logs: expand(&self.xorg_logs.to_string_lossy())?,
            home: opt(self.home)?,
            mapping_dir: opt(self.mapping_dir)?,
            password_file: opt(self.password_file)?,
        })
    }
}

fn expand(text: &str) -> SettingsResult<PathBuf> {
    let expanded = shellexpand::full(text).map_err(|e| SettingsError::Expand {
        path: text.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.to_string()))
}

pub fn default_config_dir() -> SettingsResult<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or(SettingsError::NoConfigDir)
}
