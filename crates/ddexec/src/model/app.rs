use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::error::{ConfigError, ConfigResult};
use super::startup::StartupSpec;
use super::values::{Scalar, StringOrList};
use super::volume::VolumeSpec;

static IMAGE_BASENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:.*/)?([^:@]+)").expect("valid image regex"));

/// One declared application.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplicationSpec {
    pub name: Option<String>,
    pub image: String,
    /// Inline Dockerfile; the image is built from it when missing or outdated
    pub dockerfile: Option<String>,
    pub command: StringOrList,
    pub entrypoint: StringOrList,
    pub environment: StringOrList,
    pub labels: StringOrList,
    pub volumes: Vec<VolumeSpec>,
    pub tmpfs: StringOrList,
    pub ports: Vec<Scalar>,
    pub depends_on: Vec<String>,

    pub stop_signal: Option<String>,
    pub stop_timeout: Option<Scalar>,
    pub working_dir: Option<String>,
    pub hostname: Option<String>,

    pub privileged: bool,
    pub read_only: bool,
    pub init: Option<bool>,
    pub group_add: Vec<Scalar>,
    pub stdin_open: bool,
    pub tty: bool,
    pub devices: Vec<String>,
    pub security_opt: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub ipc: Option<String>,
    pub pid: Option<String>,
    pub network_mode: Option<String>,

    pub mem_limit: Option<Scalar>,
    pub mem_reservation: Option<Scalar>,
    pub memswap_limit: Option<Scalar>,
    pub mem_swappiness: Option<i64>,
    pub shm_size: Option<Scalar>,
    pub cpus: Option<Scalar>,
    pub cpu_shares: Option<i64>,
    pub cpu_period: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub cpuset: Option<String>,
    pub pids_limit: Option<i64>,
    pub oom_score_adj: Option<i64>,
    pub oom_kill_disable: Option<bool>,

    #[serde(rename = "x-startup")]
    pub startup: Option<StartupSpec>,
}

impl ApplicationSpec {
    /// The declared name, or one derived from the image (`repo/name:tag` → `name`).
    pub fn name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        image_basename(&self.image)
    }

    /// Take the startup block; later calls see an empty default.
    pub fn take_startup(&mut self) -> StartupSpec {
        self.startup.take().unwrap_or_default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.image.trim().is_empty() {
            return Err(ConfigError::MissingImage(self.name()));
        }
        for volume in &self.volumes {
            volume.definition()?;
        }
        Ok(())
    }
}

/// `docker.io/library/firefox:latest` → `firefox`
pub fn image_basename(image: &str) -> String {
    IMAGE_BASENAME
        .captures(image)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| image.to_string())
}
