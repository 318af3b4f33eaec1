use serde::Deserialize;

use super::error::{ConfigError, ConfigResult};
use super::values::Scalar;

/// A volume entry, either `source:target[:mode]` or the long form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VolumeSpec {
    Short(String),
    Long(VolumeDefinition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeDefinition {
    /// Left empty to decide from the resolved source
    #[serde(rename = "type")]
    pub kind: Option<MountKind>,
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
    pub bind: Option<BindOptions>,
    pub volume: Option<VolumeOptions>,
    pub tmpfs: Option<TmpfsOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BindOptions {
    pub propagation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeOptions {
    pub nocopy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TmpfsOptions {
    pub size: Option<Scalar>,
}

const PROPAGATIONS: &[&str] = &["shared", "rshared", "slave", "rslave", "private", "rprivate"];

impl VolumeSpec {
    /// Long form of this entry.
    pub fn definition(&self) -> ConfigResult<VolumeDefinition> {
        match self {
            VolumeSpec::Long(def) => {
                if def.target.is_empty() {
                    return Err(ConfigError::InvalidVolume(format!(
                        "missing target in {def:?}"
                    )));
                }
                Ok(def.clone())
            }
            VolumeSpec::Short(text) => parse_short(text),
        }
    }
}

fn parse_short(text: &str) -> ConfigResult<VolumeDefinition> {
    let parts: Vec<&str> = text.split(':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [target] => (None, *target, None),
        [source, target] => (Some(*source), *target, None),
        [source, target, mode] => (Some(*source), *target, Some(*mode)),
        _ => return Err(ConfigError::InvalidVolume(text.to_string())),
    };

    if target.is_empty() || source.is_some_and(str::is_empty) {
        return Err(ConfigError::InvalidVolume(text.to_string()));
    }

    let mut def = VolumeDefinition {
        source: source.map(str::to_string),
        target: target.to_string(),
        ..Default::default()
    };

    for option in mode.unwrap_or_default().split(',').filter(|o| !o.is_empty()) {
        match option {
            "ro" => def.read_only = true,
            "rw" => def.read_only = false,
            "nocopy" => def.volume = Some(VolumeOptions { nocopy: true }),
            // SELinux relabeling is left to the engine defaults
            "z" | "Z" => {}
            p if PROPAGATIONS.contains(&p) => {
                def.bind = Some(BindOptions {
                    propagation: Some(p.to_string()),
                })
            }
            _ => return Err(ConfigError::InvalidVolume(text.to_string())),
        }
    }

    Ok(def)
}
