//! Typed application documents.
//!
//! A document maps application names to [`ApplicationSpec`]s. Loosely typed fields are
//! normalized here so the rest of the crate only sees canonical lists.

mod app;
mod error;
mod startup;
mod values;
mod volume;

use std::collections::BTreeMap;
use std::path::Path;

pub use app::{ApplicationSpec, image_basename};
pub use error::{ConfigError, ConfigResult};
pub use startup::{Discovered, DoNotShare, HostFlags, Startup, StartupSpec};
pub use values::{Scalar, StringOrList, parse_duration};
pub use volume::{BindOptions, MountKind, TmpfsOptions, VolumeDefinition, VolumeOptions, VolumeSpec};

/// Applications keyed by their name in the document.
pub type Applications = BTreeMap<String, ApplicationSpec>;

/// Parse a document. Applications without a `name` take their key.
pub fn parse_applications(text: &str) -> ConfigResult<Applications> {
    let mut apps: Applications = serde_yaml::from_str(text)?;
    for (key, app) in apps.iter_mut() {
        if app.name.as_deref().is_none_or(str::is_empty) {
            app.name = Some(key.clone());
        }
        app.validate()?;
    }
    Ok(apps)
}

pub fn load_applications(path: &Path) -> ConfigResult<Applications> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_applications(&text)
}
