use std::borrow::Cow;
use std::env;
use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::ENV_HOST_HOME;
use crate::error::{ControlError, ControlResult};

/// The user a container runs as, seen from inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    /// Home directory inside the container
    pub home: String,
    /// User name inside the container
    pub user: String,
}

/// Maps logical mount paths between the host and container namespaces.
///
/// On the host side `~` and `${HOME}` point to the shared host home, which is
/// `$DDEXEC_HOME` or `$HOME/.ddexec/home`. Inside the container they point to the
/// home of the container user.
#[derive(Debug, Clone)]
pub struct PathResolver {
    host_home: PathBuf,
}

impl PathResolver {
    pub fn new(host_home: impl Into<PathBuf>) -> Self {
        Self {
            host_home: host_home.into(),
        }
    }

    /// Build a resolver from `DDEXEC_HOME`, falling back to `$HOME/.ddexec/home`.
    pub fn from_env() -> Self {
        if let Some(home) = env::var_os(ENV_HOST_HOME).filter(|v| !v.is_empty()) {
            return Self::new(home);
        }

        let real_home = env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::new(real_home.join(".ddexec").join("home"))
    }

    pub fn host_home(&self) -> &Path {
        &self.host_home
    }

    /// Resolve a path as seen by the host (and therefore by the container engine).
    pub fn source(&self, path: &str) -> PathBuf {
        let host_home = self.host_home.to_string_lossy().into_owned();
        let expanded = expand(path, |key| match key {
            "HOME" => host_home.clone(),
            other => env::var(other).unwrap_or_default(),
        });
        clean(&expanded)
    }

    /// Resolve a path as seen from inside the container.
    pub fn target(&self, path: &str, identity: &TargetIdentity) -> String {
        expand(path, |key| match key {
            "HOME" => identity.home.clone(),
            "USER" => identity.user.clone(),
            other => env::var(other).unwrap_or_default(),
        })
    }

    /// Whether a resolved host path may be created on behalf of a container.
    pub fn is_shareable(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.host_home) || resolved.starts_with("/tmp")
    }

    /// Resolve `path` and make sure it exists as a directory.
    ///
    /// An existing directory is accepted wherever it is. Missing directories are only
    /// created below the shared host home or `/tmp`.
    pub async fn ensure_directory(&self, path: &str) -> ControlResult<PathBuf> {
        let resolved = self.source(path);

        match fs::metadata(&resolved).await {
            Ok(meta) if meta.is_dir() => {
                debug!("Directory already exists: {}", resolved.display());
                return Ok(resolved);
            }
            Ok(_) => {
                return Err(ControlError::NotADirectory(
                    resolved.display().to_string(),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if !self.is_shareable(&resolved) {
            return Err(ControlError::Forbidden(path.to_string()));
        }

        info!("Creating directory: {}", resolved.display());
        fs::create_dir_all(&resolved).await?;
        Ok(resolved)
    }
}

/// Expand a leading `~` plus `$VAR` / `${VAR}` references through `lookup`.
fn expand(path: &str, lookup: impl Fn(&str) -> String) -> String {
    let path: Cow<'_, str> = match path.strip_prefix('~') {
        Some(rest) => Cow::Owned(format!("${{HOME}}{rest}")),
        None => Cow::Borrowed(path),
    };

    shellexpand::env_with_context_no_errors(&path, |key| Some(lookup(key))).into_owned()
}

/// Lexically clean a path: drop `.` segments, fold `..`, collapse separators.
fn clean(path: &str) -> PathBuf {
    if path.is_empty() {
        return PathBuf::from(".");
    }

    let mut out: Vec<Component<'_>> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}
