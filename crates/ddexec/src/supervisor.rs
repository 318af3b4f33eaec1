//! Dependency-ordered start and reverse-ordered stop of a set of applications.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use ddexec_control::error::ControlResult;
use ddexec_control::{AppState, ControlServer, PathResolver, RunningServer};

use crate::engine::Engine;
use crate::lifecycle::{Launch, Lifecycle, LifecycleError, RunningApp};
use crate::model::{ApplicationSpec, Applications};
use crate::runner::EngineCommandRunner;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("dependency cycle or missing dependency among: {}", .0.join(", "))]
    Dependency(Vec<String>),

    #[error("{name}: {source}")]
    Lifecycle {
        name: String,
        #[source]
        source: LifecycleError,
    },
}

impl SupervisorError {
    /// An ordering failure, raised before any container exists.
    pub fn is_dependency(&self) -> bool {
        matches!(self, SupervisorError::Dependency(_))
    }
}

/// Order applications so that each one follows all of its dependencies.
///
/// Each pass adds every application whose dependencies are already placed. A pass that
/// adds nothing while applications remain means a cycle or a dependency that is not
/// declared.
pub fn order(apps: &BTreeMap<String, ApplicationSpec>) -> SupervisorResult<Vec<String>> {
    let mut ordered: Vec<String> = Vec::with_capacity(apps.len());
    while ordered.len() < apps.len() {
        let ready: Vec<String> = apps
            .iter()
            .filter(|(name, _)| !ordered.contains(name))
            .filter(|(_, app)| app.depends_on.iter().all(|dep| ordered.contains(dep)))
            .map(|(name, _)| name.clone())
            .collect();

        if ready.is_empty() {
            let remaining = apps
                .keys()
                .filter(|name| !ordered.contains(name))
                .cloned()
                .collect();
            return Err(SupervisorError::Dependency(remaining));
        }
        ordered.extend(ready);
    }
    Ok(ordered)
}

/// Start the control plane for a session rooted in this process.
pub async fn host_control_plane(
    engine: Arc<dyn Engine>,
    resolver: PathResolver,
) -> ControlResult<RunningServer> {
    let runner = Arc::new(EngineCommandRunner::new(engine));
    ControlServer::new(AppState::new(resolver, runner)).start().await
}

/// Runs every application through its lifecycle and owns the stop handles.
pub struct Supervisor {
    lifecycle: Arc<Lifecycle>,
    running: Vec<RunningApp>,
}

impl Supervisor {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            lifecycle,
            running: Vec::new(),
        }
    }

    /// Start the applications in dependency order and return the exit code of the last
    /// one. Foreground applications are waited on before the next one starts; a daemon
    /// or an image-only run contributes 0.
    ///
    /// When nothing ran in the foreground the daemons are waited on instead, so a session
    /// of daemons lives until they exit.
    pub async fn run(&mut self, mut apps: Applications) -> SupervisorResult<i64> {
        let names = order(&apps)?;
        debug!("Start order: {}", names.join(", "));

        let mut last_code = 0;
        let mut foreground = false;
        for name in names {
            let Some(app) = apps.remove(&name) else {
                continue;
            };
            let launch = self
                .lifecycle
                .run(app)
                .await
                .map_err(|source| SupervisorError::Lifecycle {
                    name: name.clone(),
                    source,
                })?;

            last_code = match launch {
                Launch::ImageOnly => 0,
                Launch::Started(running) if running.is_daemon() => {
                    info!("{} runs in the background", running.name());
                    self.running.push(running);
                    0
                }
                Launch::Started(mut running) => {
                    foreground = true;
                    let result = running.wait().await;
                    self.running.push(running);
                    result.map_err(|source| SupervisorError::Lifecycle {
                        name: name.clone(),
                        source,
                    })?
                }
            };
        }

        if !foreground {
            for running in self.running.iter_mut() {
                if let Err(e) = running.wait().await {
                    warn!("{}: {}", running.name(), e);
                }
            }
        }
        Ok(last_code)
    }

    /// Stop every started application, newest first.
    pub async fn shutdown(&mut self) {
        while let Some(running) = self.running.pop() {
            debug!("Stopping {}", running.name());
            running.stop().await;
        }
    }

    pub fn running(&self) -> impl Iterator<Item = &RunningApp> {
        self.running.iter()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.running.is_empty() {
            warn!(
                "{} application(s) were not stopped before exit",
                self.running.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(deps: &[&str]) -> ApplicationSpec {
        ApplicationSpec {
            image: "img".into(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_order_places_dependencies_first() {
        let apps = BTreeMap::from([
            ("a".to_string(), app(&["b"])),
            ("b".to_string(), app(&[])),
        ]);
        assert_eq!(order(&apps).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_order_chain_and_independent() {
        let apps = BTreeMap::from([
            ("web".to_string(), app(&["db", "cache"])),
            ("db".to_string(), app(&[])),
            ("cache".to_string(), app(&["db"])),
            ("tool".to_string(), app(&[])),
        ]);
        assert_eq!(order(&apps).unwrap(), vec!["db", "tool", "cache", "web"]);
    }

    #[test]
    fn test_order_cycle_fails() {
        let apps = BTreeMap::from([
            ("a".to_string(), app(&["b"])),
            ("b".to_string(), app(&["a"])),
            ("c".to_string(), app(&[])),
        ]);
        let err = order(&apps).unwrap_err();
        assert!(err.is_dependency());
        assert_eq!(
            err.to_string(),
            "dependency cycle or missing dependency among: a, b"
        );
    }

    #[test]
    fn test_order_missing_dependency_fails() {
        let apps = BTreeMap::from([("a".to_string(), app(&["ghost"]))]);
        assert!(matches!(order(&apps), Err(SupervisorError::Dependency(names)) if names == vec!["a"]));
    }
}
