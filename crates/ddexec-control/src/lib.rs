//! Control-plane service for ddexec.
//!
//! Every container started by ddexec gets the directory holding this service's socket
//! bind-mounted. Through it, processes inside containers can ask the host to create bind
//! mount sources, check for optional devices, and run commands in sibling containers.
//!
//! The crate also carries the [`PathResolver`], which maps `~`, `${HOME}` and `${USER}`
//! between the host and container namespaces.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod handlers;
pub mod paths;
pub mod routes;
pub mod runner;
pub mod server;
pub mod types;

use std::sync::Arc;

pub use client::ControlClient;
pub use endpoint::ControlEndpoint;
pub use error::{ClientError, ControlError};
pub use paths::{PathResolver, TargetIdentity};
pub use runner::CommandRunner;
pub use server::{ControlServer, RunningServer};

/// Socket location handed to containers.
pub const ENV_SERVER_SOCK: &str = "DDEXEC_SERVER_SOCK";
/// Shared directory used when no socket is inherited.
pub const ENV_CONTROL_DIR: &str = "DDEXEC_CONTROL_DIR";
/// Host directory shared as the container users' home.
pub const ENV_HOST_HOME: &str = "DDEXEC_HOME";
/// File name of the listening socket inside the control directory.
pub const SOCKET_NAME: &str = "ddexec.sock";

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Resolves request paths against the shared host home
    pub resolver: Arc<PathResolver>,
    /// Executes commands in sibling containers
    pub runner: Arc<dyn CommandRunner>,
}

impl AppState {
    pub fn new(resolver: PathResolver, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            resolver: Arc::new(resolver),
            runner,
        }
    }
}
