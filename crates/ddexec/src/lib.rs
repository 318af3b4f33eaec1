//! Run desktop applications in containers that share the host session.
//!
//! A YAML document declares the applications. The [`supervisor`] starts them in
//! dependency order, each through the container [`lifecycle`], and hosts the control
//! plane that containers use to reach the host. The [`dispatch`] module is the
//! `xdg-open` side: it routes URLs and files to the container that registered a handler.

pub mod dispatch;
pub mod engine;
pub mod host;
pub mod lifecycle;
pub mod model;
pub mod registry;
pub mod runner;
pub mod settings;
pub mod supervisor;

pub use dispatch::Dispatcher;
pub use engine::{DockerEngine, Engine, EngineError};
pub use host::HostEnvironment;
pub use lifecycle::{Launch, LaunchOptions, Lifecycle, RunningApp, Session, SessionPaths};
pub use model::{Applications, HostFlags, load_applications, parse_applications};
pub use registry::MappingRegistry;
pub use settings::Settings;
pub use supervisor::{Supervisor, SupervisorError, order};
