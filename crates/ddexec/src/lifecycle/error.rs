use thiserror::Error;

use ddexec_control::ControlError;

use super::resources::ResourceError;
use crate::engine::EngineError;
use crate::model::ConfigError;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("Cannot prepare mount source: {0}")]
    MountSource(#[from] ControlError),

    #[error("Image {0} not found after pull or build")]
    ImageMissing(String),

    #[error("Image {image}: the new image hash does not match the Dockerfile contents")]
    ImageHashMismatch { image: String },

    #[error("Invalid command {command:?}: unbalanced quotes")]
    InvalidCommand { command: String },

    #[error("Invalid security option {0:?}")]
    SecurityOpt(String),

    #[error("Bootstrap of {path} failed: {message}")]
    Bootstrap { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    pub(crate) fn bootstrap(path: &str, message: impl ToString) -> Self {
        LifecycleError::Bootstrap {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}
