use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid application document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Application {0} has no image")]
    MissingImage(String),

    #[error("Invalid volume specification: {0}")]
    InvalidVolume(String),

    #[error("Invalid device specification: {0}")]
    InvalidDevice(String),

    #[error("Invalid port specification: {0}")]
    InvalidPort(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}
