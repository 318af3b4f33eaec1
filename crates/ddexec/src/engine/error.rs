use bollard::errors::Error as BollardError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cannot reach the container engine at {socket}: {message}")]
    Connect { socket: String, message: String },

    #[error("Engine API error: {0}")]
    Docker(#[from] BollardError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{operation} failed: {message}")]
    Stream { operation: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The engine could not be reached at all, as opposed to refusing a request.
    pub fn is_unreachable(&self) -> bool {
        match self {
            EngineError::Connect { .. } => true,
            EngineError::Docker(e) => matches!(
                e,
                BollardError::SocketNotFoundError(_)
                    | BollardError::IOError { .. }
                    | BollardError::HyperLegacyError { .. }
                    | BollardError::RequestTimeoutError
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::NotFound(_) => true,
            EngineError::Docker(e) => status_code(e) == Some(404),
            _ => false,
        }
    }
}

/// HTTP status of an error response from the daemon.
pub(crate) fn status_code(error: &BollardError) -> Option<u16> {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}
