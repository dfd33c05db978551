//! Top-level error taxonomy shared by the session daemon and the CLI.

use thiserror::Error;

use crate::container::ContainerError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required host resource is missing. Session start aborts before
    /// touching the container.
    #[error("precondition failed: {resource}")]
    Precondition { resource: String },

    /// Another daemon already owns the session. Callers treat this as
    /// success.
    #[error("session is already running")]
    AlreadyRunning,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("subsystem {name} failed to start")]
    SubsystemStart { name: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_names_resource() {
        let err = Error::Precondition {
            resource: "/run/user/1000/wayland-0".to_string(),
        };
        assert!(err.to_string().contains("wayland-0"));
    }

    #[test]
    fn test_container_error_converts() {
        let err: Error = ContainerError::Unresponsive(10).into();
        assert!(matches!(err, Error::Container(_)));
    }
}
