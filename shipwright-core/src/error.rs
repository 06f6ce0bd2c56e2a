//! Error types for Shipwright core.

use std::path::PathBuf;
use std::{error::Error, fmt, io};

/// Error type for Shipwright core operations.
#[derive(Debug)]
pub enum ShipwrightError {
    /// An underlying I/O error.
    Io(io::Error),
    /// A JSON payload could not be encoded or decoded.
    Json(serde_json::Error),
    /// A path that was expected to be a Dockerfile is not one.
    InvalidDockerfile(PathBuf),
    /// The project configuration is missing or malformed.
    Config(String),
    /// A target name does not match any image in the project.
    UnknownImage(String),
    /// An external command exited unsuccessfully.
    Command {
        /// Program and arguments that were run.
        command: String,
        /// Last diagnostic line reported by the command.
        message: String,
    },
    /// A catch-all error with a message.
    Other(String),
}

impl fmt::Display for ShipwrightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::InvalidDockerfile(path) => {
                write!(f, "'{}' is not a valid Dockerfile", path.display())
            }
            Self::Config(message) => write!(f, "{message}"),
            Self::UnknownImage(name) => write!(f, "unknown image: {name}"),
            Self::Command { command, message } => {
                if message.is_empty() {
                    write!(f, "`{command}` failed")
                } else {
                    write!(f, "`{command}` failed: {message}")
                }
            }
            Self::Other(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ShipwrightError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ShipwrightError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ShipwrightError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Convenience result type for Shipwright core.
pub type Result<T> = std::result::Result<T, ShipwrightError>;
