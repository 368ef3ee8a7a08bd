//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Blueprint, provider or cluster failure from the library crates
    #[error(transparent)]
    Blueprint(#[from] blueprint_common::Error),

    /// Reading the Blueprint, the terminal or a temp file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid flags or input
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A command could not complete
    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}
