//! Error types shared by every Blueprint component
//!
//! Variants carry the operation and target they failed on so that a single
//! log line at the command boundary is enough to diagnose a failure.

use thiserror::Error;

/// Main error type for Blueprint operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Local filesystem error
    #[error("io error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// A manifest could not be read from its URI
    #[error("failed to fetch manifest {uri}: {message}")]
    Fetch {
        /// Path or URL that was being read
        uri: String,
        /// Description of what failed
        message: String,
    },

    /// A manifest or document could not be decoded
    #[error("decode error: {message}")]
    Decode {
        /// Description of what failed
        message: String,
    },

    /// The target cluster does not serve the requested kind
    #[error("resource {kind} not found for {api_version} in API discovery")]
    Discovery {
        /// apiVersion of the object being resolved
        api_version: String,
        /// Kind of the object being resolved
        kind: String,
    },

    /// A bounded wait expired
    #[error("timed out waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: String,
    },

    /// The installed distribution is newer than the declared one
    #[error("downgrade version detected - cannot downgrade provider versions (installed {installed}, declared {declared})")]
    DowngradeRejected {
        /// Version found on the cluster
        installed: String,
        /// Version declared in the blueprint
        declared: String,
    },

    /// An existence check gave an answer that could not be classified
    #[error("provider check error [{provider}]: {message}")]
    ProviderCheck {
        /// Provider type (k0s, kind, existing)
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Distribution provider error
    #[error("provider error [{provider}]: {message}")]
    Provider {
        /// Provider type (k0s, kind, existing)
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed: {message}")]
    Command {
        /// Program (and subcommand) that was executed
        command: String,
        /// Captured stderr or spawn failure
        message: String,
    },

    /// Invalid blueprint or argument
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Function or phase where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a fetch error for the given URI
    pub fn fetch(uri: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            uri: uri.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Create a discovery error for an unresolvable kind
    pub fn discovery(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Discovery {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a downgrade rejection
    pub fn downgrade(installed: impl Into<String>, declared: impl Into<String>) -> Self {
        Self::DowngradeRejected {
            installed: installed.into(),
            declared: declared.into(),
        }
    }

    /// Create an existence-check error for a provider
    pub fn provider_check(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ProviderCheck {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a provider error
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a command failure
    pub fn command(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error is a bounded-wait expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
