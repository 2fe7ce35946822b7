//! Error types for the vmvault core library.

use std::path::PathBuf;

/// The main error type for vmvault operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// An external command could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// An external command ran and exited unsuccessfully.
    #[error("'{program}' failed{}{}", code.map(|c| format!(" with exit code {c}")).unwrap_or_else(|| " (terminated by signal)".to_string()), if stderr.is_empty() { String::new() } else { format!(": {stderr}") })]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A check that must hold before anything is modified did not hold.
    #[error("{message}")]
    Precondition { message: String },

    /// A named VM, archive or file does not exist.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// A checksum did not match or a sidecar was unusable.
    #[error("integrity check failed: {message}")]
    Integrity { message: String },

    /// The domain XML or a tool's output could not be interpreted.
    #[error("metadata error: {message}")]
    Metadata { message: String },

    /// The interactive prompt failed or was aborted.
    #[error("prompt error: {message}")]
    Prompt { message: String },
}

/// A specialized Result type for vmvault operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Create an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a metadata error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Create a prompt error.
    pub fn prompt(message: impl Into<String>) -> Self {
        Self::Prompt {
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// A failed external command hands its own exit code through unchanged;
    /// everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CommandFailed {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(source: quick_xml::Error) -> Self {
        Self::metadata(source.to_string())
    }
}
