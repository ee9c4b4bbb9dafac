use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("No reply from instrument within {0:?}")]
    Timeout(std::time::Duration),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Malformed data block: {0}")]
    MalformedBlock(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },
    #[error("Could not start {program}: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {output}")]
    ProcessExit {
        program: String,
        status: String,
        output: String,
    },
    #[error("IO error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure categories reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connect,
    Timeout,
    Protocol,
    MalformedBlock,
    Decode,
    InvalidOperation,
    ExternalProcess,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Connect => "ConnectError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::MalformedBlock => "MalformedBlockError",
            ErrorKind::Decode => "DecodeError",
            ErrorKind::InvalidOperation => "InvalidOperationError",
            ErrorKind::ExternalProcess => "ExternalProcessError",
            ErrorKind::Io => "IoError",
        };
        f.write_str(name)
    }
}

impl ScopeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScopeError::Configuration(_) | ScopeError::Config(_) => ErrorKind::Configuration,
            ScopeError::Connect { .. } => ErrorKind::Connect,
            ScopeError::Timeout(_) => ErrorKind::Timeout,
            ScopeError::Protocol(_) => ErrorKind::Protocol,
            ScopeError::MalformedBlock(_) => ErrorKind::MalformedBlock,
            ScopeError::Decode(_) | ScopeError::Json(_) => ErrorKind::Decode,
            ScopeError::InvalidOperation(_) | ScopeError::InvalidParameter { .. } => {
                ErrorKind::InvalidOperation
            }
            ScopeError::ProcessSpawn { .. } | ScopeError::ProcessExit { .. } => {
                ErrorKind::ExternalProcess
            }
            ScopeError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Caller-side contract violations halt the request instead of degrading
    /// into an error payload.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            ScopeError::InvalidOperation(_) | ScopeError::InvalidParameter { .. }
        )
    }

    /// Error text prefixed with its category, e.g. `TimeoutError: ...`.
    pub fn report(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Display-safe form of [`ScopeError::report`].
    pub fn user_message(&self) -> String {
        sanitize_message(&self.report())
    }
}

/// Escape backslashes and single quotes and strip trailing line breaks so
/// the text can sit inside a single-quoted display string.
pub fn sanitize_message(text: &str) -> String {
    text.trim_end_matches(['\r', '\n'])
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
}
