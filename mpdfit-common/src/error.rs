//! Common error types for mpdfit

use thiserror::Error;

/// Common result type for mpdfit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the mpdfit crates
///
/// Callers distinguish the three user-facing failures with
/// [`Error::is_unreachable`], [`Error::is_no_tracks`] and
/// [`Error::is_target_unreachable`].
#[derive(Error, Debug)]
pub enum Error {
    /// Could not reach the daemon, or the session dropped mid-command
    #[error("Connection error ({host}): {message}")]
    Connection { host: String, message: String },

    /// A round trip exceeded the per-call protocol timeout
    #[error("Timed out after {seconds}s talking to {host}")]
    Timeout { host: String, seconds: u64 },

    /// The daemon answered with an ACK line
    #[error("Daemon rejected `{command}`: {message}")]
    Ack { command: String, message: String },

    /// Response that does not follow the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A command batch was opened while another one was still pending
    #[error("Already in a command batch")]
    BatchAlreadyOpen,

    /// No tracks matched the given search predicates
    #[error("No tracks found: {0}")]
    NoTracks(String),

    /// Selection could not reach the requested duration
    #[error("Could not reach target duration: {0}")]
    TargetUnreachable(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a connection error for `host`
    pub fn connection(host: impl Into<String>, message: impl ToString) -> Self {
        Error::Connection {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// "Could not reach daemon": dropped session, refused connection, timeout
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Timeout { .. } | Error::Io(_))
    }

    /// "No tracks matched"
    pub fn is_no_tracks(&self) -> bool {
        matches!(self, Error::NoTracks(_))
    }

    /// "Could not hit target duration"
    pub fn is_target_unreachable(&self) -> bool {
        matches!(self, Error::TargetUnreachable(_))
    }

    /// Transient faults that a reconnect may cure
    pub fn is_transient(&self) -> bool {
        self.is_unreachable() || matches!(self, Error::Protocol(_))
    }
}
