//! Error types for qpipe sessions.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use qpipe_proto::{ProtocolError, RemoteError, RemoteErrorKind};

/// Alias for `Result<T, qpipe::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session operations.
///
/// Variants fall into four classes. Setup and transport failures
/// ([`Error::is_fatal`]) tear the session down; remote and local failures
/// only fail the one operation and leave the session connected.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No launcher was configured and none was found.
    #[error("launcher `{0}` not found in PATH or next to the executable")]
    LauncherNotFound(String),

    /// The launcher process could not be spawned.
    #[error("failed to spawn `{program}`")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying spawn error.
        source: io::Error,
    },

    /// The remote end never became ready.
    #[error("the remote end of the connection to {target} was not ready: {detail}")]
    Setup {
        /// Target address.
        target: String,
        /// What went wrong during the handshake.
        detail: String,
    },

    /// The remote path does not exist.
    #[error("remote file not found: {}", display_path(path.as_ref()))]
    FileNotFound {
        /// Remote path reported by the failing call.
        path: Option<PathBuf>,
        /// Full remote error.
        source: RemoteError,
    },

    /// The remote process lacked permission.
    #[error("remote permission denied: {}", display_path(path.as_ref()))]
    PermissionDenied {
        /// Remote path reported by the failing call.
        path: Option<PathBuf>,
        /// Full remote error.
        source: RemoteError,
    },

    /// Any other remote OS failure.
    #[error("remote I/O error: {message}")]
    RemoteIo {
        /// Remote `errno`, when reported.
        errno: Option<i32>,
        /// Human-readable description.
        message: String,
        /// Full remote error.
        source: RemoteError,
    },

    /// The remote end broke the framing rules.
    #[error("protocol violation")]
    Protocol(#[source] ProtocolError),

    /// Reading from or writing to the remote pipes failed.
    #[error("transport to the remote end failed")]
    Transport(#[source] io::Error),

    /// The remote end did not answer within the read timeout.
    #[error("the remote end did not answer in time")]
    TimedOut,

    /// A local file could not be opened, read or written.
    #[error("local file {}", path.display())]
    Local {
        /// Local path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The operation needs a connected session.
    #[error("session is not connected")]
    NotConnected,

    /// The session was closed and cannot be reused.
    #[error("session is closed")]
    Closed,

    /// `exec` was called with an empty argument vector.
    #[error("cannot execute an empty command")]
    EmptyCommand,

    /// A command line could not be split into words.
    #[error("unbalanced quoting in command line {0:?}")]
    BadCommandLine(String),

    /// The encoded request exceeds what the remote end accepts.
    #[error("request of {len} bytes exceeds the {max} byte limit")]
    RequestTooLarge {
        /// Encoded request length, newline included.
        len: usize,
        /// Limit in force.
        max: usize,
    },

    /// Configuration is invalid or unreadable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns `true` if this error tore the session down.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. }
                | Self::Setup { .. }
                | Self::Protocol(_)
                | Self::Transport(_)
                | Self::TimedOut
        )
    }

    /// Returns the remote error, if this failure happened on the remote side.
    pub const fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::FileNotFound { source, .. }
            | Self::PermissionDenied { source, .. }
            | Self::RemoteIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        let path = err
            .filename
            .as_deref()
            .map(|name| PathBuf::from(OsStr::from_bytes(name)));
        match err.kind {
            RemoteErrorKind::NotFound => Self::FileNotFound { path, source: err },
            RemoteErrorKind::PermissionDenied => Self::PermissionDenied { path, source: err },
            _ => Self::RemoteIo {
                errno: err.errno,
                message: err.to_string(),
                source: err,
            },
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        if err.is_timeout() {
            return Self::TimedOut;
        }
        match err {
            ProtocolError::Io(e) => Self::Transport(e),
            other => Self::Protocol(other),
        }
    }
}

/// Renders an optional path for error messages.
fn display_path(path: Option<&PathBuf>) -> String {
    path.map_or_else(|| "<unknown path>".to_owned(), |p| p.display().to_string())
}
