//! Marshalled remote exceptions.
//!
//! Block layout: `<taglen>\n<tag>` then, for `errno`, `filename`, `message`
//! and `strerror` in that order, `<len>\n<value>`. The value text `None`
//! marks an absent field.

use std::fmt;
use std::io::{self, BufRead, Write};

use crate::ProtocolError;
use crate::codec::{self, MAX_CHUNK};

/// Value text that stands for an absent field.
const ABSENT: &[u8] = b"None";

/// Kind of OS failure reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RemoteErrorKind {
    /// The path does not exist.
    NotFound,
    /// The remote process lacks permission.
    PermissionDenied,
    /// The path already exists.
    AlreadyExists,
    /// A directory was given where a file was expected.
    IsADirectory,
    /// A path component is not a directory.
    NotADirectory,
    /// Any other OS-level failure.
    Io,
}

impl RemoteErrorKind {
    /// Every kind, in wire-tag order.
    pub const ALL: [Self; 6] = [
        Self::NotFound,
        Self::PermissionDenied,
        Self::AlreadyExists,
        Self::IsADirectory,
        Self::NotADirectory,
        Self::Io,
    ];

    /// Versioned wire tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::NotFound => "v1/not-found",
            Self::PermissionDenied => "v1/permission-denied",
            Self::AlreadyExists => "v1/already-exists",
            Self::IsADirectory => "v1/is-a-directory",
            Self::NotADirectory => "v1/not-a-directory",
            Self::Io => "v1/io",
        }
    }

    /// Looks a wire tag up.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag().as_bytes() == tag)
    }

    /// Classifies a local I/O error.
    pub fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            io::ErrorKind::IsADirectory => Self::IsADirectory,
            io::ErrorKind::NotADirectory => Self::NotADirectory,
            _ => Self::Io,
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "file not found",
            Self::PermissionDenied => "permission denied",
            Self::AlreadyExists => "file exists",
            Self::IsADirectory => "is a directory",
            Self::NotADirectory => "not a directory",
            Self::Io => "I/O error",
        })
    }
}

/// An OS failure that happened on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RemoteError {
    /// Failure class.
    pub kind: RemoteErrorKind,
    /// OS error number, when known.
    pub errno: Option<i32>,
    /// Path the failing call operated on.
    pub filename: Option<Vec<u8>>,
    /// Full error message.
    pub message: Option<String>,
    /// Description of `errno`.
    pub strerror: Option<String>,
}

impl RemoteError {
    /// Creates an error with every optional field absent.
    pub const fn new(kind: RemoteErrorKind) -> Self {
        Self {
            kind,
            errno: None,
            filename: None,
            message: None,
            strerror: None,
        }
    }

    /// Builds an error from a local `io::Error` raised while working on `filename`.
    pub fn from_io(err: &io::Error, filename: Option<&[u8]>) -> Self {
        Self {
            kind: RemoteErrorKind::from_io(err.kind()),
            errno: err.raw_os_error(),
            filename: filename.map(<[u8]>::to_vec),
            message: Some(err.to_string()),
            strerror: None,
        }
    }

    /// Sets `errno`.
    #[must_use]
    pub const fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    /// Sets `filename`.
    #[must_use]
    pub fn with_filename(mut self, filename: Vec<u8>) -> Self {
        self.filename = Some(filename);
        self
    }

    /// Sets `message`.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets `strerror`.
    #[must_use]
    pub fn with_strerror(mut self, strerror: impl Into<String>) -> Self {
        self.strerror = Some(strerror.into());
        self
    }

    /// Writes the exception block.
    pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
        codec::write_sized(w, self.kind.tag().as_bytes())?;
        let errno = self.errno.map(|n| n.to_string());
        write_field(w, errno.as_deref().map(str::as_bytes))?;
        write_field(w, self.filename.as_deref())?;
        write_field(w, self.message.as_deref().map(str::as_bytes))?;
        write_field(w, self.strerror.as_deref().map(str::as_bytes))
    }

    /// Reads an exception block.
    ///
    /// An unknown tag or a non-integer `errno` is a protocol violation.
    pub fn decode(r: &mut impl BufRead) -> Result<Self, ProtocolError> {
        let tag = codec::read_sized(r, MAX_CHUNK)?;
        let kind = RemoteErrorKind::from_tag(&tag)
            .ok_or_else(|| ProtocolError::UnknownErrorKind(codec::lossy(&tag)))?;

        let errno = read_field(r)?
            .map(|raw| {
                std::str::from_utf8(&raw)
                    .ok()
                    .and_then(|s| s.parse::<i32>().ok())
                    .ok_or_else(|| ProtocolError::BadExceptionField {
                        field: "errno",
                        value: codec::lossy(&raw),
                    })
            })
            .transpose()?;
        let filename = read_field(r)?;
        let message = read_field(r)?.map(|v| codec::lossy(&v));
        let strerror = read_field(r)?.map(|v| codec::lossy(&v));

        Ok(Self {
            kind,
            errno,
            filename,
            message,
            strerror,
        })
    }

    /// The filename as text, for display.
    pub fn filename_lossy(&self) -> Option<String> {
        self.filename.as_deref().map(codec::lossy)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(errno) = self.errno {
            write!(f, "[Errno {errno}] ")?;
        }
        match (&self.strerror, &self.message) {
            (Some(s), _) | (None, Some(s)) => f.write_str(s)?,
            (None, None) => write!(f, "{}", self.kind)?,
        }
        if let Some(name) = self.filename_lossy() {
            write!(f, ": {name:?}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// Writes one optional field.
fn write_field(w: &mut impl Write, value: Option<&[u8]>) -> io::Result<()> {
    codec::write_sized(w, value.unwrap_or(ABSENT))
}

/// Reads one optional field.
fn read_field(r: &mut impl BufRead) -> Result<Option<Vec<u8>>, ProtocolError> {
    let raw = codec::read_sized(r, MAX_CHUNK)?;
    Ok((raw != ABSENT).then_some(raw))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn roundtrip(err: &RemoteError) -> RemoteError {
        let mut buf = Vec::new();
        err.encode(&mut buf).unwrap();
        RemoteError::decode(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn every_kind_with_every_field_absent_or_present() {
        for kind in RemoteErrorKind::ALL {
            let bare = RemoteError::new(kind);
            assert_eq!(roundtrip(&bare), bare);

            let full = RemoteError::new(kind)
                .with_errno(-13)
                .with_filename(b"/root/\xff".to_vec())
                .with_message("denied")
                .with_strerror("Permission denied");
            assert_eq!(roundtrip(&full), full);
        }
    }

    #[test]
    fn wire_layout_matches_reference() {
        let err = RemoteError::new(RemoteErrorKind::NotFound)
            .with_errno(2)
            .with_filename(b"/doesnotexist".to_vec());
        let mut buf = Vec::new();
        err.encode(&mut buf).unwrap();
        assert_eq!(
            buf,
            b"12\nv1/not-found1\n213\n/doesnotexist4\nNone4\nNone".to_vec()
        );
    }

    #[test]
    fn unknown_tag_is_a_protocol_violation() {
        let wire = b"7\nIOError4\nNone4\nNone4\nNone4\nNone";
        assert!(matches!(
            RemoteError::decode(&mut Cursor::new(&wire[..])),
            Err(ProtocolError::UnknownErrorKind(tag)) if tag == "IOError"
        ));
    }

    #[test]
    fn non_numeric_errno_is_rejected() {
        let wire = b"5\nv1/io3\nabc4\nNone4\nNone4\nNone";
        assert!(matches!(
            RemoteError::decode(&mut Cursor::new(&wire[..])),
            Err(ProtocolError::BadExceptionField { field: "errno", .. })
        ));
    }

    #[test]
    fn io_error_classification() {
        let err = io::Error::from_raw_os_error(2);
        let remote = RemoteError::from_io(&err, Some(b"/x"));
        assert_eq!(remote.kind, RemoteErrorKind::NotFound);
        assert_eq!(remote.errno, Some(2));
        assert_eq!(remote.filename.as_deref(), Some(&b"/x"[..]));
    }

    #[test]
    fn display_prefers_strerror() {
        let err = RemoteError::new(RemoteErrorKind::NotFound)
            .with_errno(2)
            .with_strerror("No such file or directory")
            .with_filename(b"/x".to_vec());
        assert_eq!(err.to_string(), "[Errno 2] No such file or directory: \"/x\"");
    }
}
