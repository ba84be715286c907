//! Framing violations.

use std::io;

/// The peer sent something the framing rules do not allow.
///
/// Once one of these is returned the stream position can no longer be
/// trusted; callers must stop reading from it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The stream ended where a line was expected.
    #[error("remote end closed the stream")]
    Eof,

    /// The stream ended in the middle of a line.
    #[error("stream ended mid-line after {0:?}")]
    TruncatedLine(String),

    /// No newline within the allowed number of bytes.
    #[error("line exceeds {limit} bytes without a newline")]
    LineTooLong {
        /// The byte limit that was hit.
        limit: usize,
    },

    /// A length line was not a decimal integer.
    #[error("malformed length field {0:?}")]
    BadLength(String),

    /// A length prefix was negative or above the allowed maximum.
    #[error("length {len} outside the accepted range 0..={max}")]
    LengthOutOfRange {
        /// The declared length.
        len: i64,
        /// The maximum in force.
        max: usize,
    },

    /// Fewer payload bytes arrived than the length prefix declared.
    #[error("declared {expected} bytes but only {actual} arrived")]
    ShortRead {
        /// Declared length.
        expected: usize,
        /// Bytes actually read before end of stream.
        actual: usize,
    },

    /// A numeric line (return code) was not a decimal integer.
    #[error("malformed integer field {0:?}")]
    BadInteger(String),

    /// A numeric line was outside its allowed range.
    #[error("value {value} outside the accepted range {min}..={max}")]
    IntegerOutOfRange {
        /// Received value.
        value: i64,
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },

    /// Something other than `Y\n` or `N\n` where a flag was expected.
    #[error("pass/fail marker from remote end is unexpected: {0:?}")]
    UnexpectedFlag(String),

    /// A marshalled exception carried a kind tag this build does not know.
    #[error("exception kind {0:?} cannot be decoded")]
    UnknownErrorKind(String),

    /// A marshalled exception field did not have the expected shape.
    #[error("malformed exception field {field}: {value:?}")]
    BadExceptionField {
        /// Field name.
        field: &'static str,
        /// Received text.
        value: String,
    },

    /// A request line could not be parsed.
    #[error("malformed request line: {0}")]
    BadRequest(String),

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Returns `true` if the failure was a read timeout on the stream.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}
