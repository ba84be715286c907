//! Request lines and reply bodies.

use std::io::{self, BufRead, Write};

use crate::codec::{self, Flag, MAX_RETURN_CODE, MAX_LINE, MIN_RETURN_CODE};
use crate::literal::{self, Cursor};
use crate::{ProtocolError, RemoteError};

/// Request sent from the control host to the remote primitives.
///
/// Each request is a single line naming one remote primitive:
///
/// | variant | remote primitive | line                          |
/// |---------|------------------|-------------------------------|
/// | `Exec`  | `execute`        | `execute([b'ls'], b'')`       |
/// | `Put`   | `receive_file`   | `receive_file(b'/tmp/x')`     |
/// | `Fetch` | `send_file`      | `send_file(b'/tmp/x', 65536)` |
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Request {
    /// Run a command and collect its output.
    Exec {
        /// Program and arguments; `argv[0]` is looked up on the remote `PATH`.
        argv: Vec<Vec<u8>>,
        /// Bytes fed to the command's stdin.
        input: Vec<u8>,
    },
    /// Receive a chunk stream and write it to a remote file.
    Put {
        /// Absolute remote destination path.
        path: Vec<u8>,
    },
    /// Send a remote file back as a chunk stream.
    Fetch {
        /// Absolute remote source path.
        path: Vec<u8>,
        /// Largest chunk the sender may emit.
        chunk_size: usize,
    },
}

impl Request {
    /// Name of the remote primitive that serves this request.
    pub const fn primitive(&self) -> &'static str {
        match self {
            Self::Exec { .. } => "execute",
            Self::Put { .. } => "receive_file",
            Self::Fetch { .. } => "send_file",
        }
    }

    /// Serializes the request as one `\n`-terminated line.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = String::from(self.primitive());
        line.push('(');
        match self {
            Self::Exec { argv, input } => {
                literal::push_list(&mut line, argv);
                line.push_str(", ");
                literal::push_bytes(&mut line, input);
            }
            Self::Put { path } => literal::push_bytes(&mut line, path),
            Self::Fetch { path, chunk_size } => {
                literal::push_bytes(&mut line, path);
                line.push_str(", ");
                line.push_str(&chunk_size.to_string());
            }
        }
        line.push_str(")\n");
        line.into_bytes()
    }

    /// Parses a line produced by [`Request::to_line`]. A trailing newline is optional.
    pub fn parse_line(line: &[u8]) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let mut c = Cursor::new(line);
        let name = c.ident()?;
        c.expect("(")?;
        let req = match name {
            "execute" => {
                let argv = c.list()?;
                c.expect(",")?;
                let input = c.bytes()?;
                Self::Exec { argv, input }
            }
            "receive_file" => Self::Put { path: c.bytes()? },
            "send_file" => {
                let path = c.bytes()?;
                c.expect(",")?;
                let chunk_size = c.unsigned()?;
                Self::Fetch { path, chunk_size }
            }
            other => {
                return Err(ProtocolError::BadRequest(format!(
                    "unknown primitive {other:?}"
                )));
            }
        };
        c.expect(")")?;
        c.finish()?;
        Ok(req)
    }
}

/// Result of a completed remote `execute`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ExecOutput {
    /// Exit code; a negated signal number if the command was killed.
    pub code: i32,
    /// Captured stdout bytes.
    pub stdout: Vec<u8>,
    /// Captured stderr bytes.
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Creates an output record.
    pub const fn new(code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            code,
            stdout,
            stderr,
        }
    }

    /// Writes the success reply: `Y\n<code>\n<len>\n<stdout><len>\n<stderr>`.
    pub fn write_reply(&self, w: &mut impl Write) -> io::Result<()> {
        codec::write_flag(w, Flag::Yes)?;
        codec::write_int(w, self.code)?;
        codec::write_sized(w, &self.stdout)?;
        codec::write_sized(w, &self.stderr)
    }

    /// Reads the body that follows a `Y\n` flag.
    ///
    /// `max_output` bounds each of stdout and stderr.
    pub fn read_body(r: &mut impl BufRead, max_output: usize) -> Result<Self, ProtocolError> {
        let code = codec::read_int(r, MIN_RETURN_CODE, MAX_RETURN_CODE)?;
        let stdout = codec::read_sized(r, max_output)?;
        let stderr = codec::read_sized(r, max_output)?;
        Ok(Self {
            // Range-checked above.
            code: i32::try_from(code).unwrap_or(i32::MIN),
            stdout,
            stderr,
        })
    }
}

/// Reads a full `execute` reply: a flag, then either the output or an exception.
pub fn read_exec_reply(
    r: &mut impl BufRead,
    max_output: usize,
) -> Result<Result<ExecOutput, RemoteError>, ProtocolError> {
    match codec::read_flag(r)? {
        Flag::Yes => ExecOutput::read_body(r, max_output).map(Ok),
        Flag::No => RemoteError::decode(r).map(Err),
    }
}

/// Reads one acknowledgement: `Y\n`, or `N\n` plus an exception.
pub fn read_ack(r: &mut impl BufRead) -> Result<Result<(), RemoteError>, ProtocolError> {
    match codec::read_flag(r)? {
        Flag::Yes => Ok(Ok(())),
        Flag::No => RemoteError::decode(r).map(Err),
    }
}

/// Writes `N\n` followed by the marshalled exception.
pub fn write_failure(w: &mut impl Write, err: &RemoteError) -> io::Result<()> {
    codec::write_flag(w, Flag::No)?;
    err.encode(w)
}

/// Checks that the peer's readiness line is the `OK\n` marker.
pub fn check_ready(line: &[u8]) -> Result<(), ProtocolError> {
    if line.starts_with(codec::READY) {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedFlag(codec::lossy(
            &line[..line.len().min(MAX_LINE)],
        )))
    }
}
