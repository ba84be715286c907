//! Request loop over the agent's standard streams.

use std::io::{self, BufRead, Write};
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use qpipe_proto::codec;
use qpipe_proto::{
    BOOTSTRAP_END, BOOTSTRAP_HEADER, MAX_REQUEST, ProtocolError, READY, RemoteError, Request,
};
use tracing::{debug, info};

use crate::{exec, files};

/// Longest bootstrap line accepted while skipping the payload.
const MAX_BOOTSTRAP_LINE: usize = 4096;

/// Consumes the bootstrap, reports readiness and serves requests until EOF.
///
/// A malformed request or chunk stream is unrecoverable and ends the loop
/// with an error; the caller exits non-zero.
pub fn run(r: &mut impl BufRead, w: &mut impl Write) -> Result<(), ProtocolError> {
    skip_bootstrap(r)?;
    w.write_all(READY)?;
    w.flush()?;
    info!("ready");

    loop {
        let line = match codec::read_line(r, MAX_REQUEST) {
            Ok(line) => line,
            Err(ProtocolError::Eof) => {
                info!("stdin closed, exiting");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if line.trim_ascii().is_empty() {
            continue;
        }

        let request = Request::parse_line(&line)?;
        debug!(primitive = request.primitive(), "request");
        match request {
            Request::Exec { argv, input } => exec::execute(w, &argv, &input)?,
            Request::Put { path } => files::receive(r, w, &path)?,
            Request::Fetch { path, chunk_size } => files::send(w, &path, chunk_size)?,
            other => {
                return Err(ProtocolError::BadRequest(format!(
                    "unsupported primitive {}",
                    other.primitive()
                )));
            }
        }
    }
}

/// Checks the payload's version header and discards it up to the end marker.
fn skip_bootstrap(r: &mut impl BufRead) -> Result<(), ProtocolError> {
    let header = codec::read_line(r, MAX_BOOTSTRAP_LINE)?;
    if header.trim_ascii_end() != BOOTSTRAP_HEADER.as_bytes() {
        return Err(ProtocolError::BadRequest(format!(
            "unsupported bootstrap {:?}",
            String::from_utf8_lossy(&header)
        )));
    }
    let mut skipped = 0usize;
    loop {
        let line = codec::read_line(r, MAX_BOOTSTRAP_LINE)?;
        if line.trim_ascii_end() == BOOTSTRAP_END.as_bytes() {
            debug!(lines = skipped, "bootstrap consumed");
            return Ok(());
        }
        skipped += 1;
    }
}

/// Builds the exception block for a failed OS call.
pub fn remote_error(err: &io::Error, filename: Option<&[u8]>) -> RemoteError {
    let remote = RemoteError::from_io(err, filename);
    match err.raw_os_error() {
        Some(errno) => remote.with_strerror(Errno::from_raw(errno).desc()),
        None => remote,
    }
}

/// Renders a path for log fields.
pub fn show_path(path: &[u8]) -> std::path::Display<'_> {
    std::path::Path::new(std::ffi::OsStr::from_bytes(path)).display()
}
