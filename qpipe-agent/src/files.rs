//! The `receive_file` and `send_file` primitives.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use qpipe_proto::codec::{self, Flag};
use qpipe_proto::{MAX_CHUNK, ProtocolError, write_failure};
use tracing::debug;

use crate::serve::{remote_error, show_path};

/// Writes the chunk stream that follows the request to `path`.
///
/// Every chunk is acknowledged, including the zero-length terminator, which
/// is only acknowledged once the file has been flushed. After a failure the
/// rest of the stream is not read; the client stops sending as soon as it
/// sees the `N` reply.
pub fn receive(r: &mut impl BufRead, w: &mut impl Write, path: &[u8]) -> Result<(), ProtocolError> {
    let mut file = match File::create(Path::new(OsStr::from_bytes(path))) {
        Ok(f) => f,
        Err(e) => return Ok(fail(w, &e, Some(path))?),
    };
    ack(w)?;

    let mut written = 0usize;
    loop {
        let len = codec::read_length(r, MAX_CHUNK)?;
        if len == 0 {
            break;
        }
        let data = codec::read_payload(r, len)?;
        if let Err(e) = file.write_all(&data) {
            return Ok(fail(w, &e, None)?);
        }
        written += len;
        ack(w)?;
    }

    if let Err(e) = file.flush() {
        return Ok(fail(w, &e, None)?);
    }
    drop(file);
    debug!(path = %show_path(path), bytes = written, "received");
    Ok(ack(w)?)
}

/// Streams `path` back in chunks of at most `chunk_size` bytes, ending with `0\n`.
pub fn send(w: &mut impl Write, path: &[u8], chunk_size: usize) -> io::Result<()> {
    let size = chunk_size.clamp(1, MAX_CHUNK);
    let mut file = match open_regular(Path::new(OsStr::from_bytes(path))) {
        Ok(f) => f,
        Err(e) => return fail(w, &e, Some(path)),
    };

    let mut buf = vec![0; size];
    let mut sent = 0usize;
    loop {
        let n = match read_full(&mut file, &mut buf) {
            Ok(n) => n,
            Err(e) => return fail(w, &e, None),
        };
        codec::write_sized(w, &buf[..n])?;
        w.flush()?;
        if n == 0 {
            debug!(path = %show_path(path), bytes = sent, "sent");
            return Ok(());
        }
        sent += n;
    }
}

/// Opens `path` for reading, refusing directories up front.
fn open_regular(path: &Path) -> io::Result<File> {
    let file = File::open(path)?;
    if file.metadata()?.is_dir() {
        return Err(io::Error::from_raw_os_error(Errno::EISDIR as i32));
    }
    Ok(file)
}

/// Writes `Y\n`.
fn ack(w: &mut impl Write) -> io::Result<()> {
    codec::write_flag(w, Flag::Yes)?;
    w.flush()
}

/// Writes `N\n` and the exception for `err`.
fn fail(w: &mut impl Write, err: &io::Error, filename: Option<&[u8]>) -> io::Result<()> {
    debug!("reporting failure: {err}");
    write_failure(w, &remote_error(err, filename))?;
    w.flush()
}

/// Fills `buf` from `r`, stopping early only at end of file.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
