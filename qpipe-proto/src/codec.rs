//! Decimal length-prefix framing over any `BufRead`/`Write` stream.
//!
//! Every variable-length field is sent as `<len>\n<raw bytes>`, where `<len>`
//! is ASCII decimal. Flags are the single-character lines `Y\n` and `N\n`.
//! Reads never trust the peer: line lengths are capped at [`MAX_LINE`] and
//! every length prefix is checked against a caller-supplied maximum before a
//! single payload byte is buffered.

use std::io::{self, BufRead, Read, Write};

use crate::ProtocolError;

/// Readiness marker printed by the remote side once its primitives are installed.
pub const READY: &[u8] = b"OK\n";

/// Longest accepted length/flag line, newline included.
pub const MAX_LINE: usize = 16;

/// Largest transfer chunk (and exception field) accepted from the wire: 64 KiB.
pub const MAX_CHUNK: usize = 64 * 1024;

/// Largest exec stdout/stderr accepted from the wire: 1 GiB.
pub const MAX_OUTPUT: usize = 1024 * 1024 * 1024;

/// Largest encoded request line, including argv, stdin and the newline.
pub const MAX_REQUEST: usize = 256 * 1024 * 1024;

/// Lowest return code a remote `execute` may report.
pub const MIN_RETURN_CODE: i64 = -65535;

/// Highest return code a remote `execute` may report.
pub const MAX_RETURN_CODE: i64 = 65536;

/// Outcome marker written before a reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// `Y\n`: the operation succeeded and a success body follows.
    Yes,
    /// `N\n`: the operation failed and a marshalled exception follows.
    No,
}

impl Flag {
    /// Wire form, newline included.
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Yes => b"Y\n",
            Self::No => b"N\n",
        }
    }
}

/// What the sender of a chunk stream put where a length line was expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkHeader {
    /// A chunk of this many bytes follows; `0` ends the stream.
    Len(usize),
    /// The sender failed; a marshalled exception follows.
    Failed,
}

/// Reads one `\n`-terminated line of at most `limit` bytes (newline included).
///
/// The returned line keeps its trailing newline. End of stream before any
/// byte is [`ProtocolError::Eof`]; end of stream mid-line is
/// [`ProtocolError::TruncatedLine`].
pub fn read_line(r: &mut impl BufRead, limit: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut line = Vec::new();
    loop {
        let available = match r.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if available.is_empty() {
            return Err(if line.is_empty() {
                ProtocolError::Eof
            } else {
                ProtocolError::TruncatedLine(lossy(&line))
            });
        }

        let room = limit.saturating_sub(line.len());
        let window = &available[..available.len().min(room)];
        if let Some(pos) = window.iter().position(|&b| b == b'\n') {
            line.extend_from_slice(&window[..=pos]);
            r.consume(pos + 1);
            return Ok(line);
        }
        let taken = window.len();
        line.extend_from_slice(window);
        r.consume(taken);
        if line.len() >= limit {
            return Err(ProtocolError::LineTooLong { limit });
        }
    }
}

/// Reads a decimal length line and checks `0 <= len <= max`.
pub fn read_length(r: &mut impl BufRead, max: usize) -> Result<usize, ProtocolError> {
    let line = read_line(r, MAX_LINE)?;
    parse_length(&line, max)
}

/// Reads a flag line (`Y\n` / `N\n`).
pub fn read_flag(r: &mut impl BufRead) -> Result<Flag, ProtocolError> {
    let line = read_line(r, MAX_LINE)?;
    match line.as_slice() {
        b"Y\n" => Ok(Flag::Yes),
        b"N\n" => Ok(Flag::No),
        _ => Err(ProtocolError::UnexpectedFlag(lossy(&line))),
    }
}

/// Reads the line that opens a chunk: either a bounded length or `N\n`.
pub fn read_chunk_header(r: &mut impl BufRead, max: usize) -> Result<ChunkHeader, ProtocolError> {
    let line = read_line(r, MAX_LINE)?;
    if line == Flag::No.as_bytes() {
        return Ok(ChunkHeader::Failed);
    }
    parse_length(&line, max).map(ChunkHeader::Len)
}

/// Reads exactly `len` bytes, failing with [`ProtocolError::ShortRead`] on early EOF.
pub fn read_payload(r: &mut impl Read, len: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(len.min(MAX_CHUNK));
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() == len {
        Ok(buf)
    } else {
        Err(ProtocolError::ShortRead {
            expected: len,
            actual: buf.len(),
        })
    }
}

/// Reads a bounded length line followed by that many bytes.
pub fn read_sized(r: &mut impl BufRead, max: usize) -> Result<Vec<u8>, ProtocolError> {
    let len = read_length(r, max)?;
    read_payload(r, len)
}

/// Reads a decimal integer line (e.g. a return code) within `min..=max`.
pub fn read_int(r: &mut impl BufRead, min: i64, max: i64) -> Result<i64, ProtocolError> {
    let line = read_line(r, MAX_LINE)?;
    let value = parse_decimal(&line).ok_or_else(|| ProtocolError::BadInteger(lossy(&line)))?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ProtocolError::IntegerOutOfRange { value, min, max })
    }
}

/// Writes a flag line.
pub fn write_flag(w: &mut impl Write, flag: Flag) -> io::Result<()> {
    w.write_all(flag.as_bytes())
}

/// Writes a decimal line (lengths, return codes).
pub fn write_int(w: &mut impl Write, value: impl Into<i64>) -> io::Result<()> {
    writeln!(w, "{}", value.into())
}

/// Writes `<len>\n<bytes>`.
pub fn write_sized(w: &mut impl Write, data: &[u8]) -> io::Result<()> {
    writeln!(w, "{}", data.len())?;
    w.write_all(data)
}

/// Parses a length line (newline included) and enforces `0 <= len <= max`.
fn parse_length(line: &[u8], max: usize) -> Result<usize, ProtocolError> {
    let value = parse_decimal(line).ok_or_else(|| ProtocolError::BadLength(lossy(line)))?;
    usize::try_from(value)
        .ok()
        .filter(|&len| len <= max)
        .ok_or(ProtocolError::LengthOutOfRange { len: value, max })
}

/// Parses `[-]digits\n`. Anything else (signs, spaces, empty) is rejected.
fn parse_decimal(line: &[u8]) -> Option<i64> {
    let digits = line.strip_suffix(b"\n")?;
    let (negative, body) = match digits.strip_prefix(b"-") {
        Some(rest) => (true, rest),
        None => (false, digits),
    };
    if body.is_empty() || !body.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let magnitude: i64 = std::str::from_utf8(body).ok()?.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Lossy text rendering of a wire fragment for error messages.
pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn length_at_max_is_accepted() {
        let mut r = Cursor::new(format!("{MAX_CHUNK}\n"));
        assert_eq!(read_length(&mut r, MAX_CHUNK).unwrap(), MAX_CHUNK);
    }

    #[test]
    fn length_above_max_is_rejected() {
        let mut r = Cursor::new(format!("{}\n", MAX_CHUNK + 1));
        let err = read_length(&mut r, MAX_CHUNK).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthOutOfRange { .. }));
    }

    #[test]
    fn negative_and_garbage_lengths_are_rejected() {
        for input in ["-1\n", "abc\n", "\n", " 4\n", "+4\n", "4"] {
            let mut r = Cursor::new(input);
            assert!(read_length(&mut r, MAX_CHUNK).is_err(), "{input:?}");
        }
    }

    #[test]
    fn overlong_line_stops_at_limit() {
        let mut r = Cursor::new("12345678901234567890\n");
        let err = read_line(&mut r, MAX_LINE).unwrap_err();
        assert!(matches!(err, ProtocolError::LineTooLong { limit: MAX_LINE }));
    }

    #[test]
    fn eof_is_distinguished_from_truncation() {
        let mut empty = Cursor::new("");
        assert!(matches!(read_flag(&mut empty), Err(ProtocolError::Eof)));

        let mut partial = Cursor::new("Y");
        assert!(matches!(
            read_flag(&mut partial),
            Err(ProtocolError::TruncatedLine(_))
        ));
    }

    #[test]
    fn flags() {
        let mut r = Cursor::new("Y\nN\nX\n");
        assert_eq!(read_flag(&mut r).unwrap(), Flag::Yes);
        assert_eq!(read_flag(&mut r).unwrap(), Flag::No);
        assert!(matches!(
            read_flag(&mut r),
            Err(ProtocolError::UnexpectedFlag(s)) if s == "X\n"
        ));
    }

    #[test]
    fn short_payload_is_detected() {
        let mut r = Cursor::new("5\nabc");
        let err = read_sized(&mut r, MAX_CHUNK).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortRead {
                expected: 5,
                actual: 3
            }
        ));
    }

    #[test]
    fn chunk_header_failure_marker() {
        let mut r = Cursor::new("N\n");
        assert_eq!(
            read_chunk_header(&mut r, MAX_CHUNK).unwrap(),
            ChunkHeader::Failed
        );
    }

    #[test]
    fn binary_payload_survives_framing() {
        let data: Vec<u8> = (0..=255).collect();
        let mut buf = Vec::new();
        write_sized(&mut buf, &data).unwrap();
        write_sized(&mut buf, b"").unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_sized(&mut r, MAX_CHUNK).unwrap(), data);
        assert_eq!(read_length(&mut r, MAX_CHUNK).unwrap(), 0);
    }

    #[test]
    fn return_code_bounds() {
        let mut r = Cursor::new("-65535\n65537\n");
        assert_eq!(
            read_int(&mut r, MIN_RETURN_CODE, MAX_RETURN_CODE).unwrap(),
            -65535
        );
        assert!(matches!(
            read_int(&mut r, MIN_RETURN_CODE, MAX_RETURN_CODE),
            Err(ProtocolError::IntegerOutOfRange { value: 65537, .. })
        ));
    }
}
