//! Byte-string literals in request lines.
//!
//! Arguments are written as `b'...'` literals that a Python interpreter
//! evaluates directly and that [`Cursor`] parses back on the native agent.
//! Only printable ASCII is emitted verbatim, so a request is always exactly
//! one line no matter what bytes it carries.

use crate::ProtocolError;

/// Appends `bytes` to `out` as a `b'...'` literal.
pub fn push_bytes(out: &mut String, bytes: &[u8]) {
    use std::fmt::Write as _;

    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('\'');
}

/// Appends `[b'..', b'..']`.
pub fn push_list(out: &mut String, items: &[Vec<u8>]) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_bytes(out, item);
    }
    out.push(']');
}

/// Left-to-right parser over one request line.
#[derive(Debug)]
pub struct Cursor<'a> {
    /// Unconsumed input.
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    /// Starts parsing `line` (without its trailing newline).
    pub const fn new(line: &'a [u8]) -> Self {
        Self { rest: line }
    }

    /// Consumes an identifier (`[A-Za-z_][A-Za-z0-9_]*`).
    pub fn ident(&mut self) -> Result<&'a str, ProtocolError> {
        let end = self
            .rest
            .iter()
            .position(|&b| !(b.is_ascii_alphanumeric() || b == b'_'))
            .unwrap_or(self.rest.len());
        if end == 0 || self.rest[0].is_ascii_digit() {
            return Err(self.error("expected an operation name"));
        }
        let (name, rest) = self.rest.split_at(end);
        self.rest = rest;
        std::str::from_utf8(name).map_err(|_| self.error("operation name is not ASCII"))
    }

    /// Consumes `token`, allowing leading spaces.
    pub fn expect(&mut self, token: &str) -> Result<(), ProtocolError> {
        self.skip_spaces();
        match self.rest.strip_prefix(token.as_bytes()) {
            Some(rest) => {
                self.rest = rest;
                Ok(())
            }
            None => Err(self.error(&format!("expected {token:?}"))),
        }
    }

    /// Consumes a `b'...'` literal.
    pub fn bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.skip_spaces();
        self.rest = self
            .rest
            .strip_prefix(b"b'")
            .ok_or_else(|| self.error("expected a byte literal"))?;

        let mut out = Vec::new();
        loop {
            let (&b, rest) = self
                .rest
                .split_first()
                .ok_or_else(|| self.error("unterminated byte literal"))?;
            self.rest = rest;
            match b {
                b'\'' => return Ok(out),
                b'\\' => out.push(self.escape()?),
                _ => out.push(b),
            }
        }
    }

    /// Consumes `[b'..', ...]`.
    pub fn list(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.expect("[")?;
        let mut items = Vec::new();
        self.skip_spaces();
        if let Some(rest) = self.rest.strip_prefix(b"]") {
            self.rest = rest;
            return Ok(items);
        }
        loop {
            items.push(self.bytes()?);
            self.skip_spaces();
            match self.rest.split_first() {
                Some((&b',', rest)) => self.rest = rest,
                Some((&b']', rest)) => {
                    self.rest = rest;
                    return Ok(items);
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    /// Consumes a non-negative decimal integer.
    pub fn unsigned(&mut self) -> Result<usize, ProtocolError> {
        self.skip_spaces();
        let end = self
            .rest
            .iter()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let (digits, rest) = self.rest.split_at(end);
        let value = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("expected an integer"))?;
        self.rest = rest;
        Ok(value)
    }

    /// Succeeds only if nothing but spaces remains.
    pub fn finish(mut self) -> Result<(), ProtocolError> {
        self.skip_spaces();
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }

    /// Decodes the character(s) after a backslash.
    fn escape(&mut self) -> Result<u8, ProtocolError> {
        let (&c, rest) = self
            .rest
            .split_first()
            .ok_or_else(|| self.error("dangling backslash"))?;
        self.rest = rest;
        match c {
            b'\\' => Ok(b'\\'),
            b'\'' => Ok(b'\''),
            b'"' => Ok(b'"'),
            b't' => Ok(b'\t'),
            b'n' => Ok(b'\n'),
            b'r' => Ok(b'\r'),
            b'0' => Ok(0),
            b'x' => {
                let hex = self
                    .rest
                    .get(..2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| self.error("bad \\x escape"))?;
                self.rest = &self.rest[2..];
                Ok(hex)
            }
            _ => Err(self.error("unsupported escape")),
        }
    }

    /// Skips ASCII spaces.
    fn skip_spaces(&mut self) {
        while let Some((&b' ', rest)) = self.rest.split_first() {
            self.rest = rest;
        }
    }

    /// Builds a parse error pointing at the unconsumed input.
    fn error(&self, what: &str) -> ProtocolError {
        let near = &self.rest[..self.rest.len().min(24)];
        ProtocolError::BadRequest(format!("{what} near {:?}", String::from_utf8_lossy(near)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn literal(bytes: &[u8]) -> String {
        let mut s = String::new();
        push_bytes(&mut s, bytes);
        s
    }

    #[test]
    fn escapes_quotes_backslashes_and_control_bytes() {
        assert_eq!(literal(b"echo yes"), "b'echo yes'");
        assert_eq!(literal(b"it's"), "b'it\\'s'");
        assert_eq!(literal(b"a\\b"), "b'a\\\\b'");
        assert_eq!(literal(b"\x00\xff\n"), "b'\\x00\\xff\\n'");
    }

    #[test]
    fn every_byte_value_parses_back() {
        let all: Vec<u8> = (0..=255).collect();
        let text = literal(&all);
        assert!(!text.contains('\n'));
        let mut c = Cursor::new(text.as_bytes());
        assert_eq!(c.bytes().unwrap(), all);
        c.finish().unwrap();
    }

    #[test]
    fn empty_and_spaced_lists() {
        let mut c = Cursor::new(b"[]");
        assert!(c.list().unwrap().is_empty());

        let mut c = Cursor::new(b"[ b'a' ,b'b' ]");
        assert_eq!(c.list().unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn unterminated_literal_is_rejected() {
        let mut c = Cursor::new(b"b'abc");
        assert!(matches!(c.bytes(), Err(ProtocolError::BadRequest(_))));
    }
}
