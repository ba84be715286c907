//! Remote program text fed to the launcher on startup.
//!
//! The remote process is a stock `python3 -u -i -c <PREAMBLE>`: the preamble
//! silences the prompts and switches both standard streams to unbuffered
//! binary mode, then the interactive loop executes [`payload`] line by line
//! as it arrives on stdin. The payload defines the three primitives and
//! prints the readiness marker as its very last statement, so the session
//! knows every definition has been evaluated before it issues a request.

use std::ffi::OsString;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Program text passed to `python3 -c`.
pub const PREAMBLE: &str = include_str!("../assets/preamble.py");

/// Remote primitives, written to the interpreter's stdin.
const PRIMITIVES: &str = include_str!("../assets/primitives.py");

/// Name of the native remote agent binary.
pub const NATIVE_AGENT: &str = "qpipe-agent";

/// Returns the bootstrap payload.
///
/// The payload starts with [`qpipe_proto::BOOTSTRAP_HEADER`] and ends with
/// [`qpipe_proto::BOOTSTRAP_END`].
pub const fn payload() -> &'static str {
    PRIMITIVES
}

/// Remote command running the payload under a stock Python interpreter.
pub fn python_command() -> Vec<OsString> {
    ["python3", "-u", "-i", "-c", PREAMBLE]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// Remote command running the native agent.
pub fn native_command() -> Vec<OsString> {
    vec![OsString::from(NATIVE_AGENT)]
}

/// SHA-256 of the payload as lowercase hex.
pub fn digest() -> String {
    Sha256::digest(PRIMITIVES.as_bytes())
        .iter()
        .fold(String::with_capacity(64), |mut hex, b| {
            let _ = write!(hex, "{b:02x}");
            hex
        })
}

#[cfg(test)]
mod tests {
    use qpipe_proto::{BOOTSTRAP_END, BOOTSTRAP_HEADER};

    use super::*;

    #[test]
    fn payload_is_framed_by_version_header_and_end_marker() {
        let mut lines = payload().lines();
        assert_eq!(lines.next(), Some(BOOTSTRAP_HEADER));
        assert_eq!(lines.last(), Some(BOOTSTRAP_END));
        assert!(payload().ends_with('\n'));
    }

    #[test]
    fn readiness_marker_is_the_last_statement() {
        let code: Vec<&str> = payload()
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .collect();
        let tail = &code[code.len() - 2..];
        assert_eq!(tail[0], "_ = sys.stdout.write(b'OK\\n')");
        assert_eq!(tail[1], "sys.stdout.flush()");
    }

    #[test]
    fn function_bodies_have_no_blank_lines() {
        // A blank line ends a compound statement in interactive mode.
        let lines: Vec<&str> = payload().lines().collect();
        for pair in lines.windows(2) {
            if pair[0].trim().is_empty() {
                assert!(
                    !pair[1].starts_with(' '),
                    "indented line after a blank line: {:?}",
                    pair[1]
                );
            }
        }
    }

    #[test]
    fn defines_the_three_primitives() {
        for name in ["execute", "receive_file", "send_file"] {
            assert!(payload().contains(&format!("\ndef {name}(")), "{name}");
        }
    }

    #[test]
    fn digest_is_stable_hex() {
        let d = digest();
        assert_eq!(d.len(), 64);
        assert!(d.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(d, digest());
    }

    #[test]
    fn python_command_carries_preamble() {
        let cmd = python_command();
        assert_eq!(cmd[0], "python3");
        assert_eq!(cmd.last().map(OsString::as_os_str), Some(std::ffi::OsStr::new(PREAMBLE)));
    }
}
