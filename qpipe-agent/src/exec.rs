//! The `execute` primitive.

use std::ffi::OsStr;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};

use qpipe_proto::{ExecOutput, RemoteError, RemoteErrorKind, write_failure};
use tracing::{debug, warn};

use crate::serve::{remote_error, show_path};

/// Runs `argv` with `input` on its stdin and writes the reply.
///
/// Stdin is fed from a helper thread while stdout and stderr are collected,
/// so a command producing large output never deadlocks against its input.
pub fn execute(w: &mut impl Write, argv: &[Vec<u8>], input: &[u8]) -> io::Result<()> {
    let Some((program, args)) = argv.split_first() else {
        let err = RemoteError::new(RemoteErrorKind::Io).with_message("empty argument vector");
        write_failure(w, &err)?;
        return w.flush();
    };

    let spawned = Command::new(OsStr::from_bytes(program))
        .args(args.iter().map(|a| OsStr::from_bytes(a)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            debug!(program = %show_path(program), "spawn failed: {e}");
            write_failure(w, &remote_error(&e, Some(program)))?;
            return w.flush();
        }
    };

    let stdin = child.stdin.take();
    let output = std::thread::scope(|s| {
        if let Some(mut pipe) = stdin {
            s.spawn(move || {
                if let Err(e) = pipe.write_all(input) {
                    debug!("command stopped reading stdin: {e}");
                }
            });
        }
        child.wait_with_output()
    })?;

    let code = output
        .status
        .code()
        .or_else(|| output.status.signal().map(|sig| -sig))
        .unwrap_or_else(|| {
            warn!(status = %output.status, "no exit code or signal");
            -1
        });
    debug!(program = %show_path(program), code, "command finished");
    ExecOutput::new(code, output.stdout, output.stderr).write_reply(w)?;
    w.flush()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use qpipe_proto::{MAX_OUTPUT, read_exec_reply};

    use super::*;

    fn run(argv: &[&str], input: &[u8]) -> Result<ExecOutput, RemoteError> {
        let argv: Vec<Vec<u8>> = argv.iter().map(|a| a.as_bytes().to_vec()).collect();
        let mut out = Vec::new();
        execute(&mut out, &argv, input).unwrap();
        read_exec_reply(&mut Cursor::new(out), MAX_OUTPUT).unwrap()
    }

    #[test]
    fn matches_local_execution() {
        let local = Command::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 7"])
            .output()
            .unwrap();
        let remote = run(&["sh", "-c", "echo out; echo err >&2; exit 7"], b"").unwrap();
        assert_eq!(remote.code, local.status.code().unwrap());
        assert_eq!(remote.stdout, local.stdout);
        assert_eq!(remote.stderr, local.stderr);
    }

    #[test]
    fn large_input_and_output_do_not_deadlock() {
        let input = vec![b'x'; 4 * 1024 * 1024];
        let out = run(&["cat"], &input).unwrap();
        assert_eq!(out.stdout.len(), input.len());
    }

    #[test]
    fn unread_stdin_is_not_an_error() {
        let out = run(&["true"], &vec![0; 1024 * 1024]).unwrap();
        assert_eq!(out.code, 0);
    }

    #[test]
    fn empty_argv_is_reported() {
        let err = run(&[], b"").unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Io);
    }

    #[test]
    fn not_executable_is_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        let err = run(&[script.to_str().unwrap()], b"").unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::PermissionDenied);
    }
}
