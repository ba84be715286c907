//! Persistent pipelined connection to one remote VM.
//!
//! A [`Session`] spawns the launcher once, feeds it the bootstrap payload
//! and waits for the readiness marker. After that every operation is one
//! request line followed by its framed reply on the same pair of pipes.
//!
//! ```no_run
//! use qpipe::{Launcher, Session};
//!
//! let mut session = Session::builder("work")
//!     .launcher(Launcher::new(["qrun"])?)
//!     .build()?;
//! session.connect()?;
//! let out = session.exec(&["uname", "-a"], b"")?;
//! print!("{}", String::from_utf8_lossy(&out.stdout));
//! session.put("local.txt", "/home/user/remote.txt")?;
//! session.close()?;
//! # Ok::<(), qpipe::Error>(())
//! ```

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use qpipe_proto::codec::{self, ChunkHeader};
use qpipe_proto::{
    ExecOutput, MAX_LINE, ProtocolError, RemoteError, Request, check_ready, read_ack,
    read_exec_reply,
};
use tracing::{Dispatch, Span, debug, info, warn};

use crate::launcher::{Launcher, Target};
use crate::timed::TimedReader;
use crate::{Config, Error, Result, bootstrap, remote_path};

/// Interval between exit checks while closing.
const REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionState {
    /// Not yet connected.
    Disconnected,
    /// Remote primitives are loaded and idle.
    Connected,
    /// Closed explicitly or torn down by a fatal error.
    Closed,
}

/// Internal state, carrying the transport while connected.
#[derive(Debug)]
enum State {
    /// Not yet connected.
    Disconnected,
    /// Live transport.
    Connected(Transport),
    /// Terminal.
    Closed,
}

/// Builder for [`Session`].
#[derive(Debug)]
#[must_use = "a SessionBuilder does nothing until .build() is called"]
pub struct SessionBuilder {
    /// VM to talk to.
    target: Target,
    /// Explicit launcher; overrides the config.
    launcher: Option<Launcher>,
    /// Explicit remote command; overrides the config.
    remote_command: Option<Vec<OsString>>,
    /// Limits and timeouts.
    config: Config,
    /// Subscriber for this session's events.
    dispatch: Option<Dispatch>,
}

impl SessionBuilder {
    /// Routes the launcher through a management relay.
    pub fn relay(mut self, relay: impl Into<String>) -> Self {
        self.target.relay = Some(relay.into());
        self
    }

    /// Sets the launcher (default: from config, else [`Launcher::discover`]).
    pub fn launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Sets the remote command (default: from config, else [`bootstrap::python_command`]).
    pub fn remote_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.remote_command = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Uses `config` for limits, timeouts and defaults.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sends this session's `tracing` events to `dispatch` instead of dropping them.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Validates the settings and returns a disconnected session.
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;
        let launcher = match (self.launcher, &self.config.launcher) {
            (Some(launcher), _) => launcher,
            (None, Some(argv)) => Launcher::new(argv)?,
            (None, None) => Launcher::discover()?,
        };
        let remote_command = match (self.remote_command, &self.config.remote_command) {
            (Some(argv), _) => argv,
            (None, Some(argv)) => argv.iter().map(OsString::from).collect(),
            (None, None) => bootstrap::python_command(),
        };
        if remote_command.is_empty() {
            return Err(Error::Config("remote command must not be empty".into()));
        }

        let dispatch = self.dispatch.unwrap_or_else(Dispatch::none);
        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::info_span!("session", vm = %self.target.address)
        });

        Ok(Session {
            target: self.target,
            launcher,
            remote_command,
            config: self.config,
            dispatch,
            span,
            state: State::Disconnected,
        })
    }
}

/// Connection to one remote VM.
///
/// Every operation takes `&mut self`, so at most one request is ever in flight.
#[derive(Debug)]
pub struct Session {
    /// VM this session talks to.
    target: Target,
    /// Launcher argv prefix.
    launcher: Launcher,
    /// Command the launcher runs inside the VM.
    remote_command: Vec<OsString>,
    /// Limits and timeouts.
    config: Config,
    /// Subscriber for this session's events.
    dispatch: Dispatch,
    /// `session{vm}` span, created under `dispatch`.
    span: Span,
    /// Lifecycle and transport.
    state: State,
}

impl Session {
    /// Starts building a session to `address`.
    pub fn builder(address: impl Into<String>) -> SessionBuilder {
        SessionBuilder {
            target: Target::new(address),
            launcher: None,
            remote_command: None,
            config: Config::default(),
            dispatch: None,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        match self.state {
            State::Disconnected => SessionState::Disconnected,
            State::Connected(_) => SessionState::Connected,
            State::Closed => SessionState::Closed,
        }
    }

    /// VM this session talks to.
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Spawns the launcher and waits for the remote primitives to load.
    ///
    /// A no-op when already connected. Fails with [`Error::Closed`] after
    /// [`close`](Self::close) or a fatal error.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            State::Connected(_) => return Ok(()),
            State::Closed => return Err(Error::Closed),
            State::Disconnected => {}
        }
        self.logged(|s| {
            let transport = s.open().inspect_err(|_| s.state = State::Closed)?;
            s.state = State::Connected(transport);
            Ok(())
        })
    }

    /// Runs `argv` remotely with `input` on its stdin.
    ///
    /// A non-zero exit code is not an error; a command that cannot be
    /// started is reported as a remote error and leaves the session usable.
    /// Requests longer than the configured `max_request` are refused before
    /// anything is sent.
    pub fn exec<A: AsRef<[u8]>>(&mut self, argv: &[A], input: &[u8]) -> Result<ExecOutput> {
        self.transport()?;
        if argv.is_empty() {
            return Err(Error::EmptyCommand);
        }
        let line = Request::Exec {
            argv: argv.iter().map(|a| a.as_ref().to_vec()).collect(),
            input: input.to_vec(),
        }
        .to_line();
        if line.len() > self.config.max_request {
            return Err(Error::RequestTooLarge {
                len: line.len(),
                max: self.config.max_request,
            });
        }
        let max_output = self.config.max_output;

        self.logged(|s| {
            debug!(
                command = %String::from_utf8_lossy(argv[0].as_ref()),
                args = argv.len() - 1,
                input = input.len(),
                "exec"
            );
            let reply = s.guarded(|t| {
                t.send_line(&line)?;
                Ok(read_exec_reply(&mut t.stdout, max_output)?)
            })?;
            let output = reply.map_err(Error::from)?;
            debug!(code = output.code, stdout = output.stdout.len(), stderr = output.stderr.len(), "exec finished");
            Ok(output)
        })
    }

    /// Copies the local file at `local` to `remote`, returning the bytes sent.
    pub fn put(&mut self, local: impl AsRef<Path>, remote: impl AsRef<Path>) -> Result<u64> {
        self.transport()?;
        let local = local.as_ref();
        let remote = remote_path::normalize(remote.as_ref());
        let local_error = |source: io::Error| Error::Local {
            path: local.to_path_buf(),
            source,
        };
        let mut file = File::open(local).map_err(local_error)?;
        if file.metadata().map_err(local_error)?.is_dir() {
            return Err(local_error(io::ErrorKind::IsADirectory.into()));
        }
        let request = Request::Put {
            path: remote_path::to_wire(&remote),
        };
        let chunk_size = self.config.chunk_size;

        self.logged(|s| {
            debug!(local = %local.display(), remote = %remote.display(), "put");
            let outcome = s.guarded(|t| t.upload(&request, &mut file, chunk_size))?;
            match outcome {
                Upload::Done(sent) => {
                    info!(remote = %remote.display(), bytes = sent, "put finished");
                    Ok(sent)
                }
                Upload::Rejected(err) => Err(err.into()),
                Upload::LocalFailed(source) => Err(Error::Local {
                    path: local.to_path_buf(),
                    source,
                }),
            }
        })
    }

    /// Copies `remote` to the local file at `local`, returning the bytes received.
    ///
    /// The local file is created before the request is sent and removed
    /// again if the remote side reports an error.
    pub fn fetch(&mut self, remote: impl AsRef<Path>, local: impl AsRef<Path>) -> Result<u64> {
        self.transport()?;
        let local = local.as_ref();
        let remote = remote_path::normalize(remote.as_ref());
        let mut file = File::create(local).map_err(|source| Error::Local {
            path: local.to_path_buf(),
            source,
        })?;
        let request = Request::Fetch {
            path: remote_path::to_wire(&remote),
            chunk_size: self.config.chunk_size,
        };
        let max_chunk = self.config.max_chunk;

        self.logged(|s| {
            debug!(remote = %remote.display(), local = %local.display(), "fetch");
            let outcome = s.guarded(|t| t.download(&request, &mut file, max_chunk));
            match outcome? {
                Download::Done(received) => {
                    info!(remote = %remote.display(), bytes = received, "fetch finished");
                    Ok(received)
                }
                Download::Rejected(err) => {
                    drop(file);
                    if let Err(e) = std::fs::remove_file(local) {
                        warn!(local = %local.display(), "cannot remove partial file: {e}");
                    }
                    Err(err.into())
                }
                Download::LocalFailed(source) => Err(Error::Local {
                    path: local.to_path_buf(),
                    source,
                }),
            }
        })
    }

    /// Shuts the remote process down and moves to [`SessionState::Closed`].
    ///
    /// Closes both pipes, then waits up to the close timeout before killing
    /// the process. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Connected(transport) => {
                let grace = self.config.close_timeout();
                self.logged(|_| transport.finish(grace))
            }
            State::Disconnected | State::Closed => Ok(()),
        }
    }

    /// Runs `f` with this session's dispatcher and span active.
    fn logged<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let dispatch = self.dispatch.clone();
        let span = self.span.clone();
        tracing::dispatcher::with_default(&dispatch, || span.in_scope(|| f(self)))
    }

    /// Returns the live transport.
    fn transport(&mut self) -> Result<&mut Transport> {
        match &mut self.state {
            State::Connected(t) => Ok(t),
            State::Disconnected => Err(Error::NotConnected),
            State::Closed => Err(Error::Closed),
        }
    }

    /// Runs `f` on the transport, tearing it down if `f` fails fatally.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Transport) -> Result<T>) -> Result<T> {
        let result = f(self.transport()?);
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!("closing transport: {err}");
                if let State::Connected(t) = std::mem::replace(&mut self.state, State::Closed) {
                    t.abort();
                }
            }
        }
        result
    }

    /// Spawns the launcher and performs the handshake.
    fn open(&self) -> Result<Transport> {
        let mut cmd = self.launcher.command(&self.target, &self.remote_command);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!(program = %self.launcher.program(), address = self.target.launch_address(), "spawning launcher");

        let mut transport = Transport::spawn(&mut cmd).map_err(|source| Error::Spawn {
            program: self.launcher.program(),
            source,
        })?;
        transport.set_timeout(Some(self.config.connect_timeout()));

        if let Err(detail) = transport.handshake() {
            transport.abort();
            return Err(Error::Setup {
                target: self.target.address.clone(),
                detail,
            });
        }
        transport.set_timeout(self.config.read_timeout());
        info!(pid = transport.child.id(), "connected");
        Ok(transport)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            self.logged(|_| warn!("close on drop failed: {e}"));
        }
    }
}

/// Outcome of an upload that reached the remote side.
#[derive(Debug)]
enum Upload {
    /// All bytes written and the file closed.
    Done(u64),
    /// The remote side failed to open, write or close the file.
    Rejected(RemoteError),
    /// Reading the local file failed; the stream was terminated cleanly.
    LocalFailed(io::Error),
}

/// Outcome of a download that reached the remote side.
#[derive(Debug)]
enum Download {
    /// The whole file arrived.
    Done(u64),
    /// The remote side failed to open or read the file.
    Rejected(RemoteError),
    /// Writing the local file failed; the stream was drained.
    LocalFailed(io::Error),
}

/// Child process and its pipes.
#[derive(Debug)]
struct Transport {
    /// Launcher process.
    child: Child,
    /// Request pipe.
    stdin: BufWriter<ChildStdin>,
    /// Reply pipe.
    stdout: BufReader<TimedReader<ChildStdout>>,
}

impl Transport {
    /// Spawns `cmd` with piped stdin and stdout.
    fn spawn(cmd: &mut Command) -> io::Result<Self> {
        let mut child = cmd.spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::other("child pipes were not captured"));
        };
        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(TimedReader::new(stdout, None)),
        })
    }

    /// Changes the reply deadline.
    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.stdout.get_mut().set_timeout(timeout);
    }

    /// Writes the bootstrap payload and waits for the readiness marker.
    fn handshake(&mut self) -> std::result::Result<(), String> {
        self.stdin
            .write_all(bootstrap::payload().as_bytes())
            .and_then(|()| self.stdin.flush())
            .map_err(|e| format!("cannot send the bootstrap: {e}"))?;

        match codec::read_line(&mut self.stdout, MAX_LINE) {
            Ok(line) => check_ready(&line).map_err(|e| e.to_string()),
            Err(ProtocolError::Eof) => Err("remote process exited before it was ready".into()),
            Err(e) if e.is_timeout() => Err("no readiness marker before the connect timeout".into()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Writes one request line.
    fn send(&mut self, request: &Request) -> Result<()> {
        self.send_line(&request.to_line())
    }

    /// Writes an already encoded request line.
    fn send_line(&mut self, line: &[u8]) -> Result<()> {
        self.stdin
            .write_all(line)
            .and_then(|()| self.stdin.flush())
            .map_err(Error::Transport)
    }

    /// Writes `data` as one length-prefixed chunk.
    fn send_chunk(&mut self, data: &[u8]) -> Result<()> {
        codec::write_sized(&mut self.stdin, data)
            .and_then(|()| self.stdin.flush())
            .map_err(Error::Transport)
    }

    /// Streams `file` to the remote `receive_file` primitive.
    fn upload(&mut self, request: &Request, file: &mut File, chunk_size: usize) -> Result<Upload> {
        self.send(request)?;
        if let Err(err) = read_ack(&mut self.stdout)? {
            return Ok(Upload::Rejected(err));
        }

        let mut buf = vec![0; chunk_size];
        let mut sent = 0u64;
        loop {
            let n = match read_full(file, &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    // Terminate the stream so the remote side stays in sync.
                    self.send_chunk(&[])?;
                    read_ack(&mut self.stdout)?.map_err(Error::from)?;
                    return Ok(Upload::LocalFailed(e));
                }
            };
            self.send_chunk(&buf[..n])?;
            if let Err(err) = read_ack(&mut self.stdout)? {
                return Ok(Upload::Rejected(err));
            }
            if n == 0 {
                return Ok(Upload::Done(sent));
            }
            sent += n as u64;
        }
    }

    /// Reads the remote `send_file` chunk stream into `file`.
    fn download(&mut self, request: &Request, file: &mut File, max_chunk: usize) -> Result<Download> {
        self.send(request)?;

        let mut received = 0u64;
        let mut local_error = None;
        loop {
            let len = match codec::read_chunk_header(&mut self.stdout, max_chunk)? {
                ChunkHeader::Len(len) => len,
                ChunkHeader::Failed => {
                    let err = RemoteError::decode(&mut self.stdout)?;
                    return Ok(Download::Rejected(err));
                }
            };
            if len == 0 {
                break;
            }
            let chunk = codec::read_payload(&mut self.stdout, len)?;
            received += len as u64;
            if local_error.is_none() {
                local_error = file.write_all(&chunk).err();
            }
        }

        if local_error.is_none() {
            local_error = file.flush().err();
        }
        Ok(local_error.map_or(Download::Done(received), Download::LocalFailed))
    }

    /// Closes the pipes and reaps the child, killing it after `grace`.
    fn finish(mut self, grace: Duration) -> Result<()> {
        if let Err(e) = self.stdin.flush() {
            debug!("flush before close failed: {e}");
        }
        let Self {
            mut child,
            stdin,
            stdout,
        } = self;
        drop(stdin);
        drop(stdout);

        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = child.try_wait().map_err(Error::Transport)? {
                debug!(%status, "remote process exited");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(pid = child.id(), "remote process did not exit, killing it");
                child.kill().map_err(Error::Transport)?;
                child.wait().map_err(Error::Transport)?;
                return Ok(());
            }
            std::thread::sleep(REAP_INTERVAL);
        }
    }

    /// Kills the child without waiting for a clean exit.
    fn abort(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use qpipe_proto::MAX_CHUNK;

    use super::*;

    /// Session whose remote side is a shell script speaking canned replies.
    fn scripted(script: &str) -> Session {
        Session::builder("vm")
            .launcher(Launcher::loopback())
            .remote_command(["sh", "-c", script])
            .config(Config {
                connect_timeout_secs: 5,
                read_timeout_secs: Some(5),
                close_timeout_secs: 1,
                ..Config::default()
            })
            .build()
            .unwrap()
    }

    /// Script prefix that swallows the bootstrap and reports readiness.
    const READY: &str = "while read -r l; do [ \"$l\" = '# end of qpipe bootstrap' ] && break; done; printf 'OK\\n'; ";

    #[test]
    fn operations_need_a_connection() {
        let mut session = scripted("exit 0");
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.exec(&["true"], b""), Err(Error::NotConnected)));
        assert!(matches!(session.fetch("/x", "/dev/null"), Err(Error::NotConnected)));
        session.close().unwrap();
        assert!(matches!(session.connect(), Err(Error::Closed)));
    }

    #[test]
    fn connect_fails_fast_when_remote_exits() {
        let mut session = scripted("exit 3");
        let err = session.connect().unwrap_err();
        assert!(matches!(err, Error::Setup { .. }), "{err:?}");
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn connect_rejects_wrong_marker() {
        let mut session = scripted("printf 'Traceback\\n'; sleep 5");
        assert!(matches!(session.connect(), Err(Error::Setup { .. })));
    }

    #[test]
    fn connect_times_out_without_marker() {
        let mut session = Session::builder("vm")
            .launcher(Launcher::loopback())
            .remote_command(["sh", "-c", "cat >/dev/null; sleep 5"])
            .config(Config {
                connect_timeout_secs: 1,
                ..Config::default()
            })
            .build()
            .unwrap();
        let started = Instant::now();
        let err = session.connect().unwrap_err();
        assert!(matches!(err, Error::Setup { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn connect_twice_and_close_twice() {
        let mut session = scripted(&format!("{READY}cat >/dev/null"));
        session.connect().unwrap();
        session.connect().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn empty_argv_is_rejected_locally() {
        let mut session = scripted(&format!("{READY}cat >/dev/null"));
        session.connect().unwrap();
        assert!(matches!(
            session.exec::<&str>(&[], b""),
            Err(Error::EmptyCommand)
        ));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn oversized_stdout_aborts_the_transport() {
        let script = format!("{READY}read -r req; printf 'Y\\n0\\n17\\n'; cat >/dev/null");
        let mut session = Session::builder("vm")
            .launcher(Launcher::loopback())
            .remote_command(["sh", "-c", script.as_str()])
            .config(Config {
                max_output: 16,
                ..Config::default()
            })
            .build()
            .unwrap();
        session.connect().unwrap();
        let err = session.exec(&["true"], b"").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::LengthOutOfRange { len: 17, max: 16 })
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn output_at_the_limit_is_accepted() {
        let script = format!("{READY}read -r req; printf 'Y\\n0\\n4\\nabcd0\\n'; cat >/dev/null");
        let mut session = Session::builder("vm")
            .launcher(Launcher::loopback())
            .remote_command(["sh", "-c", script.as_str()])
            .config(Config {
                max_output: 4,
                ..Config::default()
            })
            .build()
            .unwrap();
        session.connect().unwrap();
        let out = session.exec(&["x"], b"").unwrap();
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn remote_death_is_a_fatal_error() {
        let mut session = scripted(&format!("{READY}read -r req; exit 0"));
        session.connect().unwrap();
        let err = session.exec(&["true"], b"").unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
        assert!(matches!(session.exec(&["true"], b""), Err(Error::Closed)));
    }

    #[test]
    fn silent_remote_hits_read_timeout() {
        let mut session = scripted(&format!("{READY}read -r req; sleep 10"));
        session.config.read_timeout_secs = Some(1);
        session.connect().unwrap();
        assert!(matches!(session.exec(&["true"], b""), Err(Error::TimedOut)));
    }

    #[test]
    fn missing_local_file_does_not_touch_the_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = scripted(&format!("{READY}cat >/dev/null"));
        session.connect().unwrap();
        let err = session.put(dir.path().join("absent"), "/tmp/x").unwrap_err();
        assert!(matches!(err, Error::Local { .. }));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn directory_source_does_not_touch_the_remote() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen");
        let script = format!("{READY}cat >'{}'", seen.display());
        let mut session = scripted(&script);
        session.connect().unwrap();

        let err = session.put(dir.path(), "/tmp/x").unwrap_err();
        match err {
            Error::Local { source, .. } => assert_eq!(source.kind(), io::ErrorKind::IsADirectory),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Connected);
        session.close().unwrap();
        assert!(std::fs::read(&seen).unwrap().is_empty());
    }

    #[test]
    fn oversized_request_is_refused_locally() {
        let mut session = scripted(&format!("{READY}cat >/dev/null"));
        session.config.max_request = 64;
        session.connect().unwrap();

        let err = session.exec(&["cat"], &[b'x'; 64]).unwrap_err();
        assert!(matches!(err, Error::RequestTooLarge { max: 64, .. }), "{err:?}");
        assert!(!err.is_fatal());
        assert_eq!(session.state(), SessionState::Connected);
    }

    /// Connects to a remote that answers the first request with `reply`.
    fn answering(reply: &str) -> Session {
        let mut session = scripted(&format!("{READY}read -r req; printf '{reply}'; cat >/dev/null"));
        session.connect().unwrap();
        session
    }

    #[test]
    fn oversized_fetch_chunk_aborts_the_transport() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = answering(&format!("{}\\n", MAX_CHUNK + 1));
        let err = session.fetch("/etc/hosts", dir.path().join("out")).unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ProtocolError::LengthOutOfRange { .. })),
            "{err:?}"
        );
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn malformed_fetch_length_aborts_the_transport() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = answering("12ab\\n");
        let err = session.fetch("/etc/hosts", dir.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::BadLength(_))), "{err:?}");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn unexpected_put_ack_aborts_the_transport() {
        let mut src = tempfile::NamedTempFile::new().unwrap();
        src.write_all(b"payload").unwrap();
        let mut session = answering("X\\n");
        let err = session.put(src.path(), "/tmp/x").unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ProtocolError::UnexpectedFlag(_))),
            "{err:?}"
        );
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn events_go_to_the_injected_dispatch() {
        #[derive(Clone, Default)]
        struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let sink = captured.clone();
        let dispatch = Dispatch::new(
            tracing_subscriber::fmt()
                .with_writer(move || sink.clone())
                .with_max_level(tracing::Level::DEBUG)
                .with_ansi(false)
                .finish(),
        );

        let script = format!("{READY}cat >/dev/null");
        let mut session = Session::builder("vm")
            .launcher(Launcher::loopback())
            .remote_command(["sh", "-c", script.as_str()])
            .dispatch(dispatch)
            .build()
            .unwrap();
        session.connect().unwrap();
        session.close().unwrap();

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("session{vm=vm}"), "{logs}");
        assert!(logs.contains("connected"), "{logs}");
    }

    #[test]
    fn read_full_stops_at_eof() {
        let mut buf = [0; 8];
        let mut src = Cursor::new(b"abc".to_vec());
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 0);
    }
}
