//! Automation-framework connection plugin over [`Session`].
//!
//! Frameworks drive hosts through a small run-command / upload / download
//! interface ([`Connection`]). [`VmConnection`] implements it for one VM,
//! creating the session lazily and replacing it after a fatal error.

use std::ffi::OsString;
use std::path::Path;

use qpipe_proto::ExecOutput;
use tracing::{Dispatch, debug};

use crate::launcher::Target;
use crate::session::SessionState;
use crate::{Config, Error, Launcher, Result, Session};

/// Environment variable naming the default management relay.
pub const MANAGEMENT_PROXY_ENV: &str = "MANAGEMENT_PROXY";

/// Framework-facing connection interface.
pub trait Connection {
    /// Opens the connection if it is not open yet.
    fn connect(&mut self) -> Result<()>;

    /// Runs `cmd`, feeding `in_data` to its stdin.
    fn exec_command(&mut self, cmd: &CommandLine, in_data: Option<&[u8]>) -> Result<ExecOutput>;

    /// Uploads the local `in_path` to the remote `out_path`.
    fn put_file(&mut self, in_path: &Path, out_path: &Path) -> Result<()>;

    /// Downloads the remote `in_path` to the local `out_path`.
    fn fetch_file(&mut self, in_path: &Path, out_path: &Path) -> Result<()>;

    /// Closes the connection.
    fn close(&mut self) -> Result<()>;
}

/// A command as handed over by the framework.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandLine {
    /// Program and arguments, run directly.
    Argv(Vec<Vec<u8>>),
    /// One string, split into words with POSIX shell quoting rules.
    ///
    /// No shell is involved remotely: `;`, `|` and `$VAR` are plain text.
    Line(String),
}

impl CommandLine {
    /// Argument vector sent to the remote `execute` primitive.
    pub fn argv(&self) -> Result<Vec<Vec<u8>>> {
        match self {
            Self::Argv(argv) => Ok(argv.clone()),
            Self::Line(line) => shlex::split(line)
                .map(|words| words.into_iter().map(String::into_bytes).collect())
                .ok_or_else(|| Error::BadCommandLine(line.clone())),
        }
    }
}

/// Per-host settings provided by the framework inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct HostOptions {
    /// VM address.
    pub remote_addr: String,
    /// Relay VM; falls back to `$MANAGEMENT_PROXY`.
    pub management_proxy: Option<String>,
    /// Set when the task is delegated to another host.
    pub delegated: bool,
}

impl HostOptions {
    /// Options for `remote_addr` with no relay.
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            ..Self::default()
        }
    }

    /// Sets the relay.
    #[must_use]
    pub fn management_proxy(mut self, relay: impl Into<String>) -> Self {
        self.management_proxy = Some(relay.into());
        self
    }

    /// Marks the task as delegated.
    #[must_use]
    pub const fn delegated(mut self, delegated: bool) -> Self {
        self.delegated = delegated;
        self
    }

    /// Resolves the session target, reading `$MANAGEMENT_PROXY` if needed.
    pub fn target(&self) -> Target {
        self.target_with(std::env::var(MANAGEMENT_PROXY_ENV).ok())
    }

    /// Resolves the session target with an explicit environment fallback.
    ///
    /// Delegated tasks already run on the relay, so the relay is dropped.
    fn target_with(&self, env_proxy: Option<String>) -> Target {
        let target = Target::new(&self.remote_addr);
        if self.delegated {
            return target;
        }
        match self
            .management_proxy
            .clone()
            .or(env_proxy)
            .filter(|p| !p.is_empty())
        {
            Some(relay) => target.via(relay),
            None => target,
        }
    }
}

/// [`Connection`] to one VM.
#[derive(Debug)]
pub struct VmConnection {
    /// Inventory settings.
    options: HostOptions,
    /// Limits and defaults for every session.
    config: Config,
    /// Launcher override.
    launcher: Option<Launcher>,
    /// Remote command override.
    remote_command: Option<Vec<OsString>>,
    /// Subscriber handed to every session.
    dispatch: Option<Dispatch>,
    /// Current session, if one was created.
    session: Option<Session>,
}

impl VmConnection {
    /// Creates an unconnected plugin instance.
    ///
    /// `options.management_proxy` falls back to `config.management_proxy`.
    pub fn new(mut options: HostOptions, config: Config) -> Self {
        if options.management_proxy.is_none() {
            options.management_proxy.clone_from(&config.management_proxy);
        }
        Self {
            options,
            config,
            launcher: None,
            remote_command: None,
            dispatch: None,
            session: None,
        }
    }

    /// Overrides the launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Overrides the remote command.
    #[must_use]
    pub fn with_remote_command(mut self, argv: Vec<OsString>) -> Self {
        self.remote_command = Some(argv);
        self
    }

    /// Routes session events to `dispatch`.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// State of the current session, if any.
    pub fn state(&self) -> Option<SessionState> {
        self.session.as_ref().map(Session::state)
    }

    /// Returns a connected session, replacing a closed one.
    fn session(&mut self) -> Result<&mut Session> {
        if self.state() != Some(SessionState::Connected) {
            if let Some(old) = self.session.take() {
                debug!(state = ?old.state(), "replacing session");
            }
            let fresh = self.build()?;
            let session = self.session.insert(fresh);
            session.connect()?;
            return Ok(session);
        }
        self.session.as_mut().ok_or(Error::NotConnected)
    }

    /// Builds a fresh session from the stored settings.
    fn build(&self) -> Result<Session> {
        let target = self.options.target();
        let mut builder = Session::builder(target.address).config(self.config.clone());
        if let Some(relay) = target.relay {
            builder = builder.relay(relay);
        }
        if let Some(launcher) = &self.launcher {
            builder = builder.launcher(launcher.clone());
        }
        if let Some(argv) = &self.remote_command {
            builder = builder.remote_command(argv.clone());
        }
        if let Some(dispatch) = &self.dispatch {
            builder = builder.dispatch(dispatch.clone());
        }
        builder.build()
    }
}

impl Connection for VmConnection {
    fn connect(&mut self) -> Result<()> {
        self.session().map(|_| ())
    }

    fn exec_command(&mut self, cmd: &CommandLine, in_data: Option<&[u8]>) -> Result<ExecOutput> {
        let argv = cmd.argv()?;
        self.session()?.exec(&argv, in_data.unwrap_or_default())
    }

    fn put_file(&mut self, in_path: &Path, out_path: &Path) -> Result<()> {
        self.session()?.put(in_path, out_path).map(|_| ())
    }

    fn fetch_file(&mut self, in_path: &Path, out_path: &Path) -> Result<()> {
        self.session()?.fetch(in_path, out_path).map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        self.session.take().map_or(Ok(()), |mut s| s.close())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_like_a_shell_without_running_one() {
        let cmd = CommandLine::Line("echo 'a;b' c;d \"$HOME x\"".into());
        assert_eq!(
            cmd.argv().unwrap(),
            vec![
                b"echo".to_vec(),
                b"a;b".to_vec(),
                b"c;d".to_vec(),
                b"$HOME x".to_vec()
            ]
        );
        let argv = CommandLine::Argv(vec![b"ls".to_vec()]);
        assert_eq!(argv.argv().unwrap(), vec![b"ls".to_vec()]);
        assert!(CommandLine::Line("   ".into()).argv().unwrap().is_empty());
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let err = CommandLine::Line("echo 'oops".into()).argv().unwrap_err();
        assert!(matches!(err, Error::BadCommandLine(ref line) if line == "echo 'oops"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn proxy_resolution_order() {
        let opts = HostOptions::new("work.lan");
        assert_eq!(opts.target_with(None), Target::new("work.lan"));
        assert_eq!(
            opts.target_with(Some("env-relay".into())),
            Target::new("work.lan").via("env-relay")
        );
        assert_eq!(opts.target_with(Some(String::new())), Target::new("work.lan"));

        let opts = HostOptions::new("work.lan").management_proxy("mgmt");
        assert_eq!(
            opts.target_with(Some("env-relay".into())),
            Target::new("work.lan").via("mgmt")
        );
    }

    #[test]
    fn delegated_tasks_ignore_the_proxy() {
        let opts = HostOptions::new("work.lan")
            .management_proxy("mgmt")
            .delegated(true);
        assert_eq!(opts.target_with(Some("env".into())), Target::new("work.lan"));
    }

    #[test]
    fn config_relay_is_a_fallback() {
        let config = Config {
            management_proxy: Some("cfg-relay".into()),
            ..Config::default()
        };
        let conn = VmConnection::new(HostOptions::new("vm"), config.clone());
        assert_eq!(conn.options.management_proxy.as_deref(), Some("cfg-relay"));

        let conn = VmConnection::new(HostOptions::new("vm").management_proxy("mine"), config);
        assert_eq!(conn.options.management_proxy.as_deref(), Some("mine"));
        assert_eq!(conn.state(), None);
    }

    #[test]
    fn close_without_session_is_a_no_op() {
        let mut conn = VmConnection::new(HostOptions::new("vm"), Config::default());
        conn.close().unwrap();
    }
}
