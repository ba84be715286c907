//! Locating and invoking the one-shot launcher.
//!
//! The spawned command line is
//! `<launcher...> [--proxy=<relay>] <address> <remote-command...>`.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{Error, Result};

/// Launcher binary searched for when none is configured.
pub const DEFAULT_LAUNCHER: &str = "qrun";

/// Shell wrapper that runs the remote command locally, dropping the
/// `--proxy=` flag and the address.
const LOOPBACK_SCRIPT: &str = r#"case "$1" in --proxy=*) shift ;; esac; shift; exec "$@""#;

/// VM a session talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Address of the VM, possibly fully qualified (`work.example`).
    pub address: String,
    /// Management relay the launcher should go through.
    pub relay: Option<String>,
}

impl Target {
    /// Targets `address` directly.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            relay: None,
        }
    }

    /// Routes through `relay`.
    #[must_use]
    pub fn via(mut self, relay: impl Into<String>) -> Self {
        self.relay = Some(relay.into());
        self
    }

    /// Address handed to the launcher.
    ///
    /// A relay only knows VMs by their short name, so with a relay the
    /// address is cut at its first `.`.
    pub fn launch_address(&self) -> &str {
        match self.relay {
            Some(_) => self
                .address
                .split_once('.')
                .map_or(self.address.as_str(), |(short, _)| short),
            None => &self.address,
        }
    }
}

/// Launcher argv prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    /// Program followed by its fixed arguments. Never empty.
    argv: Vec<OsString>,
}

impl Launcher {
    /// Uses an explicit argv prefix.
    pub fn new<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(Error::Config("launcher must not be empty".into()));
        }
        Ok(Self { argv })
    }

    /// Finds [`DEFAULT_LAUNCHER`].
    ///
    /// Search order:
    /// 1. `$PATH` lookup.
    /// 2. Sibling of the current executable, for installs outside `$PATH`.
    pub fn discover() -> Result<Self> {
        let path_var = std::env::var_os("PATH");
        let exe = std::env::current_exe().ok();
        locate(DEFAULT_LAUNCHER, path_var.as_deref(), exe.as_deref())
            .map(|path| Self {
                argv: vec![path.into_os_string()],
            })
            .ok_or_else(|| Error::LauncherNotFound(DEFAULT_LAUNCHER.to_owned()))
    }

    /// Runs the remote command on this host through `sh`.
    pub fn loopback() -> Self {
        Self {
            argv: ["sh", "-c", LOOPBACK_SCRIPT, "qpipe-loopback"]
                .into_iter()
                .map(OsString::from)
                .collect(),
        }
    }

    /// Program name, for error messages.
    pub fn program(&self) -> String {
        self.argv[0].to_string_lossy().into_owned()
    }

    /// Builds the launch command for `target`.
    pub fn command(&self, target: &Target, remote: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        if let Some(relay) = &target.relay {
            let mut flag = OsString::from("--proxy=");
            flag.push(relay);
            cmd.arg(flag);
        }
        cmd.arg(OsStr::new(target.launch_address()));
        cmd.args(remote);
        cmd
    }
}

/// Looks for `name` on `path_var`, then next to `exe`.
fn locate(name: &str, path_var: Option<&OsStr>, exe: Option<&Path>) -> Option<PathBuf> {
    path_var
        .and_then(|paths| {
            std::env::split_paths(paths)
                .map(|dir| dir.join(name))
                .find(|p| p.is_file())
        })
        .or_else(|| {
            let sibling = exe?.with_file_name(name);
            sibling.is_file().then_some(sibling)
        })
}
