//! Session configuration.
//!
//! Stored as JSON at `<config dir>/qpipe/config.json`. Every field is
//! optional; a missing file yields [`Config::default`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use qpipe_proto::{MAX_CHUNK, MAX_OUTPUT, MAX_REQUEST};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tunables shared by the library and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct Config {
    /// Launcher argv prefix. `None` searches for `qrun`.
    pub launcher: Option<Vec<String>>,
    /// Remote command. `None` runs the Python bootstrap.
    pub remote_command: Option<Vec<String>>,
    /// Relay VM used when the target is managed through a proxy.
    pub management_proxy: Option<String>,
    /// Chunk size for `put` and the size requested from `send_file`.
    pub chunk_size: usize,
    /// Largest transfer chunk or exception field accepted from the remote.
    pub max_chunk: usize,
    /// Largest stdout or stderr accepted from `exec`.
    pub max_output: usize,
    /// Largest encoded request line sent to the remote, `exec` input included.
    pub max_request: usize,
    /// Seconds to wait for the readiness marker.
    pub connect_timeout_secs: u64,
    /// Seconds to wait for any later reply. `None` waits forever.
    pub read_timeout_secs: Option<u64>,
    /// Seconds to wait for the remote process to exit on close.
    pub close_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            launcher: None,
            remote_command: None,
            management_proxy: None,
            chunk_size: MAX_CHUNK,
            max_chunk: MAX_CHUNK,
            max_output: MAX_OUTPUT,
            max_request: MAX_REQUEST,
            connect_timeout_secs: 30,
            read_timeout_secs: None,
            close_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("qpipe").join("config.json"))
    }

    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(|source| Error::Local {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_reader(io::BufReader::new(file))
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at [`Config::default_path`], or the defaults if it does not exist.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Checks that the limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk == 0 || self.max_chunk > MAX_CHUNK {
            return Err(Error::Config(format!(
                "max_chunk must be in 1..={MAX_CHUNK}, got {}",
                self.max_chunk
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > self.max_chunk {
            return Err(Error::Config(format!(
                "chunk_size must be in 1..={}, got {}",
                self.max_chunk, self.chunk_size
            )));
        }
        if self.max_output > MAX_OUTPUT {
            return Err(Error::Config(format!(
                "max_output must not exceed {MAX_OUTPUT}, got {}",
                self.max_output
            )));
        }
        if self.max_request == 0 || self.max_request > MAX_REQUEST {
            return Err(Error::Config(format!(
                "max_request must be in 1..={MAX_REQUEST}, got {}",
                self.max_request
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config("connect_timeout_secs must be positive".into()));
        }
        if matches!(self.launcher.as_deref(), Some([])) {
            return Err(Error::Config("launcher must not be empty".into()));
        }
        if matches!(self.remote_command.as_deref(), Some([])) {
            return Err(Error::Config("remote_command must not be empty".into()));
        }
        Ok(())
    }

    /// Handshake deadline.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-reply deadline, if any.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    /// Grace period before the remote process is killed on close.
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}
