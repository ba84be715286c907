//! Persistent command and file transport into isolated VMs.
//!
//! `qpipe` drives a VM through a narrow one-shot launcher: the launcher is
//! spawned once per [`Session`], a small interpreter-hosted program is fed
//! to it on startup ([`bootstrap`]), and from then on commands and file
//! transfers are pipelined over the launcher's stdin and stdout.
//!
//! # Quick start
//!
//! ```no_run
//! use qpipe::{Config, Session};
//!
//! let mut session = Session::builder("work")
//!     .config(Config::load_default()?)
//!     .build()?;
//! session.connect()?;
//!
//! let out = session.exec(&["sh", "-c", "echo yes"], b"")?;
//! assert_eq!(out.stdout, b"yes\n");
//!
//! session.fetch("/etc/hostname", "hostname.txt")?;
//! session.close()?;
//! # Ok::<(), qpipe::Error>(())
//! ```
//!
//! Automation frameworks use the [`adapter`] module instead, which
//! recreates the session after a fatal transport error.

pub mod adapter;
pub mod bootstrap;
mod config;
mod error;
mod launcher;
mod remote_path;
mod session;
mod timed;

pub use config::Config;
pub use error::{Error, Result};
pub use launcher::{DEFAULT_LAUNCHER, Launcher, Target};
pub use qpipe_proto::{ExecOutput, RemoteError, RemoteErrorKind};
pub use remote_path::normalize as normalize_remote_path;
pub use session::{Session, SessionBuilder, SessionState};
