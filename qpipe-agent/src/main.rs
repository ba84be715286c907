//! qpipe agent: the remote end of a qpipe session, without Python.
//!
//! Started by the launcher inside the VM in place of `python3`. It reads the
//! bootstrap payload from stdin (checking its version header), prints the
//! readiness marker and then serves `execute`, `receive_file` and
//! `send_file` requests until stdin is closed.
//!
//! Logs go to stderr, filtered by `QPIPE_AGENT_LOG` (default `warn`).

mod exec;
mod files;
mod serve;

use std::io::{self, BufWriter};
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "QPIPE_AGENT_LOG";

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut stdin = io::stdin().lock();
        let mut stdout = BufWriter::new(io::stdout().lock());
        match serve::run(&mut stdin, &mut stdout) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::from(2)
            }
        }
    })
}
