//! CLI for running commands and copying files inside isolated VMs.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod vm;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use qpipe::Config;
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "QPIPE_LOG";

#[derive(Parser)]
#[command(
    name = "qpipe",
    version,
    about = "Run commands and copy files inside isolated VMs"
)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: <config dir>/qpipe/config.json).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    connect: vm::ConnectArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a command in a VM.
    Exec(vm::ExecArgs),

    /// Copy a local file into a VM.
    Put(vm::PutArgs),

    /// Copy a file out of a VM.
    Fetch(vm::FetchArgs),

    /// Copy a file between the host and a VM.
    ///
    /// Use `<vm>:<path>` to refer to a path inside the VM.
    Cp(vm::CpArgs),

    /// Print the remote bootstrap program.
    Bootstrap {
        /// Print its SHA-256 digest instead.
        #[arg(long)]
        digest: bool,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        let logs = log_dispatch(self.verbose);
        let load_config = || -> Result<Config> {
            let config = match &self.config {
                Some(path) => Config::load(path),
                None => Config::load_default(),
            };
            config.context("loading configuration")
        };

        match self.command {
            Command::Exec(args) => vm::exec(&self.connect, load_config()?, logs, args),
            Command::Put(args) => vm::put(&self.connect, load_config()?, logs, &args),
            Command::Fetch(args) => vm::fetch(&self.connect, load_config()?, logs, &args),
            Command::Cp(args) => vm::cp(&self.connect, load_config()?, logs, &args),
            Command::Bootstrap { digest } => {
                let mut out = io::stdout().lock();
                if digest {
                    writeln!(out, "{}", qpipe::bootstrap::digest())?;
                } else {
                    out.write_all(qpipe::bootstrap::payload().as_bytes())?;
                }
                Ok(())
            }
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "qpipe", &mut io::stdout());
                Ok(())
            }
        }
    }
}

/// Builds the stderr subscriber handed to sessions.
fn log_dispatch(verbose: u8) -> Dispatch {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    Dispatch::new(
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .finish(),
    )
}

fn main() {
    if let Err(e) = Cli::parse().dispatch() {
        eprintln!("qpipe: {e:#}");
        std::process::exit(1);
    }
}
