//! VM commands: exec, put, fetch, cp.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use qpipe::adapter::{CommandLine, Connection, HostOptions, VmConnection};
use qpipe::{Config, Launcher, bootstrap};
use tracing::Dispatch;

/// How to reach the VM; shared by every VM command.
#[derive(clap::Args)]
pub struct ConnectArgs {
    /// Launcher program (default: from config, else `qrun` next to this binary or in PATH).
    #[arg(long, global = true, value_name = "PROGRAM", conflicts_with = "loopback")]
    pub launcher: Option<String>,

    /// Management VM to relay through (default: $MANAGEMENT_PROXY).
    #[arg(long, global = true, value_name = "VM")]
    pub proxy: Option<String>,

    /// Run the remote side on this host instead of in a VM.
    #[arg(long, global = true)]
    pub loopback: bool,

    /// Use the native `qpipe-agent` instead of the Python bootstrap.
    #[arg(long, global = true)]
    pub native: bool,

    /// Give up when the remote side is silent for this many seconds.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl ConnectArgs {
    /// Opens a connection to `vm`, applying flag overrides on top of `config`.
    fn open(&self, vm: &str, mut config: Config, logs: Dispatch) -> Result<VmConnection> {
        if self.timeout.is_some() {
            config.read_timeout_secs = self.timeout;
        }
        let mut options = HostOptions::new(vm);
        options.management_proxy.clone_from(&self.proxy);

        let mut conn = VmConnection::new(options, config).with_dispatch(logs);
        if self.loopback {
            conn = conn.with_launcher(Launcher::loopback());
        } else if let Some(program) = &self.launcher {
            conn = conn.with_launcher(Launcher::new([program])?);
        }
        if self.native {
            conn = conn.with_remote_command(bootstrap::native_command());
        }
        conn.connect()
            .with_context(|| format!("connecting to {vm}"))?;
        Ok(conn)
    }
}

/// Arguments for `qpipe exec`.
///
/// Usage: `qpipe exec [OPTIONS] VM COMMAND [ARG...]`
#[derive(clap::Args)]
#[command(trailing_var_arg = true)]
pub struct ExecArgs {
    /// Forward this process's stdin to the command.
    #[arg(short = 'i', long)]
    pub stdin: bool,

    /// Split COMMAND into words with shell quoting rules; no shell is run.
    #[arg(short = 'l', long)]
    pub line: bool,

    /// Print code, stdout and stderr as one JSON object.
    #[arg(long)]
    pub json: bool,

    /// VM address.
    #[arg(required = true)]
    pub target: String,

    /// Command and arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for `qpipe put`.
#[derive(clap::Args)]
pub struct PutArgs {
    /// VM address.
    pub target: String,
    /// Local source file.
    pub local: PathBuf,
    /// Destination path inside the VM.
    pub remote: PathBuf,
}

/// Arguments for `qpipe fetch`.
#[derive(clap::Args)]
pub struct FetchArgs {
    /// VM address.
    pub target: String,
    /// Source path inside the VM.
    pub remote: PathBuf,
    /// Local destination file.
    pub local: PathBuf,
}

/// Arguments for `qpipe cp`.
#[derive(clap::Args)]
pub struct CpArgs {
    /// Source (host path or `<vm>:<path>`).
    pub src: String,

    /// Destination (host path or `<vm>:<path>`).
    pub dst: String,
}

pub fn exec(connect: &ConnectArgs, config: Config, logs: Dispatch, args: ExecArgs) -> Result<()> {
    let command = if args.line {
        CommandLine::Line(args.command.join(" "))
    } else {
        CommandLine::Argv(args.command.into_iter().map(String::into_bytes).collect())
    };
    let input = if args.stdin {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf).context("reading stdin")?;
        Some(buf)
    } else {
        None
    };

    let mut conn = connect.open(&args.target, config, logs)?;
    let output = conn.exec_command(&command, input.as_deref())?;
    conn.close()?;

    if args.json {
        let obj = serde_json::json!({
            "code": output.code,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        });
        println!("{}", serde_json::to_string_pretty(&obj)?);
    } else {
        io::stdout().write_all(&output.stdout)?;
        io::stdout().flush()?;
        io::stderr().write_all(&output.stderr)?;
    }

    if output.code != 0 {
        std::process::exit(output.code);
    }
    Ok(())
}

pub fn put(connect: &ConnectArgs, config: Config, logs: Dispatch, args: &PutArgs) -> Result<()> {
    let mut conn = connect.open(&args.target, config, logs)?;
    upload(&mut conn, &args.local, &args.remote)?;
    Ok(conn.close()?)
}

pub fn fetch(connect: &ConnectArgs, config: Config, logs: Dispatch, args: &FetchArgs) -> Result<()> {
    let mut conn = connect.open(&args.target, config, logs)?;
    download(&mut conn, &args.remote, &args.local)?;
    Ok(conn.close()?)
}

pub fn cp(connect: &ConnectArgs, config: Config, logs: Dispatch, args: &CpArgs) -> Result<()> {
    match (parse_vm_ref(&args.src), parse_vm_ref(&args.dst)) {
        // vm → host
        (Some((vm, remote)), None) => {
            let mut conn = connect.open(vm, config, logs)?;
            download(&mut conn, Path::new(remote), Path::new(&args.dst))?;
            Ok(conn.close()?)
        }
        // host → vm
        (None, Some((vm, remote))) => {
            let mut conn = connect.open(vm, config, logs)?;
            upload(&mut conn, Path::new(&args.src), Path::new(remote))?;
            Ok(conn.close()?)
        }
        _ => anyhow::bail!("exactly one of src/dst must use <vm>:<path> format"),
    }
}

fn upload(conn: &mut VmConnection, local: &Path, remote: &Path) -> Result<()> {
    conn.put_file(local, remote).with_context(|| {
        format!("copying {} to {}", local.display(), remote.display())
    })
}

fn download(conn: &mut VmConnection, remote: &Path, local: &Path) -> Result<()> {
    conn.fetch_file(remote, local).with_context(|| {
        format!("copying {} to {}", remote.display(), local.display())
    })
}

/// Parses a `vm:path` reference. Returns `(vm, path)`.
fn parse_vm_ref(s: &str) -> Option<(&str, &str)> {
    let colon = s.find(':')?;
    if colon == 0 || s[..colon].contains('/') {
        return None;
    }
    Some((&s[..colon], &s[colon + 1..]))
}
