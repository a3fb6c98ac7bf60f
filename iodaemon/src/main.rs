//! # iodaemon
//! Stdio multiplexing daemon: supervises a child process and exposes its
//! stdout, stderr and exit status over a UNIX socket via file-descriptor
//! passing, so a detached client can attach, detach, resize a pty, and
//! observe exit independently of whatever spawned this daemon.
mod daemon;
mod error;
mod logger;
mod pipe;
mod protocol;
mod tty;

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use clap::Parser;

use crate::daemon::{SpawnOptions, WindowSize};

#[derive(Parser, Debug)]
#[clap(version, author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Spawn a subprocess, making its stdio and exit status available via
    /// the given socket.
    Spawn(Spawn),
}

#[derive(Parser, Debug)]
struct Spawn {
    /// Time to wait on an initial link before giving up.
    // TODO: timeout is parsed but not yet enforced, matching upstream.
    #[clap(long, default_value = "10")]
    timeout: u64,

    /// Spawn the child process with a pty instead of plain pipes.
    #[clap(long)]
    tty: bool,

    /// Initial window columns for the child's tty.
    #[clap(long, default_value = "80")]
    window_columns: u16,

    /// Initial window rows for the child's tty.
    #[clap(long, default_value = "24")]
    window_rows: u16,

    /// Emit a `strace` of this process beside the socket, as `<socket>.trace`.
    #[clap(long)]
    debug: bool,

    /// Path of the UNIX socket to bind and hand out fds over.
    socket: PathBuf,

    /// Path of the program to spawn.
    path: PathBuf,

    /// Arguments to pass to the spawned program.
    args: Vec<String>,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    match opts.subcmd {
        SubCommand::Spawn(spawn) => run_spawn(spawn),
    }
}

fn run_spawn(spawn: Spawn) -> Result<()> {
    if let Err(err) = crate::logger::init(spawn.debug) {
        eprintln!("log init failed: {err:?}");
    }

    if spawn.debug {
        enable_tracing(&spawn.socket).context("failed to start strace")?;
    }

    tracing::debug!(
        socket = %spawn.socket.display(),
        path = %spawn.path.display(),
        tty = spawn.tty,
        "starting iodaemon",
    );

    let opts = SpawnOptions {
        socket_path: spawn.socket,
        program: spawn.path,
        args: spawn.args,
        tty: spawn.tty,
        window_size: WindowSize {
            columns: spawn.window_columns,
            rows: spawn.window_rows,
        },
    };

    daemon::run(opts, std::io::stdout(), |code| std::process::exit(code))
        .context("io daemon exited with an error")
}

/// Starts `strace -f -s 10240 -p <self>`, writing to `<socket>.trace`.
fn enable_tracing(socket_path: &std::path::Path) -> Result<()> {
    let mut trace_path = socket_path.as_os_str().to_owned();
    trace_path.push(".trace");
    let trace_out = std::fs::File::create(trace_path).context("failed to create trace file")?;

    Command::new("strace")
        .arg("-f")
        .arg("-s")
        .arg("10240")
        .arg("-p")
        .arg(std::process::id().to_string())
        .stdout(trace_out.try_clone().context("failed to dup trace file")?)
        .stderr(trace_out)
        .spawn()
        .context("failed to spawn strace")?;

    Ok(())
}
