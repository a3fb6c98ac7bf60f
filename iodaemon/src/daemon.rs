//! The core of the I/O daemon: binds a socket, prepares the child's stdio,
//! and runs the accept loop that hands out stdout/stderr/status fds and
//! relays link requests to stdin.
use std::io::Write;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio as ProcessStdio};
use std::thread;

use nix::sys::signal::{self, Signal as NixSignal};
use nix::unistd::Pid;

use crate::error::{DaemonError, Result};
use crate::pipe::Pipe;
use crate::protocol::read_request;
use crate::tty;

#[derive(Debug, Clone, Copy)]
pub struct WindowSize {
    pub columns: u16,
    pub rows: u16,
}

pub struct SpawnOptions {
    pub socket_path: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub tty: bool,
    pub window_size: WindowSize,
}

/// The fds the daemon hands to the child versus the ones it keeps for
/// itself. In pipe mode all six are distinct; in tty mode the child's three
/// fds collapse onto the tty slave and stdin_w/stdout_r collapse onto the
/// pty master.
struct StdioSet {
    child_stdin: RawFd,
    child_stdout: RawFd,
    child_stderr: RawFd,
    stdin_w: RawFd,
    stdout_r: RawFd,
    stderr_r: RawFd,
    /// The tty slave, for `TIOCSCTTY` in the child's `pre_exec`. `None` in
    /// pipe mode.
    ctty: Option<RawFd>,
}

fn setup_pipes() -> Result<StdioSet> {
    let (stdin_r, stdin_w) = Pipe::new()?.split();
    let (stdout_r, stdout_w) = Pipe::new()?.split();
    let (stderr_r, stderr_w) = Pipe::new()?.split();

    Ok(StdioSet {
        child_stdin: stdin_r.into_fd(),
        child_stdout: stdout_w.into_fd(),
        child_stderr: stderr_w.into_fd(),
        stdin_w: stdin_w.into_fd(),
        stdout_r: stdout_r.into_fd(),
        stderr_r: stderr_r.into_fd(),
        ctty: None,
    })
}

/// In tty mode stderr_r is an opened `/dev/null`, so a reader still observes
/// EOF on it rather than blocking forever.
fn setup_tty(window: &WindowSize) -> Result<StdioSet> {
    let pty = tty::open_pty()?;
    tty::set_window_size(pty.master, window.columns, window.rows)?;

    let dev_null = std::fs::File::open("/dev/null").map_err(DaemonError::OpenDevNull)?;

    Ok(StdioSet {
        child_stdin: pty.slave,
        child_stdout: pty.slave,
        child_stderr: pty.slave,
        stdin_w: pty.master,
        stdout_r: pty.master,
        stderr_r: dev_null.into_raw_fd(),
        ctty: Some(pty.slave),
    })
}

fn prepare_socket_path(path: &std::path::Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(DaemonError::RemoveStaleSocket {
                path: path.to_path_buf(),
                source,
            })
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| DaemonError::CreateSocketDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn spawn_child(opts: &SpawnOptions, stdio: &StdioSet) -> Result<std::process::Child> {
    let mut cmd = Command::new(&opts.program);
    cmd.args(&opts.args);
    unsafe {
        cmd.stdin(ProcessStdio::from_raw_fd(stdio.child_stdin));
        cmd.stdout(ProcessStdio::from_raw_fd(stdio.child_stdout));
        cmd.stderr(ProcessStdio::from_raw_fd(stdio.child_stderr));
    }

    let tty_mode = opts.tty;
    let ctty = stdio.ctty;
    let daemon_side_fds = [stdio.stdin_w, stdio.stdout_r, stdio.stderr_r];
    unsafe {
        cmd.pre_exec(move || {
            if tty_mode {
                nix::unistd::setsid().map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
                if let Some(slave) = ctty {
                    tty::set_controlling_terminal_in_child(slave)?;
                }
            }
            for fd in daemon_side_fds {
                libc::close(fd);
            }
            Ok(())
        });
    }

    cmd.spawn().map_err(|source| DaemonError::SpawnChild {
        path: opts.program.clone(),
        source,
    })
}

fn handle_link_requests(mut conn: UnixStream, stdin_w: RawFd, child_pid: Pid, tty_mode: bool) {
    loop {
        let request = match read_request(&mut conn) {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "closing connection after decode error");
                break;
            }
        };

        if let Some(window) = request.window_size {
            if let Err(err) = tty::set_window_size(stdin_w, window.cols, window.rows) {
                tracing::warn!(error = %err, "failed to set window size");
            }
            let _ = signal::kill(child_pid, NixSignal::SIGWINCH);
        } else if request.eof {
            unsafe {
                libc::fsync(stdin_w);
                libc::close(stdin_w);
            }
            if tty_mode {
                let _ = signal::kill(child_pid, NixSignal::SIGHUP);
            }
            break;
        } else if write_all(stdin_w, &request.data).is_err() {
            tracing::debug!("closing connection after write error");
            break;
        }
    }
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> std::io::Result<()> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}

/// Runs the daemon. Blocks forever accepting connections; `terminate` is
/// invoked exactly once, from a background thread, once the child exits.
/// Production callers pass `|code| std::process::exit(code)`; tests pass a
/// channel-backed closure so the accept loop can be driven without killing
/// the test process.
pub fn run(
    opts: SpawnOptions,
    mut notify: impl Write,
    terminate: impl Fn(i32) + Send + Clone + 'static,
) -> Result<()> {
    prepare_socket_path(&opts.socket_path)?;
    let listener = UnixListener::bind(&opts.socket_path).map_err(|source| DaemonError::Bind {
        path: opts.socket_path.clone(),
        source,
    })?;

    let stdio = if opts.tty {
        setup_tty(&opts.window_size)?
    } else {
        setup_pipes()?
    };

    let (status_r, status_w) = Pipe::new()?.split();
    let status_r_fd = status_r.into_fd();
    let mut status_w = Some(status_w);

    let _ = writeln!(notify, "ready");

    let mut child_pid: Option<Pid> = None;
    let tty_mode = opts.tty;

    loop {
        let (conn, _addr) = listener.accept().map_err(DaemonError::Accept)?;

        if let Err(err) = tty::send_fds(
            conn.as_raw_fd(),
            &[stdio.stdout_r, stdio.stderr_r, status_r_fd],
        ) {
            tracing::warn!(error = %err, "failed to send fds, closing connection");
            continue;
        }

        if child_pid.is_none() {
            let mut child = spawn_child(&opts, &stdio)?;
            child_pid = Some(Pid::from_raw(child.id() as i32));
            let _ = writeln!(notify, "active");

            let status_w_fd = status_w.take().expect("status pipe spawned only once").into_fd();
            let terminate = terminate.clone();
            thread::spawn(move || {
                let code = match child.wait() {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                let mut status_file = unsafe { std::fs::File::from_raw_fd(status_w_fd) };
                let _ = writeln!(status_file, "{code}");
                terminate(0);
            });
        }

        handle_link_requests(conn, stdio.stdin_w, child_pid.unwrap(), tty_mode);
    }
}
