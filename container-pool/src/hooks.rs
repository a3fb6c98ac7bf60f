//! Invocation of external lifecycle scripts (`setup.sh`, `create.sh`,
//! `destroy.sh`) and, via the same machinery, the reference filter's
//! `iptables` shell-outs: one code path for "run an external program with an
//! explicit environment and check its exit status."
use std::path::Path;
use std::process;
use std::time::Duration;
use std::{fmt, thread};

use nix::sys::signal;
use nix::unistd::Pid;

use crate::env::EnvironmentMap;

#[derive(Debug)]
pub struct HookTimeoutError;

impl std::error::Error for HookTimeoutError {}

impl fmt::Display for HookTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "hook command timed out".fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to execute {path:?}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?} exited with non-zero status {code}")]
    NonZeroExit { path: String, code: i32 },
    #[error("{path:?} was killed by a signal")]
    Killed { path: String },
    #[error("{path:?} timed out after {0:?}", .timeout)]
    Timeout { path: String, timeout: Duration },
    #[error("failed to wait on {path:?}: {source}")]
    Wait {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs `path args...` with exactly `env` as its environment (no inherited
/// variables), waits for it to exit, and treats a non-zero exit status or a
/// signal kill as failure. `timeout` is enforced from a background thread
/// since `std::process::Child` has no native wait-with-timeout.
pub fn run_script(
    path: &Path,
    args: &[String],
    env: &EnvironmentMap,
    timeout: Option<Duration>,
) -> Result<(), HookError> {
    let path_str = path.display().to_string();

    let mut command = process::Command::new(path);
    command.args(args).env_clear();
    for (key, value) in env.iter() {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|source| HookError::Spawn {
        path: path_str.clone(),
        source,
    })?;
    let child_pid = Pid::from_raw(child.id() as i32);

    let status = match timeout {
        Some(timeout) => {
            let (tx, rx) = crossbeam_channel::unbounded();
            thread::spawn(move || {
                let result = child.wait();
                let _ = tx.send(result);
            });
            match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    let _ = signal::kill(child_pid, signal::Signal::SIGKILL);
                    return Err(HookError::Timeout {
                        path: path_str,
                        timeout,
                    });
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    unreachable!("wait thread always sends before exiting")
                }
            }
        }
        None => child.wait(),
    };

    let status = status.map_err(|source| HookError::Wait {
        path: path_str.clone(),
        source,
    })?;

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(HookError::NonZeroExit { path: path_str, code }),
        None => Err(HookError::Killed { path: path_str }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;

    fn script(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(
            &path,
            std::os::unix::fs::PermissionsExt::from_mode(0o755),
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    #[serial]
    fn succeeds_on_zero_exit() {
        let (_dir, path) = script("exit 0");
        run_script(&path, &[], &EnvironmentMap::new(), None).unwrap();
    }

    #[test]
    #[serial]
    fn fails_on_non_zero_exit() {
        let (_dir, path) = script("exit 7");
        let err = run_script(&path, &[], &EnvironmentMap::new(), None).unwrap_err();
        assert!(matches!(err, HookError::NonZeroExit { code: 7, .. }));
    }

    #[test]
    #[serial]
    fn passes_exactly_the_given_environment() {
        let (dir, path) = script("env > \"$OUT_FILE\"");
        let out_file = dir.path().join("out");
        let mut env = EnvironmentMap::new();
        env.insert("OUT_FILE", out_file.to_str().unwrap());
        env.insert("FOO", "bar");
        run_script(&path, &[], &env, None).unwrap();

        let captured = std::fs::read_to_string(&out_file).unwrap();
        assert!(captured.contains("FOO=bar"));
        assert!(!captured.contains("PATH="));
    }

    #[test]
    #[serial]
    fn kills_and_errors_on_timeout() {
        let (_dir, path) = script("sleep 5");
        let err = run_script(&path, &[], &EnvironmentMap::new(), Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, HookError::Timeout { .. }));
    }
}
