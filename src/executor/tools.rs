//! Narrow wrappers around the external tools the harness consumes as black
//! boxes: the diff utility, version control and the debugger. Also the
//! subprocess supervision shared by every invocation.
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
    time,
};
use tracing::{debug, warn};

use super::pool::CancelToken;
use crate::errors::UnitsError;

/// Exit code recorded for a run that hit its deadline.
pub const TIMEOUT_EXIT: i32 = 124;

/// Locate `cmd` on `PATH`. Paths containing a separator are checked as is.
pub fn which(cmd: &str) -> Option<PathBuf> {
    let is_exec = |p: &Path| p.is_file();
    if cmd.contains('/') {
        return Some(PathBuf::from(cmd)).filter(|p| is_exec(p));
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(cmd))
        .find(|p| is_exec(p))
}

/// Fail with an environment error when `cmd` cannot be found.
pub fn check_availability(cmd: &str) -> Result<(), UnitsError> {
    match which(cmd) {
        Some(_) => Ok(()),
        None => Err(UnitsError::MissingTool(cmd.to_string())),
    }
}

/// How a supervised child ended.
#[derive(Debug)]
pub enum Exit {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Shell-style exit code: the process exit code, or 128 plus the signal
/// number for a process killed by a signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Was the process killed by a signal?
pub fn signaled(status: &ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().is_some()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        false
    }
}

/// Put the child in its own process group so that it and everything it
/// spawns can be killed together.
pub fn isolate(mut cmd: std::process::Command) -> Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let mut cmd = Command::from(cmd);
    cmd.kill_on_drop(true);
    cmd
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill(2) on a process group we created.
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    if let Err(err) = child.kill().await {
        debug!("kill: {}", err);
    }
}

/// Wait for `child`, killing it when the deadline passes or `cancel` trips.
pub async fn supervise(
    child: &mut Child,
    deadline: Option<Duration>,
    cancel: &mut CancelToken,
) -> io::Result<Exit> {
    let sleep = async {
        match deadline {
            Some(deadline) => time::sleep(deadline).await,
            None => futures::future::pending::<()>().await,
        }
    };
    tokio::select! {
        status = child.wait() => Ok(Exit::Exited(status?)),
        _ = sleep => {
            terminate(child).await;
            Ok(Exit::TimedOut)
        }
        _ = cancel.cancelled() => {
            terminate(child).await;
            Ok(Exit::Cancelled)
        }
    }
}

/// Output of a child run with captured streams.
#[derive(Debug)]
pub struct Captured {
    pub exit: Exit,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    /// Exit code, if the child exited on its own.
    pub fn code(&self) -> Option<i32> {
        match &self.exit {
            Exit::Exited(status) => Some(exit_code(status)),
            _ => None,
        }
    }
}

/// Run `cmd` to completion capturing stdout and stderr in memory.
pub async fn capture(
    cmd: std::process::Command,
    deadline: Option<Duration>,
    cancel: &mut CancelToken,
) -> io::Result<Captured> {
    let mut cmd = isolate(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let mut out = child.stdout.take();
    let mut err = child.stderr.take();
    let stdout = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(out) = out.as_mut() {
            out.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(buf)
    });
    let stderr = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(err) = err.as_mut() {
            err.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(buf)
    });

    let exit = supervise(&mut child, deadline, cancel).await?;
    let join = |r: Result<io::Result<Vec<u8>>, tokio::task::JoinError>| {
        r.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    };
    Ok(Captured {
        exit,
        stdout: join(stdout.await)?,
        stderr: join(stderr.await)?,
    })
}

/// Compare two files with the external diff utility, writing its output to
/// `out`. Returns true when diff reports no differences.
pub async fn diff(
    args: &[&str],
    left: &Path,
    right: &Path,
    out: &Path,
) -> Result<bool, UnitsError> {
    let sink = File::create(out).map_err(UnitsError::at(out))?;
    let errors = sink.try_clone().map_err(UnitsError::at(out))?;
    let status = Command::new("diff")
        .args(args)
        .arg(left)
        .arg(right)
        .stdin(Stdio::null())
        .stdout(sink)
        .stderr(errors)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(UnitsError::at("diff"))?;
    Ok(status.success())
}

/// Byte comparison of two files; false if either is missing.
pub fn same_contents(a: &Path, b: &Path) -> bool {
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Is `path` known to version control? Unknown when git is unavailable,
/// which counts as known.
pub async fn tracked_by_git(path: &Path) -> bool {
    if which("git").is_none() {
        return true;
    }
    match Command::new("git")
        .arg("ls-files")
        .arg("--")
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(out) => !out.stdout.is_empty(),
        Err(err) => {
            warn!("git ls-files: {}", err);
            true
        }
    }
}

/// Best effort: write a debugger backtrace for every core file into
/// `dest`. Failures are logged and otherwise ignored.
pub async fn write_backtraces(program: &Path, cores: &[PathBuf], dest: &Path) {
    if which("gdb").is_none() {
        debug!("gdb not available, no backtraces");
        return;
    }
    let mut buf = Vec::new();
    for core in cores {
        match Command::new("gdb")
            .arg(program)
            .arg("-c")
            .arg(core)
            .args(["-ex", "where", "-batch"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(out) => buf.extend_from_slice(&out.stdout),
            Err(err) => warn!(core = %core.display(), "gdb: {}", err),
        }
    }
    if let Err(err) = std::fs::write(dest, buf) {
        warn!(dest = %dest.display(), "writing backtrace: {}", err);
    }
}
