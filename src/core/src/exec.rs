//! Process helpers: replacing the current image and detached spawning.

use std::convert::Infallible;
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Result, TrdlError};
use crate::fs::create_dir_all;

/// Run `path` with `args` in place of the current process.
///
/// On Unix the process image is replaced and this only returns on failure.
/// Elsewhere the child runs with inherited stdio and the current process
/// exits with the child's code.
pub fn exec<S: AsRef<OsStr>>(path: &Path, args: &[S]) -> Result<Infallible> {
    let mut cmd = Command::new(path);
    cmd.args(args);
    tracing::debug!(path = %path.display(), "Executing binary");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = cmd.exec();
        Err(TrdlError::Io(std::io::Error::new(
            err.kind(),
            format!("failed to exec {}: {}", path.display(), err),
        )))
    }

    #[cfg(not(unix))]
    {
        let status = cmd.status().map_err(|e| {
            TrdlError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to run {}: {}", path.display(), e),
            ))
        })?;
        std::process::exit(status.code().unwrap_or(1));
    }
}

/// Start `program` detached from the current process with stdout and stderr
/// redirected to the given files, or discarded when no file is given.
/// Returns the child pid without waiting.
pub fn spawn_detached<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    stdout_path: Option<&Path>,
    stderr_path: Option<&Path>,
) -> Result<u32> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(log_stdio(stdout_path)?)
        .stderr(log_stdio(stderr_path)?);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd.spawn().map_err(|e| {
        TrdlError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to start {}: {}", program.display(), e),
        ))
    })?;

    let pid = child.id();
    tracing::debug!(pid, program = %program.display(), "Detached process started");
    Ok(pid)
}

fn log_stdio(path: Option<&Path>) -> Result<Stdio> {
    match path {
        Some(path) => Ok(Stdio::from(create_log_file(path)?)),
        None => Ok(Stdio::null()),
    }
}

fn create_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    File::create(path).map_err(|e| {
        TrdlError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create {}: {}", path.display(), e),
        ))
    })
}
