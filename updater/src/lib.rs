//! Replace the running trdl executable with a freshly downloaded build.
//!
//! The new binary is copied next to the target and renamed over it, so the
//! target path always holds a complete executable.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Resolved path of the running executable.
pub fn current_executable() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the running executable")?;
    fs::canonicalize(&exe).with_context(|| format!("failed to resolve {}", exe.display()))
}

/// Replace `target` with a copy of `new_binary`, keeping the permissions of
/// `target`.
pub fn replace_executable(target: &Path, new_binary: &Path) -> Result<()> {
    if !new_binary.is_file() {
        bail!("new binary {} not found", new_binary.display());
    }

    let permissions = match fs::metadata(target) {
        Ok(meta) => Some(meta.permissions()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("failed to stat {}", target.display())),
    };

    let staged = sibling(target, "new");
    fs::copy(new_binary, &staged).with_context(|| {
        format!("failed to copy {} to {}", new_binary.display(), staged.display())
    })?;
    if let Err(e) = set_permissions(&staged, permissions) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    if let Err(e) = swap(&staged, target) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    tracing::debug!(target = %target.display(), "Executable replaced");
    Ok(())
}

fn set_permissions(path: &Path, permissions: Option<fs::Permissions>) -> Result<()> {
    let permissions = match permissions {
        Some(p) => p,
        None => default_permissions(path)?,
    };
    fs::set_permissions(path, permissions)
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(unix)]
fn default_permissions(_path: &Path) -> Result<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn default_permissions(path: &Path) -> Result<fs::Permissions> {
    Ok(fs::metadata(path)?.permissions())
}

#[cfg(not(windows))]
fn swap(staged: &Path, target: &Path) -> Result<()> {
    fs::rename(staged, target)
        .with_context(|| format!("failed to move {} to {}", staged.display(), target.display()))
}

/// A running executable cannot be overwritten on Windows, but it can be
/// renamed.
#[cfg(windows)]
fn swap(staged: &Path, target: &Path) -> Result<()> {
    let old = sibling(target, "old");
    let _ = fs::remove_file(&old);

    let had_target = target.exists();
    if had_target {
        fs::rename(target, &old)
            .with_context(|| format!("failed to move {} aside", target.display()))?;
    }
    if let Err(e) = fs::rename(staged, target) {
        if had_target {
            let _ = fs::rename(&old, target);
        }
        return Err(e)
            .with_context(|| format!("failed to move {} to {}", staged.display(), target.display()));
    }
    Ok(())
}

/// `<target>.<ext>` in the same directory.
fn sibling(target: &Path, ext: &str) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ext);
    target.with_file_name(name)
}
