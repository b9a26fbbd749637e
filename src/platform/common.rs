use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically replace `path` with `content`
///
/// Writes a sibling temp file, syncs it, then renames over the target so a
/// crash leaves either the old file or the new one.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    write_and_rename(path, content, None)
}

/// Like [`atomic_write`], but the file has `mode` before any content lands
/// in it (Unix only)
pub fn atomic_write_with_mode(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    write_and_rename(path, content, Some(mode))
}

fn write_and_rename(path: &Path, content: &[u8], mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let temp_path = temp_path_for(path);

    {
        let mut file = create_temp(&temp_path, mode).with_context(|| {
            format!("Failed to create temporary file: {}", temp_path.display())
        })?;

        file.write_all(content)
            .context("Failed to write to temporary file")?;

        file.sync_all().context("Failed to sync file to disk")?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

fn create_temp(temp_path: &Path, mode: Option<u32>) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        options.mode(mode);
        let file = options.open(temp_path)?;
        // A leftover temp file keeps its old mode
        file.set_permissions(std::fs::Permissions::from_mode(mode))?;
        return Ok(file);
    }

    #[cfg(not(unix))]
    let _ = mode;

    options.open(temp_path)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Create a directory and its parents if missing
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }

    Ok(())
}
