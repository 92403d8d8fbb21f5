//! Crash-safe file persistence
//!
//! The config holds secret key material, so it is never written in place:
//! 1. Create a sibling temp file (`.config.json.tmp.XXXX`) with the final mode
//! 2. Write, flush and fsync it
//! 3. Atomically rename it over the target, then fsync the directory
//!
//! A reader sees either the old document or the new one. Any failure before
//! the rename drops the temp file, which removes it from disk.
//!
//! Load-generate-persist sequences across processes are serialized with an
//! advisory `flock` on a sibling `<file>.lock`.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Owner read/write only
pub const FILE_MODE: u32 = 0o600;

/// Owner rwx, others may traverse
pub const DIR_MODE: u32 = 0o755;

/// Write `contents` to `path` atomically with permission bits `mode`.
pub fn write_file_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let dir = parent_dir(path);
    let base = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    let prefix = format!(".{}.tmp.", base.to_string_lossy());
    let mut tmp = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)?;

    set_mode(tmp.as_file(), mode)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)?;

    debug!(path = %path.display(), bytes = contents.len(), "wrote file atomically");
    Ok(())
}

/// Create the parent directory of `path` (and its ancestors) with [`DIR_MODE`].
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    let dir = parent_dir(path);
    if dir.exists() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir)
}

/// Sibling lock file for `path`, e.g. `config.json.lock`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// RAII exclusive advisory lock, released on drop
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is held. Creates the file if needed.
    #[cfg(unix)]
    pub fn exclusive(path: &Path) -> io::Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(FILE_MODE)
            .open(path)?;

        // Try non-blocking first so contention shows up in the logs
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }

            debug!(path = %path.display(), "waiting for config lock");
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if result != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[cfg(not(unix))]
    pub fn exclusive(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_atomic_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        write_file_atomic(&path, b"first\n", FILE_MODE).unwrap();
        write_file_atomic(&path, b"second\n", FILE_MODE).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second\n");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        write_file_atomic(&path, b"{}\n", FILE_MODE).unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("config.json")]);
    }

    #[test]
    fn test_failed_write_keeps_original() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        write_file_atomic(&path, b"original\n", FILE_MODE).unwrap();

        // Renaming a file over a directory fails after the temp file is written
        let dir_target = temp_dir.path().join("occupied");
        fs::create_dir(&dir_target).unwrap();
        fs::write(dir_target.join("child"), b"x").unwrap();
        assert!(write_file_atomic(&dir_target, b"new\n", FILE_MODE).is_err());

        assert_eq!(fs::read(&path).unwrap(), b"original\n");
        let leftovers = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".tmp.")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        write_file_atomic(&path, b"{}\n", FILE_MODE).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_ensure_parent_dir_creates_nested() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a/b/config.json");

        ensure_parent_dir(&path).unwrap();
        assert!(temp_dir.path().join("a/b").is_dir());
        ensure_parent_dir(&path).unwrap();
    }

    #[test]
    fn test_lock_path_is_sibling() {
        assert_eq!(
            lock_path(Path::new("/etc/certkit-agent/config.json")),
            PathBuf::from("/etc/certkit-agent/config.json.lock")
        );
    }

    #[test]
    fn test_lock_reacquired_after_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json.lock");

        let lock = FileLock::exclusive(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        drop(lock);

        assert!(FileLock::exclusive(&path).is_ok());
    }
}
