//! Singleton-process lock via an exclusive PID file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}

impl PidLock {
    /// Atomically create the PID file. If one exists, probe the recorded pid
    /// with signal 0: a live process means another instance owns the lock; a
    /// dead one means the file is stale and gets overwritten.
    pub fn acquire(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let pid = std::process::id();

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                write!(file, "{pid}")?;
                Ok(Self {
                    path: path.to_path_buf(),
                    pid,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = fs::read_to_string(path).unwrap_or_default();
                if let Ok(other) = existing.trim().parse::<i32>() {
                    if other > 0 && process_alive(other) {
                        return Err(std::io::Error::new(
                            ErrorKind::AddrInUse,
                            format!("another instance is already running (pid {other})"),
                        ));
                    }
                }
                warn!(path = %path.display(), "overwriting stale PID file");
                fs::write(path, pid.to_string())?;
                Ok(Self {
                    path: path.to_path_buf(),
                    pid,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the file, but only when it still records our pid.
    pub fn release(self) {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim() == self.pid.to_string() => {
                let _ = fs::remove_file(&self.path);
            }
            _ => {}
        }
    }
}

/// Signal 0 probes for existence without delivering anything.
fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_our_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talon.pid");
        let lock = PidLock::acquire(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, std::process::id().to_string());
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn live_pid_blocks_a_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talon.pid");
        // Our own pid is definitely alive.
        fs::write(&path, std::process::id().to_string()).unwrap();
        let err = PidLock::acquire(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AddrInUse);
    }

    #[test]
    fn stale_pid_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talon.pid");
        // Way past any realistic pid_max.
        fs::write(&path, "999999999").unwrap();
        let lock = PidLock::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
        lock.release();
    }

    #[test]
    fn garbage_pid_file_counts_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talon.pid");
        fs::write(&path, "not a pid").unwrap();
        assert!(PidLock::acquire(&path).is_ok());
    }

    #[test]
    fn release_leaves_a_foreign_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talon.pid");
        let lock = PidLock::acquire(&path).unwrap();
        // Another process took over the file meanwhile.
        fs::write(&path, "424242").unwrap();
        lock.release();
        assert!(path.exists());
    }
}
