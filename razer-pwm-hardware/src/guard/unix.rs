//! `flock`-based named lock
//!
//! The kernel drops an `flock` when its holder dies, which hides abandonment.
//! The holder therefore writes its PID into the lock file and truncates it on
//! release: a non-empty file right after locking means the previous holder
//! never released.

use razer_pwm_core::{GuardConfig, RazerPwmError, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tracing::{debug, warn};

const LOCK_FILE_MODE: u32 = 0o666;

#[derive(Debug)]
pub(super) struct NamedLock {
    file: File,
    path: PathBuf,
}

impl NamedLock {
    pub(super) fn open(config: &GuardConfig) -> Result<Self> {
        let path = config.lock_dir.join(format!("{}.lock", config.name));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(LOCK_FILE_MODE)
            .open(&path)
            .map_err(|e| {
                RazerPwmError::Guard(format!("Failed to open {}: {}", path.display(), e))
            })?;

        // umask strips bits from `mode`; only the creator can widen them
        if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(LOCK_FILE_MODE)) {
            debug!("Leaving permissions of {} as they are: {}", path.display(), e);
        }

        Ok(Self { file, path })
    }

    pub(super) fn lock(&self) -> Result<()> {
        loop {
            self.flock(libc::LOCK_EX).map_err(|e| self.error("lock", e))?;

            let marker_len = self
                .file
                .metadata()
                .map_err(|e| self.error("inspect", e))?
                .len();
            if marker_len == 0 {
                break;
            }

            let previous = self.read_marker();
            warn!(
                "Access guard {} was abandoned by process {}, recovering",
                self.path.display(),
                previous.as_deref().unwrap_or("?")
            );
            self.file
                .set_len(0)
                .map_err(|e| self.error("reset", e))?;
            self.flock(libc::LOCK_UN).map_err(|e| self.error("unlock", e))?;
        }

        let marker = std::process::id().to_string();
        if let Err(e) = self.file.write_all_at(marker.as_bytes(), 0) {
            // Without the marker only abandonment detection is lost
            warn!("Failed to mark {}: {}", self.path.display(), e);
        }
        Ok(())
    }

    pub(super) fn unlock(&self) {
        if let Err(e) = self.file.set_len(0) {
            warn!("Failed to clear {}: {}", self.path.display(), e);
        }
        if let Err(e) = self.flock(libc::LOCK_UN) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }

    fn flock(&self, operation: libc::c_int) -> io::Result<()> {
        loop {
            // SAFETY: the descriptor stays open for as long as `self.file` lives
            let rc = unsafe { libc::flock(self.file.as_raw_fd(), operation) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn read_marker(&self) -> Option<String> {
        let mut buf = [0u8; 32];
        let n = self.file.read_at(&mut buf, 0).ok()?;
        let marker = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        (!marker.is_empty()).then_some(marker)
    }

    fn error(&self, action: &str, err: io::Error) -> RazerPwmError {
        RazerPwmError::Guard(format!(
            "Failed to {} {}: {}",
            action,
            self.path.display(),
            err
        ))
    }

    #[cfg(test)]
    fn path(&self) -> &std::path::Path {
        &self.path
    }
}
