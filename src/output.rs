//! Locked persistence of encoded images

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

/// Which file a cycle persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Unmodified sensor frame, written on refresh cycles.
    Captured,
    /// Homography-corrected frame.
    Processed,
}

impl OutputKind {
    pub fn label(self) -> &'static str {
        match self {
            OutputKind::Captured => "captured",
            OutputKind::Processed => "processed",
        }
    }
}

/// Truncate `path` and write `bytes` while holding an exclusive `flock`.
///
/// Readers that take a shared lock never see a half-written image.
pub fn write_locked(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;
    let mut locked = Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| io::Error::from(errno))?;
    locked.write_all(bytes)?;
    locked.flush()?;
    locked
        .unlock()
        .map_err(|(_, errno)| io::Error::from(errno))?;
    Ok(())
}

/// [`write_locked`], with failures logged and swallowed.
///
/// Returns whether the image landed on disk.
pub fn persist(path: &Path, kind: OutputKind, bytes: &[u8]) -> bool {
    match write_locked(path, bytes) {
        Ok(()) => {
            debug!(path = %path.display(), kind = kind.label(), len = bytes.len(), "image persisted");
            true
        }
        Err(err) => {
            warn!(path = %path.display(), kind = kind.label(), "could not persist image: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn truncates_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        fs::write(&path, vec![0xAA; 64]).unwrap();

        write_locked(&path, b"short").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.jpg");
        assert!(!persist(&path, OutputKind::Processed, b"jpeg"));
        assert!(!path.exists());
    }
}
