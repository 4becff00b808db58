use crate::convo::paths::IndexPaths;
use crate::error::IndexError;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

const RUN_LOCK_FILE: &str = "convo-index.lock";

/// Exclusive hold on the run lock, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn lock_path(paths: &IndexPaths) -> PathBuf {
    paths.logs_dir.join(RUN_LOCK_FILE)
}

/// Take the run lock without blocking. Fails with `IndexError::RunLocked` when held elsewhere.
pub fn try_acquire(paths: &IndexPaths) -> Result<RunLock> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let path = lock_path(paths);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        return Err(IndexError::RunLocked(path.display().to_string()).into());
    }

    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(RunLock { file, path })
}

/// `Ok(None)` when another run holds the lock; other failures propagate.
pub fn acquire_unless_held(paths: &IndexPaths) -> Result<Option<RunLock>> {
    match try_acquire(paths) {
        Ok(guard) => Ok(Some(guard)),
        Err(err) => match err.downcast_ref::<IndexError>() {
            Some(IndexError::RunLocked(path)) => {
                tracing::info!(lock = %path, "another run is active");
                Ok(None)
            }
            _ => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_held() {
        let tmp = tempdir().expect("tempdir");
        let paths = IndexPaths::rooted_at(tmp.path());

        let held = try_acquire(&paths).expect("first lock");
        let err = try_acquire(&paths).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::RunLocked(_))
        ));

        drop(held);
        assert!(try_acquire(&paths).is_ok());
    }

    #[test]
    fn lock_file_records_pid() {
        let tmp = tempdir().expect("tempdir");
        let paths = IndexPaths::rooted_at(tmp.path());
        let lock = try_acquire(&paths).expect("lock");
        let raw = fs::read_to_string(lock.path()).expect("read");
        assert_eq!(raw.trim(), std::process::id().to_string());
    }

    #[test]
    fn held_lock_reads_as_none() {
        let tmp = tempdir().expect("tempdir");
        let paths = IndexPaths::rooted_at(tmp.path());

        let held = acquire_unless_held(&paths).expect("first").expect("guard");
        assert!(acquire_unless_held(&paths).expect("second").is_none());
        drop(held);
        assert!(acquire_unless_held(&paths).expect("third").is_some());
    }
}
