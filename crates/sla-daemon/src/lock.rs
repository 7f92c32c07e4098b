//! Advisory file lock serializing writers of one record file, across
//! processes as well as within one.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use workflow::StoreError;

const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock `path`, creating it if needed, retrying until `timeout`.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let contended = fs2::lock_contended_error().kind();

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), "Acquired record file lock");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == contended => {}
                Err(e) => return Err(StoreError::Io(e)),
            }

            let waited = start.elapsed();
            if waited >= timeout {
                warn!(path = %path.display(), ?waited, "Record file lock still held elsewhere");
                return Err(StoreError::Unavailable(format!(
                    "{} locked by another writer for {waited:?}",
                    path.display()
                )));
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
