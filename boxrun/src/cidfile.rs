//! Container ID file.
//!
//! A marker file recording the identifier of the container a run created.
//! The file is created exclusively before the create call and is committed
//! by writing the identifier once. Closing an uncommitted file deletes it.

use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct CidFile {
    path: PathBuf,
    file: Option<File>,
    written: bool,
}

impl CidFile {
    /// Create the file. Fails if it already exists.
    pub fn create(path: impl Into<PathBuf>) -> BoxrunResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => BoxrunError::CidFile(format!(
                    "Container ID file found, make sure the other container isn't running or delete {}",
                    path.display()
                )),
                _ => BoxrunError::CidFile(format!("Failed to create the container ID file: {}", e)),
            })?;

        tracing::debug!(path = %path.display(), "Created CID file");
        Ok(Self {
            path,
            file: Some(file),
            written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Record `id`. Called once per run.
    pub fn write(&mut self, id: &str) -> BoxrunResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| BoxrunError::InvalidState("CID file already closed".into()))?;
        file.write_all(id.as_bytes()).map_err(|e| {
            BoxrunError::CidFile(format!("Failed to write the container ID to the file: {}", e))
        })?;
        self.written = true;
        Ok(())
    }

    /// Close the handle, deleting the file if nothing was written.
    pub fn close(&mut self) -> BoxrunResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        drop(file);

        if !self.written {
            std::fs::remove_file(&self.path).map_err(|e| {
                BoxrunError::CidFile(format!(
                    "failed to remove the CID file '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;
            tracing::debug!(path = %self.path.display(), "Removed uncommitted CID file");
        }
        Ok(())
    }
}

impl Drop for CidFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close CID file");
        }
    }
}
