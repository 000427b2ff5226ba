//! Temporary image uploads.
//!
//! DESIGN
//! ======
//! An upload is streamed chunk by chunk into `{public}/temp/{uuid}{ext}`.
//! The size limit is checked as bytes arrive, so an oversized body is cut
//! off without being buffered. A `TempUpload` dropped before `finish`
//! removes its partial file, which covers errors and client disconnects.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::services::images::PublicDirs;

pub const ALLOWED_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("not a valid image file")]
    InvalidImage,
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("multipart field \"image\" is required")]
    MissingFile,
    #[error("upload i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl crate::frame::ErrorCode for UploadError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidImage => "E_INVALID_IMAGE",
            Self::TooLarge { .. } => "E_UPLOAD_TOO_LARGE",
            Self::MissingFile => "E_UPLOAD_MISSING",
            Self::Io(_) => "E_IO",
        }
    }
}

/// Extension of `original_name` (with the dot) if it is an accepted image type.
#[must_use]
pub fn image_extension(original_name: &str) -> Option<&'static str> {
    let ext = Path::new(original_name).extension()?.to_str()?;
    ALLOWED_EXTENSIONS
        .into_iter()
        .find(|allowed| allowed[1..] == *ext)
}

/// An in-progress upload into the temp folder.
pub struct TempUpload {
    path: PathBuf,
    file_name: String,
    file: tokio::fs::File,
    written: usize,
    limit: usize,
    finished: bool,
}

impl TempUpload {
    /// Open a fresh temp file named after a new UUID.
    ///
    /// # Errors
    ///
    /// Returns `InvalidImage` for an unaccepted extension or an I/O error.
    pub async fn create(dirs: &PublicDirs, original_name: &str, limit: usize) -> Result<Self, UploadError> {
        let ext = image_extension(original_name).ok_or(UploadError::InvalidImage)?;
        let file_name = format!("{}{ext}", Uuid::new_v4());
        let path = dirs.temp.join(&file_name);
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self { path, file_name, file, written: 0, limit, finished: false })
    }

    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// Returns `TooLarge` once the total passes the limit, or an I/O error.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.written += chunk.len();
        if self.written > self.limit {
            return Err(UploadError::TooLarge { limit: self.limit });
        }
        self.file.write_all(chunk).await?;
        Ok(())
    }

    /// Flush to disk and return the stored file name. The file is kept only
    /// if this succeeds.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the flush fails.
    pub async fn finish(mut self) -> Result<String, UploadError> {
        self.file.flush().await?;
        self.finished = true;
        tracing::info!(file_name = %self.file_name, bytes = self.written, "stored temp upload");
        Ok(std::mem::take(&mut self.file_name))
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed partial upload"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(error = %err, path = %self.path.display(), "failed to remove partial upload"),
        }
    }
}

#[cfg(test)]
#[path = "uploads_test.rs"]
mod tests;
