//! Post images and the public directory layout.
//!
//! DESIGN
//! ======
//! Uploads land in `{public}/temp` first. Creating a post image records the
//! row on the caller's transaction connection and then moves the file into
//! `{public}/posts`. Rows store the bare file name; the serialized `path` is
//! the URL under which the static file server exposes it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Row};
use time::OffsetDateTime;

pub const TEMP_DIR_NAME: &str = "temp";
pub const POSTS_DIR_NAME: &str = "posts";
/// URL prefix under which post images are served.
pub const POST_PUBLIC_PREFIX: &str = "/public/posts";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid file name: {0}")]
    InvalidFileName(String),
    #[error("file does not exist: {0}")]
    FileMissing(String),
    #[error("file move failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for ImageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFileName(_) => "E_INVALID_FILE_NAME",
            Self::FileMissing(_) => "E_FILE_MISSING",
            Self::Io(_) => "E_IO",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Root, temp and posts directories under the public folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicDirs {
    pub root: PathBuf,
    pub temp: PathBuf,
    pub posts: PathBuf,
}

impl PublicDirs {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf(), temp: root.join(TEMP_DIR_NAME), posts: root.join(POSTS_DIR_NAME) }
    }

    /// Create the temp and posts directories if missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be created.
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.temp).await?;
        tokio::fs::create_dir_all(&self.posts).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    #[serde(rename = "POST_IMAGE")]
    PostImage,
}

impl ImageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostImage => "POST_IMAGE",
        }
    }
}

/// Image row as stored: `path` is the bare file name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredImage {
    pub id: i64,
    pub order: i32,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Image as returned to clients: `path` is a public URL path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: i64,
    pub order: i32,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<StoredImage> for Image {
    fn from(stored: StoredImage) -> Self {
        let path = match stored.image_type {
            ImageType::PostImage => format!("{POST_PUBLIC_PREFIX}/{}", stored.path),
        };
        Self {
            id: stored.id,
            order: stored.order,
            image_type: stored.image_type,
            path,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// True when `name` is a single path component with no traversal.
#[must_use]
pub fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().is_some_and(|f| f == name)
}

/// Record a post image and move its upload out of the temp folder.
///
/// # Errors
///
/// Returns `InvalidFileName` for names with path components, `FileMissing`
/// if the upload is not in the temp folder, or a database/I/O error.
pub async fn create_post_image(
    conn: &mut PgConnection,
    dirs: &PublicDirs,
    post_id: i64,
    order: i32,
    file_name: &str,
) -> Result<Image, ImageError> {
    if !is_bare_file_name(file_name) {
        return Err(ImageError::InvalidFileName(file_name.to_owned()));
    }

    let temp_path = dirs.temp.join(file_name);
    if !tokio::fs::try_exists(&temp_path).await.unwrap_or(false) {
        return Err(ImageError::FileMissing(file_name.to_owned()));
    }

    let row = sqlx::query(
        r#"INSERT INTO images (post_id, "order", type, path)
           VALUES ($1, $2, $3, $4)
           RETURNING id, "order", created_at, updated_at"#,
    )
    .bind(post_id)
    .bind(order)
    .bind(ImageType::PostImage.as_str())
    .bind(file_name)
    .fetch_one(&mut *conn)
    .await?;

    tokio::fs::rename(&temp_path, dirs.posts.join(file_name)).await?;
    tracing::debug!(post_id, file_name, "moved post image out of temp");

    Ok(Image::from(StoredImage {
        id: row.try_get("id")?,
        order: row.try_get("order")?,
        image_type: ImageType::PostImage,
        path: file_name.to_owned(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

#[cfg(test)]
#[path = "images_test.rs"]
mod tests;
