//! Shared endpoints: image upload into the temp folder.

use axum::Json;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::auth::AccessUser;
use crate::services::images::PublicDirs;
use crate::services::uploads::{TempUpload, UploadError};
use crate::state::AppState;

/// Multipart field that carries the file.
pub const IMAGE_FIELD: &str = "image";

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { .. } => ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string()),
            UploadError::InvalidImage | UploadError::MissingFile => ApiError::bad_request(err.to_string()),
            UploadError::Io(_) => ApiError::internal(&err),
        }
    }
}

fn multipart_error(err: &MultipartError) -> ApiError {
    ApiError::new(err.status(), err.body_text())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_name: String,
}

/// `POST /common/image` — store the `image` field as `{uuid}{ext}` in the
/// temp folder and return its name for a later `POST /posts`.
pub async fn upload_image(
    State(state): State<AppState>,
    AccessUser(bearer): AccessUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut multipart = multipart.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(|err| multipart_error(&err))? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = store_field(&state.dirs, field, state.config.upload_max_bytes).await?;
        tracing::info!(user_id = bearer.user.id, %file_name, "image uploaded");
        return Ok((StatusCode::CREATED, Json(UploadResponse { file_name })));
    }
    Err(UploadError::MissingFile.into())
}

async fn store_field(dirs: &PublicDirs, mut field: Field<'_>, limit: usize) -> Result<String, ApiError> {
    let original_name = field.file_name().unwrap_or_default().to_owned();
    let mut upload = TempUpload::create(dirs, &original_name, limit).await?;

    // Returning early drops `upload`, which removes the partial file.
    while let Some(chunk) = field.chunk().await.map_err(|err| multipart_error(&err))? {
        upload.write(&chunk).await?;
    }
    Ok(upload.finish().await?)
}
