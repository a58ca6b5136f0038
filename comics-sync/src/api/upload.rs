//! Media upload endpoint
//!
//! The file part is streamed to a temporary file under the upload directory,
//! pushed to the media host, and removed again whatever the outcome. The
//! returned URL becomes the media list of a new comic row.

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use comics_common::Comic;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Request body limit for the upload route
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

struct TempUpload {
    path: PathBuf,
    file_name: String,
}

impl TempUpload {
    async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!("Failed to remove temporary upload {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Default)]
struct UploadForm {
    file: Option<TempUpload>,
    title: Option<String>,
    description: Option<String>,
}

impl UploadForm {
    async fn discard(&mut self) {
        if let Some(file) = self.file.take() {
            file.remove().await;
        }
    }
}

fn multipart_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("malformed multipart body: {}", e))
}

async fn spool(dir: &Path, mut field: Field<'_>) -> ApiResult<TempUpload> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    tokio::fs::create_dir_all(dir).await?;
    let upload = TempUpload {
        path: dir.join(Uuid::new_v4().to_string()),
        file_name,
    };

    let copied: ApiResult<()> = async {
        let mut out = tokio::fs::File::create(&upload.path).await?;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok(())
    }
    .await;

    match copied {
        Ok(()) => Ok(upload),
        Err(e) => {
            upload.remove().await;
            Err(e)
        }
    }
}

async fn fill_form(dir: &Path, multipart: &mut Multipart, form: &mut UploadForm) -> ApiResult<()> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" if form.file.is_none() => form.file = Some(spool(dir, field).await?),
            "title" => form.title = Some(field.text().await.map_err(multipart_error)?),
            "description" => form.description = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }
    Ok(())
}

async fn read_form(dir: &Path, mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();
    if let Err(e) = fill_form(dir, &mut multipart, &mut form).await {
        form.discard().await;
        return Err(e);
    }
    Ok(form)
}

/// POST /upload
///
/// Multipart fields: `file` (required), `title` (required), `description`.
pub async fn upload_comic(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let media = state
        .media
        .clone()
        .ok_or_else(|| ApiError::Unavailable("media host not configured".to_string()))?;

    let mut form = read_form(&state.upload_dir, multipart).await?;

    let title = form.title.take().map(|t| t.trim().to_string()).unwrap_or_default();
    if title.is_empty() {
        form.discard().await;
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    let Some(file) = form.file.take() else {
        return Err(ApiError::BadRequest("file is required".to_string()));
    };

    let uploaded = media.upload(&file.path, &file.file_name).await;
    file.remove().await;
    let uploaded = uploaded?;

    let mut comic = Comic::new(title);
    comic.description = form.description.unwrap_or_default();
    comic.media_urls = vec![uploaded.secure_url];

    let row = state.sync.create(comic.into()).await?;
    info!("Uploaded comic '{}' (id {})", row.title(), row.id);

    Ok(Json(json!({
        "message": "Comic uploaded successfully!",
        "comic": row,
    })))
}
