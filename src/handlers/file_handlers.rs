//! Listing, retrieval and deletion of stored files, plus the upload form.

use crate::{errors::AppError, handlers::AppState, models::stored_file::FileEntry};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, Response},
};
use serde::Serialize;
use tokio_util::io::ReaderStream;

#[derive(Serialize, Debug)]
pub struct ListFilesResponse {
    pub success: bool,
    pub count: usize,
    pub files: Vec<FileEntry>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileResponse {
    pub success: bool,
    pub message: String,
    pub relative_path: String,
}

/// GET `/`: minimal browser form for the upload endpoints.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

/// GET `/files`: every stored file, oldest bucket first.
pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<ListFilesResponse>, AppError> {
    let files = state.storage.list_files().await?;
    Ok(Json(ListFilesResponse {
        success: true,
        count: files.len(),
        files,
    }))
}

/// DELETE `/files/{filename}`: delete by bare filename.
///
/// Any directory part of `filename` is ignored.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<DeleteFileResponse>, AppError> {
    let relative_path = state.storage.delete_by_name(&filename).await?;
    Ok(Json(DeleteFileResponse {
        success: true,
        message: "file deleted".into(),
        relative_path,
    }))
}

/// GET `{public_base}/{bucket}/{name}`: stream a stored file.
pub async fn serve_file(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (file, len) = state.storage.open_file(&bucket, &name).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let content_type = mime_guess::from_path(&name).first_or_octet_stream();
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.essence_str())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    // Stored types are client-declared; keep browsers from sniffing.
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Ok(response)
}
