//! Upload endpoints.
//!
//! Every endpoint streams each multipart file part straight into storage
//! through an `UploadSession`; parts are never buffered whole in memory.
//! Parts without a filename (plain form fields, empty file inputs) are skipped.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{
        policy::{FALLBACK_CONTENT_TYPE, UploadPolicy},
        stored_file::StoredFile,
    },
    services::{
        storage_service::{IncomingFile, StorageError, StorageService},
        upload_service::{FailedUpload, UploadOutcome, UploadSession},
    },
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use futures::StreamExt;
use serde::Serialize;
use std::{collections::BTreeMap, io};

#[derive(Serialize, Debug)]
pub struct SingleUploadResponse {
    pub success: bool,
    pub message: String,
    pub file: StoredFile,
}

#[derive(Serialize, Debug)]
pub struct MultiUploadResponse {
    pub success: bool,
    pub message: String,
    pub files: Vec<StoredFile>,
    pub failed: Vec<FailedUpload>,
}

#[derive(Serialize, Debug)]
pub struct FieldsUploadResponse {
    pub success: bool,
    pub message: String,
    pub files: BTreeMap<String, Vec<StoredFile>>,
    pub failed: Vec<FailedUpload>,
}

/// POST `/upload/single`: one file under field `file`.
pub async fn upload_single(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SingleUploadResponse>, AppError> {
    let outcome = receive(&state.storage, &state.policies.single, multipart).await?;
    single_response(outcome)
}

/// POST `/upload/image`: one image under field `image`.
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SingleUploadResponse>, AppError> {
    let outcome = receive(&state.storage, &state.policies.image, multipart).await?;
    single_response(outcome)
}

/// POST `/upload/multiple`: several files under field `files`.
///
/// Answers `207 Multi-Status` when some files could not be stored.
pub async fn upload_multiple(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<MultiUploadResponse>), AppError> {
    let outcome = receive(&state.storage, &state.policies.multiple, multipart).await?;
    let status = batch_status(&outcome);
    let body = MultiUploadResponse {
        success: outcome.failed.is_empty(),
        message: batch_message(&outcome),
        files: outcome.stored,
        failed: outcome.failed,
    };
    Ok((status, Json(body)))
}

/// POST `/upload/fields`: files under `avatar`, `gallery` and `documents`.
pub async fn upload_fields(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FieldsUploadResponse>), AppError> {
    let outcome = receive(&state.storage, &state.policies.fields, multipart).await?;
    let status = batch_status(&outcome);
    let body = FieldsUploadResponse {
        success: outcome.failed.is_empty(),
        message: batch_message(&outcome),
        files: outcome.by_field(),
        failed: outcome.failed,
    };
    Ok((status, Json(body)))
}

/// Feed every file part of `multipart` through an `UploadSession`.
async fn receive(
    storage: &StorageService,
    policy: &UploadPolicy,
    mut multipart: Multipart,
) -> Result<UploadOutcome, AppError> {
    let mut session = UploadSession::new(storage, policy);

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                let err = multipart_error(policy, err);
                return Err(session.abort(err).await.into());
            }
        };

        let Some(original_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let incoming = IncomingFile {
            field_name: field.name().unwrap_or_default().to_string(),
            original_name,
            mime_type: field
                .content_type()
                .unwrap_or(FALLBACK_CONTENT_TYPE)
                .to_string(),
        };

        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        if let Err(err) = session.accept(incoming, stream).await {
            return Err(session.abort(err).await.into());
        }
    }

    Ok(session.finish()?)
}

/// A body that outgrows the route limit is reported like an oversize file.
fn multipart_error(policy: &UploadPolicy, err: MultipartError) -> StorageError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StorageError::TooLarge {
            limit: policy.max_file_size,
        }
    } else {
        StorageError::Interrupted(io::Error::other(err.body_text()))
    }
}

fn single_response(outcome: UploadOutcome) -> Result<Json<SingleUploadResponse>, AppError> {
    let file = outcome
        .stored
        .into_iter()
        .next()
        .ok_or(StorageError::NoFileProvided)?;

    Ok(Json(SingleUploadResponse {
        success: true,
        message: "file uploaded".into(),
        file,
    }))
}

fn batch_status(outcome: &UploadOutcome) -> StatusCode {
    if outcome.failed.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    }
}

fn batch_message(outcome: &UploadOutcome) -> String {
    if outcome.failed.is_empty() {
        format!("{} files uploaded", outcome.stored.len())
    } else {
        format!(
            "{} files uploaded, {} failed",
            outcome.stored.len(),
            outcome.failed.len()
        )
    }
}
