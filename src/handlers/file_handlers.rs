//! HTTP handlers for uploading, listing, streaming and deleting files.
//! Upload and image bodies are streamed chunk by chunk; storage concerns are
//! delegated to `UploadPipeline` and `RetrievalService`.

use crate::{
    errors::AppError,
    models::stored_object::StoredObject,
    services::StoreError,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{Stream, stream};
use std::io;
use uuid::Uuid;

/// Name of the multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

/// `POST /upload`: multipart form with a `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let original_name = field.file_name().unwrap_or_default().to_string();

        let object = state
            .uploads
            .upload(field_stream(field), content_type.as_deref(), &original_name)
            .await
            .map_err(upload_error)?;

        return Ok((StatusCode::CREATED, Json(object)));
    }

    Err(AppError::bad_request(format!(
        "multipart field `{}` is required",
        FILE_FIELD
    )))
}

/// `GET /files`: all stored objects, 404 when there are none.
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<StoredObject>>, AppError> {
    Ok(Json(state.retrieval.list_all().await?))
}

/// `GET /files/{filename}`: a single catalog record.
pub async fn get_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<StoredObject>, AppError> {
    Ok(Json(state.retrieval.get_metadata(&filename).await?))
}

/// `GET /image/{filename}`: stream an image for inline display.
pub async fn get_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (meta, chunks) = state.retrieval.stream_content(&filename).await?;

    let mut response = Response::new(Body::from_stream(chunks));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&meta.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.length.max(0)));
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.md5)) {
        headers.insert(header::ETAG, value);
    }

    Ok(response)
}

/// `DELETE /files/{id}`: remove an object; unknown or malformed ids are 404.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| AppError::not_found("No file exists"))?;
    state.retrieval.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Adapt a multipart field into the byte stream the pipeline consumes.
fn field_stream(field: Field<'_>) -> impl Stream<Item = io::Result<Bytes>> + Send + '_ {
    stream::try_unfold(field, |mut field| async move {
        match field.chunk().await {
            Ok(Some(bytes)) => Ok(Some((bytes, field))),
            Ok(None) => Ok(None),
            Err(err) => Err(io::Error::other(err)),
        }
    })
}

/// Body errors surfacing through the pipeline keep their multipart status
/// (e.g. 413 when the body limit is exceeded).
fn upload_error(err: StoreError) -> AppError {
    if let StoreError::Io(io_err) = &err {
        if let Some(multipart) = io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return AppError::new(multipart.status(), multipart.body_text());
        }
    }
    err.into()
}
