//! 上传、下载与删除处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Json, Multipart, Path, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::TryStreamExt;
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::storage::{DeletionKind, Storage, StoredFile, resolve_scope_path};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadQuery {
    course_id: Option<String>,
    lesson_id: Option<String>,
    size: Option<u64>,
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    url: String,
    path: String,
    size: u64,
    info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteRequest {
    #[serde(default, alias = "filename", alias = "url")]
    path: String,
    #[serde(default)]
    delete_course_dir: bool,
}

#[derive(Serialize)]
pub(crate) struct DeleteResponse {
    info: String,
    path: String,
    kind: DeletionKind,
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("响应头构建失败".into()))
}

/// 以流的方式返回已存储文件。
pub async fn download_file(
    Path(path): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let StoredFile { file, metadata } = storage.get(&path).await?;
    let etag = etag_from_metadata(&metadata);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ETAG, header_value(&etag)?);
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }
    if is_not_modified(&request_headers, &etag) {
        debug!(path, "download not modified");
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    response_headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    response_headers.insert(
        header::CONTENT_LENGTH,
        header_value(&metadata.len().to_string())?,
    );
    info!(path, size = metadata.len(), "download file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// 接收 multipart 上传：`courseId`/`lessonId` 文本字段需位于 `file` 字段之前。
pub async fn upload_file(
    Query(query): Query<UploadQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let UploadQuery {
        mut course_id,
        mut lesson_id,
        size,
    } = query;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("invalid multipart data: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "courseId" | "lessonId" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("invalid {name}: {err}")))?;
                let slot = if name == "courseId" {
                    &mut course_id
                } else {
                    &mut lesson_id
                };
                slot.get_or_insert(value);
            }
            "file" => {
                let raw_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let scope = resolve_scope_path(course_id.as_deref(), lesson_id.as_deref());
                let reader = StreamReader::new(field.map_err(io::Error::other));
                tokio::pin!(reader);

                let stored = storage
                    .put(&scope, &raw_name, &content_type, reader, size)
                    .await?;
                return Ok(JsonResponse(UploadResponse {
                    url: stored.url(),
                    info: format!("File '{raw_name}' saved at '{}'", stored.path),
                    path: stored.path,
                    size: stored.size,
                }));
            }
            _ => debug!(field = name, "ignoring multipart field"),
        }
    }

    Err(ApiError::BadRequest("file is required".into()))
}

/// 删除文件、目录或整个课程目录。
pub async fn delete_file(
    Extension(storage): Extension<Arc<Storage>>,
    Json(payload): Json<DeleteRequest>,
) -> Result<JsonResponse<DeleteResponse>, ApiError> {
    if payload.path.trim().is_empty() {
        return Err(ApiError::BadRequest("filename is required".into()));
    }

    let deletion = storage
        .delete(&payload.path, payload.delete_course_dir)
        .await?;
    Ok(JsonResponse(DeleteResponse {
        info: format!("'{}' deleted successfully", deletion.path),
        path: deletion.path,
        kind: deletion.kind,
    }))
}
