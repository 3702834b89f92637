//! multipart 表单上传处理器。

use axum::body::{Body as AxumBody, to_bytes};
use axum::http::{HeaderMap, header};
use axum::response::Redirect;
use http_body_util::LengthLimitError;
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::error::ApiError;
use crate::multipart::{extract, is_form_data};
use crate::state::AppState;
use crate::storage::base_name;

/// 保存请求体中的首个文件分段，同名文件被替换，成功后 303 跳转到列表。
pub async fn upload(
    state: &AppState,
    headers: &HeaderMap,
    body: AxumBody,
) -> Result<Redirect, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| is_form_data(value))
        .ok_or_else(|| ApiError::BadRequest("content type must be multipart/form-data".into()))?;

    let body = read_body(body, state.config.upload_max_size).await?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("request body is empty".into()));
    }

    let part = extract(&body, content_type)?;
    let name = base_name(&part.file_name)?;
    let target = state.storage.resolve_file(name)?;
    let payload = &body[part.data.clone()];
    debug!(file = name, body = body.len(), payload = payload.len(), "multipart parsed");

    write_atomic(&target, payload)
        .await
        .map_err(|err| ApiError::Internal(format!("write {}: {err}", target.display())))?;

    info!(file = name, size = payload.len(), "upload complete");
    Ok(Redirect::to("/"))
}

/// 读取完整请求体；`max_size` 为 0 时不限制。
async fn read_body(body: AxumBody, max_size: u64) -> Result<axum::body::Bytes, ApiError> {
    let limit = match max_size {
        0 => usize::MAX,
        size => usize::try_from(size).unwrap_or(usize::MAX),
    };
    to_bytes(body, limit).await.map_err(|err| {
        let err = err.into_inner();
        if err.downcast_ref::<LengthLimitError>().is_some() {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(format!("failed to read request body: {err}"))
        }
    })
}
