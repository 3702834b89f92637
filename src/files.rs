//! 文件列表与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::Query;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use httpdate::fmt_http_date;
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::ApiError;
use crate::page::render_index;
use crate::state::AppState;
use crate::storage::base_name;

#[derive(Deserialize)]
pub(crate) struct DownloadQuery {
    file: Option<String>,
}

/// 列出服务目录中的文件。
pub async fn index(state: &AppState) -> Result<Html<String>, ApiError> {
    let entries = state
        .storage
        .list_files()
        .await
        .map_err(|err| ApiError::Internal(format!("list serving root: {err}")))?;
    info!(count = entries.len(), "list files");
    Ok(Html(render_index(&entries)))
}

/// 以流式响应下载文件。
pub async fn download(state: &AppState, uri: &Uri) -> Result<Response, ApiError> {
    let Query(query) = Query::<DownloadQuery>::try_from_uri(uri)
        .map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let requested = query
        .file
        .filter(|file| !file.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing file parameter".into()))?;

    let name = base_name(&requested)?.to_string();
    let (target, metadata) = state.storage.file_metadata(&name).await?;
    let file = File::open(&target).await?;
    let file_size = metadata.len();
    let mime = mime_guess::from_path(&name).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&name));
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    info!(file = name, size = file_size, "download");
    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

/// `attachment; filename="NAME"`，非 ASCII 名称附带 RFC 5987 编码。
fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    let mut value = format!(r#"attachment; filename="{fallback}""#);
    if !name.is_ascii() {
        let encoded = percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC);
        value.push_str(&format!("; filename*=UTF-8''{encoded}"));
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
