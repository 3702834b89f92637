//! 单文件 multipart/form-data 请求体解析。

use memchr::memmem;
use std::ops::Range;
use thiserror::Error;

const FORM_DATA: &str = "multipart/form-data";
const BOUNDARY_MARKER: &str = "boundary=";
const CONTENT_DISPOSITION: &[u8] = b"Content-Disposition";
const FILENAME_MARKER: &[u8] = b"filename=\"";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// 提取出的文件名与 payload 位置。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartFile {
    pub file_name: String,
    /// payload 在请求体中的半开区间。
    pub data: Range<usize>,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("content type is not multipart/form-data")]
    NotFormData,
    #[error("multipart boundary is missing")]
    MissingBoundary,
    #[error("no Content-Disposition header in body")]
    MissingContentDisposition,
    #[error("no file part in body")]
    MissingFileName,
    #[error("file name is empty")]
    EmptyFileName,
    #[error("file part headers are not terminated")]
    MissingHeaderEnd,
}

/// 从 Content-Type 中取出 boundary。
pub fn boundary(content_type: &str) -> Result<&str, MultipartError> {
    if !is_form_data(content_type) {
        return Err(MultipartError::NotFormData);
    }
    let start = content_type
        .find(BOUNDARY_MARKER)
        .ok_or(MultipartError::MissingBoundary)?;
    let value = &content_type[start + BOUNDARY_MARKER.len()..];
    let value = value.split(';').next().unwrap_or_default().trim();
    let value = value.trim_matches('"');
    if value.is_empty() {
        return Err(MultipartError::MissingBoundary);
    }
    Ok(value)
}

pub fn is_form_data(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..FORM_DATA.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(FORM_DATA))
}

/// 定位首个文件分段；缺少结束分隔符时 payload 延伸到请求体末尾。
///
/// 头部结束符从 `filename="` 处而非 Content-Disposition 处开始查找，
/// 这样文件分段之前的普通字段不会把 payload 起点提前。
pub fn extract(body: &[u8], content_type: &str) -> Result<MultipartFile, MultipartError> {
    let boundary = boundary(content_type)?;

    let disposition =
        memmem::find(body, CONTENT_DISPOSITION).ok_or(MultipartError::MissingContentDisposition)?;

    let name_start = memmem::find(&body[disposition..], FILENAME_MARKER)
        .map(|pos| disposition + pos + FILENAME_MARKER.len())
        .ok_or(MultipartError::MissingFileName)?;
    let name_len = memchr::memchr(b'"', &body[name_start..]).ok_or(MultipartError::EmptyFileName)?;
    let file_name = String::from_utf8_lossy(&body[name_start..name_start + name_len])
        .trim()
        .to_string();
    if file_name.is_empty() {
        return Err(MultipartError::EmptyFileName);
    }

    let data_start = memmem::find(&body[name_start..], HEADER_END)
        .map(|pos| name_start + pos + HEADER_END.len())
        .ok_or(MultipartError::MissingHeaderEnd)?;

    let data_end = payload_end(&body[data_start..], boundary)
        .map(|len| data_start + len)
        .unwrap_or(body.len());

    Ok(MultipartFile {
        file_name,
        data: data_start..data_end,
    })
}

/// 返回 payload 长度：截止到下一个 `\r\n--boundary`，或裸 `--boundary`。
fn payload_end(payload: &[u8], boundary: &str) -> Option<usize> {
    let delimiter = format!("\r\n--{boundary}");
    memmem::find(payload, delimiter.as_bytes())
        .or_else(|| memmem::find(payload, &delimiter.as_bytes()[2..]))
}
