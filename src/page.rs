//! 文件列表页面渲染。

use htmlescape::encode_minimal;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write;

use crate::storage::FileEntry;

/// 查询参数值中保留不编码的字符。
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const HEADER: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>FileDrop</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; }
td, th { padding: 0.25em 1em; text-align: left; }
td.size { text-align: right; }
</style>
</head>
<body>
<h1>Files</h1>
"#;

const UPLOAD_FORM: &str = r#"<h2>Upload</h2>
<form action="/upload" method="post" enctype="multipart/form-data">
<input type="file" name="file" required>
<button type="submit">Upload</button>
</form>
</body>
</html>
"#;

/// 下载链接：文件名按查询参数编码。
pub fn download_href(name: &str) -> String {
    format!("/download?file={}", utf8_percent_encode(name, QUERY_VALUE))
}

pub fn render_index(entries: &[FileEntry]) -> String {
    let mut html = String::from(HEADER);
    if entries.is_empty() {
        html.push_str("<p>No files yet.</p>\n");
    } else {
        html.push_str("<table>\n<tr><th>Name</th><th>Size</th><th>Modified (UTC)</th></tr>\n");
        for entry in entries {
            let _ = writeln!(
                html,
                r#"<tr><td><a href="{}">{}</a></td><td class="size">{}</td><td>{}</td></tr>"#,
                encode_minimal(&download_href(&entry.name)),
                encode_minimal(&entry.name),
                entry.size,
                entry.modified.as_deref().unwrap_or("-"),
            );
        }
        html.push_str("</table>\n");
    }
    html.push_str(UPLOAD_FORM);
    html
}
