use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use tokio::io::ErrorKind;

use crate::atomic::is_temp_file_name;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将客户端文件名映射为根目录的直接子项。
    pub fn resolve_file(&self, name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(base_name(name)?))
    }

    /// 返回可下载文件的路径与元数据；符号链接与目录按不存在处理。
    pub async fn file_metadata(&self, name: &str) -> Result<(PathBuf, Metadata), StorageError> {
        let target = self.resolve_file(name)?;
        let metadata = fs::symlink_metadata(&target).await?;
        if !metadata.is_file() {
            return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
        }
        Ok((target, metadata))
    }

    pub async fn list_files(&self) -> Result<Vec<FileEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_temp_file_name(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // removed between read_dir and stat
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
                .map(format_timestamp);

            entries.push(FileEntry {
                name,
                size: metadata.len(),
                modified,
            });
        }

        entries.sort_by_key(|entry| entry.name.to_lowercase());
        Ok(entries)
    }
}

/// 取客户端文件名的最后一段，拒绝空名、`.`/`..` 与上传临时文件名。
pub fn base_name(name: &str) -> Result<&str, StorageError> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty()
        || last == "."
        || last == ".."
        || last.contains('\0')
        || is_temp_file_name(last)
    {
        return Err(StorageError::InvalidName);
    }
    Ok(last)
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file name")]
    InvalidName,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<String>,
}
