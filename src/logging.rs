//! 日志初始化与控制台 + 文件双写的日志汇。

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 同时写入控制台与日志文件的日志汇，整行写入在同一把锁内完成。
#[derive(Debug)]
pub struct LogSink {
    file: Mutex<Option<File>>,
}

impl LogSink {
    /// 以追加模式打开日志文件；打开失败时仅输出到控制台。
    pub fn open(path: &Path) -> Self {
        let file = OpenOptions::new().create(true).append(true).open(path).ok();
        Self {
            file: Mutex::new(file),
        }
    }

    /// 仅输出到控制台的日志汇。
    #[cfg(test)]
    pub fn console_only() -> Self {
        Self {
            file: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 持有日志锁的一次写入。
pub struct LogSinkWriter<'a> {
    file: MutexGuard<'a, Option<File>>,
}

impl Write for LogSinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(buf);
        }
        let _ = io::stdout().lock().write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        let _ = io::stdout().flush();
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSinkWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogSinkWriter { file: self.lock() }
    }
}

/// 初始化 tracing 日志订阅：默认 info，可由 RUST_LOG 覆盖。
pub fn init_logging(sink: LogSink) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink),
        )
        .init();
}
