//! 进程级共享状态：请求计数器与配置。

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::storage::Storage;

/// 请求总数与处理器失败数，只增不减。
#[derive(Debug, Default)]
pub struct RequestCounters {
    total_requests: AtomicU64,
    error_count: AtomicU64,
}

/// `/monitor` 返回的计数快照。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub total_requests: u64,
    pub error_count: u64,
}

impl RequestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次请求，返回递增后的总数。
    pub fn record_request(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 记录一次处理器内部失败，返回递增后的错误数。
    pub fn record_error(&self) -> u64 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

/// 注入到路由中的共享状态。
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub counters: Arc<RequestCounters>,
    pub storage: Arc<Storage>,
    pub limiter: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let limiter = match config.max_concurrent_requests {
            0 => None,
            permits => Some(Arc::new(Semaphore::new(permits))),
        };
        Self {
            storage: Arc::new(Storage::new(config.serve_dir.clone())),
            config: Arc::new(config),
            counters: Arc::new(RequestCounters::new()),
            limiter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_camel_case_keys() {
        let counters = RequestCounters::new();
        counters.record_request();
        counters.record_request();
        counters.record_error();
        let json = serde_json::to_string(&counters.snapshot()).expect("serialize");
        assert_eq!(json, r#"{"totalRequests":2,"errorCount":1}"#);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counters = Arc::new(RequestCounters::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record_request();
                    }
                    counters.record_error();
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("join");
        }
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                total_requests: 8000,
                error_count: 8,
            }
        );
    }
}
