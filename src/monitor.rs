//! 请求计数查询接口。

use axum::response::Json as JsonResponse;

use crate::state::{AppState, CounterSnapshot};

/// 返回当前计数；无需认证，不会失败。
pub fn monitor(state: &AppState) -> JsonResponse<CounterSnapshot> {
    JsonResponse(state.counters.snapshot())
}
