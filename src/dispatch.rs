//! 请求分发：计数、日志、并发上限、认证与路由。

use axum::body::Body as AxumBody;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use axum::{Router, middleware};
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, error, info, info_span};

use crate::auth::{auth_middleware, is_auth_exempt_path};
use crate::error::{ApiError, HandlerFailure};
use crate::http::{add_security_headers, client_label};
use crate::state::AppState;
use crate::{files, monitor, upload};

/// 构建完整的路由与中间件栈。
pub fn build_router(state: AppState) -> Router {
    with_middleware(Router::new().fallback(route), state)
}

/// 由内到外：panic 捕获、认证、计数与日志、安全头、trace。
fn with_middleware(router: Router<AppState>, state: AppState) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = client_label(request),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

/// 请求计数与日志，并统计带 `HandlerFailure` 标记的响应。
pub async fn track_request(
    State(state): State<AppState>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    let total = state.counters.record_request();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    info!(client_ip = client_label(&req), request = total, "{method} {path}");

    let _permit = match state.limiter.as_deref() {
        Some(limiter) => limiter.acquire().await.ok(),
        None => None,
    };

    let response = next.run(req).await;
    let status = response.status().as_u16();
    if let Some(HandlerFailure(reason)) = response.extensions().get::<HandlerFailure>() {
        let errors = state.counters.record_error();
        error!(%method, path, status, errors, error = %reason, "request failed");
    } else {
        debug!(%method, path, status, "request complete");
    }
    response
}

/// 按方法与路径分发到处理器。
pub async fn route(State(state): State<AppState>, req: Request<AxumBody>) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();
    let method = &parts.method;

    if is_auth_exempt_path(path) {
        return monitor::monitor(&state).into_response();
    }
    if method == Method::GET && path == "/" {
        return files::index(&state).await.into_response();
    }
    if method == Method::GET && path.starts_with("/download") {
        return files::download(&state, &parts.uri).await.into_response();
    }
    if method == Method::POST && path == "/upload" {
        return upload::upload(&state, &parts.headers, body)
            .await
            .into_response();
    }
    if method == Method::GET || method == Method::POST {
        return ApiError::NotFound("not found".into()).into_response();
    }
    ApiError::MethodNotAllowed.into_response()
}

/// 将处理器 panic 转为 500 响应。
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{StatusCode, header};
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::logging::LogSink;

    const BOUNDARY: &str = "----filedrop-test";

    fn make_state(password: Option<&str>) -> (tempfile::TempDir, AppState) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("shared");
        std::fs::create_dir_all(&root).expect("create serving root");
        let mut config = ServerConfig::for_dir(root);
        config.password = password.map(str::to_string);
        config.max_concurrent_requests = 4;
        (temp, AppState::new(config))
    }

    fn get(uri: &str) -> Request<AxumBody> {
        Request::get(uri).body(AxumBody::empty()).expect("request")
    }

    fn upload_request(file_name: &str, payload: &[u8]) -> Request<AxumBody> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request")
    }

    async fn send(state: &AppState, request: Request<AxumBody>) -> Response {
        build_router(state.clone())
            .oneshot(request)
            .await
            .expect("infallible")
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    async fn monitor_json(state: &AppState) -> Value {
        let response = send(state, get("/monitor")).await;
        assert_eq!(response.status(), StatusCode::OK);
        serde_json::from_slice(&body_bytes(response).await).expect("json")
    }

    fn file_names(state: &AppState) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(state.storage.root_path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn monitor_is_public_when_password_is_set() {
        let (_temp, state) = make_state(Some("pw"));
        let json = monitor_json(&state).await;
        assert_eq!(json, serde_json::json!({"totalRequests": 1, "errorCount": 0}));

        let response = send(&state, get("/MONITOR")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn monitor_counts_itself_but_not_as_error() {
        let (_temp, state) = make_state(None);
        assert_eq!(monitor_json(&state).await["totalRequests"], 1);
        let second = monitor_json(&state).await;
        assert_eq!(second["totalRequests"], 2);
        assert_eq!(second["errorCount"], 0);
    }

    #[tokio::test]
    async fn gated_routes_require_credentials() {
        let (_temp, state) = make_state(Some("pw"));

        let response = send(&state, get("/")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Basic realm="FileDrop""#
        );
        assert_eq!(body_bytes(response).await, b"unauthorized");

        let wrong = Request::get("/")
            .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode("u:nope")))
            .body(AxumBody::empty())
            .expect("request");
        assert_eq!(send(&state, wrong).await.status(), StatusCode::UNAUTHORIZED);

        let unknown = send(&state, get("/nowhere")).await;
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

        let authorized = Request::get("/")
            .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode("u:pw")))
            .body(AxumBody::empty())
            .expect("request");
        let response = send(&state, authorized).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .expect("content type")
                .starts_with("text/html")
        );

        assert_eq!(
            state.counters.snapshot(),
            crate::state::CounterSnapshot {
                total_requests: 4,
                error_count: 0,
            }
        );
    }

    #[tokio::test]
    async fn unknown_paths_and_methods() {
        let (_temp, state) = make_state(None);
        let cases = [
            (Method::GET, "/nope", StatusCode::NOT_FOUND),
            (Method::POST, "/nope", StatusCode::NOT_FOUND),
            (Method::GET, "/upload", StatusCode::NOT_FOUND),
            (Method::POST, "/", StatusCode::NOT_FOUND),
            (Method::DELETE, "/", StatusCode::METHOD_NOT_ALLOWED),
            (Method::PUT, "/upload", StatusCode::METHOD_NOT_ALLOWED),
        ];
        for (method, uri, expected) in cases {
            let request = Request::builder()
                .method(method.clone())
                .uri(uri)
                .body(AxumBody::empty())
                .expect("request");
            let response = send(&state, request).await;
            assert_eq!(response.status(), expected, "{method} {uri}");
            assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        }
        assert_eq!(state.counters.snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn upload_then_download_round_trip() {
        let (_temp, state) = make_state(None);
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let response = send(&state, upload_request("f.bin", &payload)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let response = send(&state, get("/download?file=f.bin")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            r#"attachment; filename="f.bin""#
        );
        assert_eq!(body_bytes(response).await, payload);

        let listing = body_bytes(send(&state, get("/")).await).await;
        assert!(String::from_utf8_lossy(&listing).contains("f.bin"));
    }

    #[tokio::test]
    async fn download_of_missing_file_leaves_root_untouched() {
        let (_temp, state) = make_state(None);
        std::fs::write(state.storage.root_path().join("keep.txt"), b"k").expect("seed");
        let before = file_names(&state);

        let response = send(&state, get("/download?file=missing.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&state, get("/download")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(file_names(&state), before);
        assert_eq!(state.counters.snapshot().error_count, 0);
    }

    #[tokio::test]
    async fn bad_uploads_are_client_errors() {
        let (_temp, state) = make_state(None);
        let plain = Request::post("/upload")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(AxumBody::from("x"))
            .expect("request");
        assert_eq!(send(&state, plain).await.status(), StatusCode::BAD_REQUEST);

        let no_file = Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nb\r\n--{BOUNDARY}--"
            )))
            .expect("request");
        let response = send(&state, no_file).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_bytes(response).await, b"no file part in body");

        assert_eq!(state.counters.snapshot().error_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_are_all_counted() {
        let (_temp, state) = make_state(None);
        let taken = state.storage.root_path().join("taken");
        std::fs::create_dir(&taken).expect("mkdir");
        std::fs::write(taken.join("inner"), b"x").expect("seed inner");

        let mut tasks = Vec::new();
        for i in 0..60 {
            let request = match i % 3 {
                0 => get("/"),
                1 => get("/download?file=missing.bin"),
                _ => upload_request("taken", b"collides with a directory"),
            };
            let router = build_router(state.clone());
            tasks.push(tokio::spawn(async move {
                router.oneshot(request).await.expect("infallible").status()
            }));
        }
        let statuses: Vec<StatusCode> = futures_util::future::join_all(tasks)
            .await
            .into_iter()
            .map(|result| result.expect("task"))
            .collect();

        let failures = statuses
            .iter()
            .filter(|status| **status == StatusCode::INTERNAL_SERVER_ERROR)
            .count();
        assert_eq!(failures, 20);
        assert_eq!(
            statuses
                .iter()
                .filter(|status| **status == StatusCode::NOT_FOUND)
                .count(),
            20
        );
        assert_eq!(
            state.counters.snapshot(),
            crate::state::CounterSnapshot {
                total_requests: 60,
                error_count: 20,
            }
        );
    }

    #[tokio::test]
    async fn upload_with_temp_prefix_is_listed() {
        let (_temp, state) = make_state(None);
        let response = send(&state, upload_request(".filedrop-upload-x", b"kept")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let listing = body_bytes(send(&state, get("/")).await).await;
        assert!(String::from_utf8_lossy(&listing).contains(".filedrop-upload-x"));
        let response = send(&state, get("/download?file=.filedrop-upload-x")).await;
        assert_eq!(body_bytes(response).await, b"kept");
    }

    #[tokio::test]
    async fn request_line_is_logged_before_auth_rejects() {
        let temp = tempdir().expect("tempdir");
        let log_path = temp.path().join("server.log");
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(LogSink::open(&log_path))
            .finish();
        let (_root, state) = make_state(Some("pw"));

        let guard = tracing::subscriber::set_default(subscriber);
        let response = send(&state, get("/secret/path")).await;
        let rejected = Request::post("/upload")
            .body(AxumBody::empty())
            .expect("request");
        let second = send(&state, rejected).await;
        drop(guard);

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
        let log = std::fs::read_to_string(&log_path).expect("read log");
        assert!(log.contains("GET /secret/path"), "{log}");
        assert!(log.contains("POST /upload"), "{log}");
    }

    async fn explode() -> Response {
        panic!("boom")
    }

    #[tokio::test]
    async fn handler_panic_is_counted_by_the_router() {
        let (_temp, state) = make_state(None);
        let router = with_middleware(Router::new().fallback(explode), state.clone());

        let response = router.oneshot(get("/")).await.expect("infallible");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_bytes(response).await, b"internal server error");
        assert_eq!(
            state.counters.snapshot(),
            crate::state::CounterSnapshot {
                total_requests: 1,
                error_count: 1,
            }
        );
    }

    #[test]
    fn panics_become_counted_failures() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let failure = response
            .extensions()
            .get::<HandlerFailure>()
            .expect("failure marker");
        assert_eq!(failure.0, "handler panicked: boom");
    }
}
