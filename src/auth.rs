//! Basic 认证校验与认证中间件。

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::{body::Body as AxumBody, middleware};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

const BASIC_PREFIX: &str = "Basic ";

/// 校验 Basic 认证头中的密码，忽略用户名。
pub fn validate(header_value: &str, expected_password: &str) -> bool {
    let Some(encoded) = header_value.strip_prefix(BASIC_PREFIX) else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Some(colon) = decoded.iter().position(|&byte| byte == b':') else {
        return false;
    };
    constant_time_eq(&decoded[colon + 1..], expected_password.as_bytes())
}

/// 等长时逐字节比较全部内容，不因首个不同字节提前返回。
fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// 认证中间件：配置了密码时校验 Basic 认证，`/monitor` 始终放行。
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    let Some(password) = state.config.password.as_deref() else {
        return Ok(next.run(req).await);
    };
    if is_auth_exempt_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| validate(value, password));
    if authorized {
        return Ok(next.run(req).await);
    }

    debug!(path = req.uri().path(), "rejected credentials");
    let mut headers = HeaderMap::new();
    let challenge = format!(r#"Basic realm="{}""#, state.config.realm.replace('"', ""));
    headers.insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_str(&challenge)
            .unwrap_or_else(|_| HeaderValue::from_static(r#"Basic realm="FileDrop""#)),
    );
    Err(ApiError::Unauthorized(headers))
}

pub fn is_auth_exempt_path(path: &str) -> bool {
    path.eq_ignore_ascii_case("/monitor")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(credentials: &str) -> String {
        format!("Basic {}", STANDARD.encode(credentials))
    }

    #[test]
    fn accepts_matching_password() {
        assert!(validate(&basic("user:pw"), "pw"));
        assert!(validate(&basic("anyone:pw"), "pw"));
    }

    #[test]
    fn password_may_contain_colons() {
        assert!(validate(&basic("user:a:b"), "a:b"));
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(!validate("Basic bogus!", "pw"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(!validate("Bearer xyz", "pw"));
        assert!(!validate(&basic("user:pw").replace("Basic", "basic"), "pw"));
    }

    #[test]
    fn rejects_credentials_without_colon() {
        assert!(!validate(&basic("user"), "pw"));
    }

    #[test]
    fn rejects_wrong_password() {
        assert!(!validate(&basic("user:pW"), "pw"));
        assert!(!validate(&basic("user:pw2"), "pw"));
        assert!(!validate(&basic("user:"), "pw"));
    }

    #[test]
    fn monitor_is_exempt_case_insensitively() {
        assert!(is_auth_exempt_path("/monitor"));
        assert!(is_auth_exempt_path("/MONITOR"));
        assert!(!is_auth_exempt_path("/monitor/x"));
        assert!(!is_auth_exempt_path("/"));
    }
}
