//! Cross-site-request-forgery gate.
//!
//! Runs for every matched route ahead of the scoped-database layer. The
//! rule chain is evaluated in a fixed order and the first failing rule
//! terminates the request with 403 and `{"message": "CSRF failure: ..."}`.
//! CORS preflight requests on cross-origin paths are answered here and
//! never reach a handler.

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

const MULTIPART_PREFIX: &str = "multipart/form-data; boundary";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Paths that take file uploads instead of JSON bodies.
    pub upload_paths: Vec<String>,
    /// Paths that may be called from configured foreign origins.
    pub cross_origin_paths: Vec<String>,
    /// Origins accepted on cross-origin paths.
    pub cross_origin_origins: Vec<String>,
    /// Path prefixes exempt from all checks.
    pub ignore_paths: Vec<String>,
    /// Request headers accepted during preflight.
    pub allowed_request_headers: Vec<String>,
    /// Methods accepted during preflight.
    pub allowed_request_methods: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            upload_paths: Vec::new(),
            cross_origin_paths: Vec::new(),
            cross_origin_origins: Vec::new(),
            ignore_paths: Vec::new(),
            allowed_request_headers: vec!["content-type".to_string()],
            allowed_request_methods: vec!["POST".to_string()],
        }
    }
}

pub async fn csrf_middleware(
    State(cfg): State<Arc<CsrfConfig>>,
    req: Request,
    next: Next,
) -> Response {
    // Unmatched requests fall through to the router's 404.
    if req.extensions().get::<MatchedPath>().is_none() {
        return next.run(req).await;
    }
    let path = req.uri().path().to_string();

    if req.method() == Method::OPTIONS {
        if cfg.cross_origin_paths.contains(&path) {
            return preflight(&cfg, req.headers());
        }
        return next.run(req).await;
    }

    let mutating = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if !mutating || cfg.ignore_paths.iter().any(|p| path.starts_with(p)) {
        return next.run(req).await;
    }

    if let Err(reason) = csrf_checks(&cfg, req.headers(), &path) {
        tracing::info!(path, reason, "CSRF check failed");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": format!("CSRF failure: {reason}") })),
        )
            .into_response();
    }
    next.run(req).await
}

/// The ordered rule chain; the first failing rule wins.
fn csrf_checks(cfg: &CsrfConfig, headers: &HeaderMap, path: &str) -> Result<(), &'static str> {
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str());
    if cfg.upload_paths.iter().any(|p| p == path) {
        if !content_type.starts_with(MULTIPART_PREFIX) {
            return Err("upload path, wrong Content-Type");
        }
    } else if !content_type.starts_with("application/json") {
        return Err("Content-Type not application/json");
    }

    let origin = header_str(headers, header::ORIGIN.as_str());
    if origin.is_empty() {
        return Err("Origin missing");
    }

    let allowed: Vec<String> = if cfg.cross_origin_paths.iter().any(|p| p == path) {
        cfg.cross_origin_origins.clone()
    } else {
        serving_origin(headers).into_iter().collect()
    };
    if !allowed.iter().any(|a| a == origin) {
        return Err("Origin wrong");
    }

    let referer = header_str(headers, header::REFERER.as_str());
    let referer_ok = allowed
        .iter()
        .any(|a| referer == *a || referer.starts_with(&format!("{a}/")));
    if !referer_ok {
        return Err("Referer wrong");
    }
    Ok(())
}

/// Answer a CORS preflight directly.
fn preflight(cfg: &CsrfConfig, headers: &HeaderMap) -> Response {
    let method_ok = headers
        .get(header::ACCESS_CONTROL_REQUEST_METHOD)
        .and_then(|v| v.to_str().ok())
        .map(|m| {
            cfg.allowed_request_methods
                .iter()
                .any(|a| a.eq_ignore_ascii_case(m))
        })
        .unwrap_or(false);
    let requested = header_str(headers, header::ACCESS_CONTROL_REQUEST_HEADERS.as_str());
    let headers_ok = requested
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .all(|h| {
            cfg.allowed_request_headers
                .iter()
                .any(|a| a.eq_ignore_ascii_case(h))
        });

    if method_ok && headers_ok {
        (
            StatusCode::OK,
            [
                (
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    requested.to_string(),
                ),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
            ],
            "ok",
        )
            .into_response()
    } else {
        (
            StatusCode::FORBIDDEN,
            [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string())],
            Json(json!({ "message": "Access-Control checks failed" })),
        )
            .into_response()
    }
}

/// scheme+host+port this request was served on. TLS termination happens
/// upstream, so the scheme is plain http here.
fn serving_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| format!("http://{host}"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}
