//! Outermost error/logging layer.
//!
//! Times the request, buffers request and (on failure) response bodies,
//! and emits exactly one structured [`RequestLog`] per non-whitelisted
//! failure through a pluggable [`RequestLogger`]. Request buffering is
//! capped at the configured maximum size; an oversized body is rejected
//! with 413 here, since this is the only place the body is read whole.
//! Response bodies are never rewritten; whatever the pipeline produced
//! flows back out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::error::{ApiError, ExceptionExtra};
use crate::scope::RequestScope;

/// Response text kept in a log record.
const RESPONSE_TEXT_LIMIT: usize = 1024;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    /// Decoded body text, `None` when the body is not valid UTF-8.
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserInfo {
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseInfo {
    pub status: u16,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogExtra {
    /// Wall-clock duration in seconds.
    pub request_duration: f64,
    pub response: ResponseInfo,
    /// Present for internal errors: the diagnostic data of the failure, or
    /// null when the error exposes none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_extra: Option<Option<Value>>,
}

/// One structured record per failed request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestLog {
    pub message: String,
    /// (route template, status) pair grouping related failures.
    pub fingerprint: (String, String),
    pub request: RequestInfo,
    pub user: UserInfo,
    pub extra: LogExtra,
}

/// Sink for request records. Must never fail into the request path.
pub trait RequestLogger: Send + Sync {
    fn log(&self, record: &RequestLog);
}

/// Default sink: one warning event per record.
pub struct TracingLogger;

impl RequestLogger for TracingLogger {
    fn log(&self, record: &RequestLog) {
        let payload = serde_json::to_string(record).unwrap_or_default();
        tracing::warn!(
            target: "svckit::request",
            fingerprint_route = %record.fingerprint.0,
            fingerprint_status = %record.fingerprint.1,
            payload = %payload,
            "{}",
            record.message
        );
    }
}

#[derive(Clone)]
pub struct LogLayerState {
    logger: Arc<dyn RequestLogger>,
    max_request_size: usize,
}

impl LogLayerState {
    pub fn new(logger: Arc<dyn RequestLogger>) -> Self {
        Self {
            logger,
            max_request_size: super::DEFAULT_MAX_REQUEST_SIZE,
        }
    }

    /// Cap on how much request body this layer will buffer; anything
    /// larger is rejected with 413 before a handler runs.
    pub fn max_request_size(mut self, limit: usize) -> Self {
        self.max_request_size = limit;
        self
    }
}

impl Default for LogLayerState {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger))
    }
}

pub async fn log_middleware(
    State(state): State<LogLayerState>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let (mut parts, body) = req.into_parts();

    let scope = RequestScope::new();
    parts.extensions.insert(scope.clone());

    let route = parts
        .extensions
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string());
    let path = parts.uri.path().to_string();
    let method = parts.method.to_string();
    let ip_address = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string())
        .unwrap_or_else(|| "-".to_string());

    // Buffering stops at the cap; a body we could not read in full never
    // reaches a handler.
    let body_bytes = axum::body::to_bytes(body, state.max_request_size)
        .await
        .ok();
    let request_info = build_request_info(&parts, body_bytes.as_deref());

    let response = match body_bytes {
        Some(bytes) => {
            let req = Request::from_parts(parts, Body::from(bytes));
            next.run(req).await
        }
        None => ApiError::ContentTooLarge.into_response(),
    };

    let duration = start.elapsed().as_secs_f64();
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return response;
    }
    // 404 for a route that never existed is noise, not a failure.
    if status == StatusCode::NOT_FOUND && route.is_none() {
        return response;
    }

    let (rparts, rbody) = response.into_parts();
    let rbytes = axum::body::to_bytes(rbody, usize::MAX)
        .await
        .unwrap_or_default();
    let text = String::from_utf8(rbytes.to_vec())
        .ok()
        .map(|t| truncate(&t, RESPONSE_TEXT_LIMIT));
    let exception_extra = rparts
        .extensions
        .get::<ExceptionExtra>()
        .map(|e| e.0.clone());

    let record = RequestLog {
        message: format!("{method} {path} {}", status.as_u16()),
        fingerprint: (
            route.unwrap_or_else(|| "unmatched".to_string()),
            status.as_u16().to_string(),
        ),
        request: request_info,
        user: UserInfo {
            ip_address,
            username: scope.identity().map(|i| i.username),
        },
        extra: LogExtra {
            request_duration: duration,
            response: ResponseInfo {
                status: status.as_u16(),
                text,
            },
            exception_extra,
        },
    };
    state.logger.log(&record);

    Response::from_parts(rparts, Body::from(rbytes))
}

fn build_request_info(parts: &Parts, body: Option<&[u8]>) -> RequestInfo {
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect();
    let cookies = parts
        .headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(parse_cookies)
        .unwrap_or_default();
    RequestInfo {
        url: request_url(parts),
        method: parts.method.to_string(),
        headers,
        cookies,
        data: body.and_then(|b| String::from_utf8(b.to_vec()).ok()),
    }
}

fn request_url(parts: &Parts) -> String {
    if parts.uri.authority().is_some() {
        return parts.uri.to_string();
    }
    match parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
    {
        Some(host) => format!("http://{host}{}", parts.uri),
        None => parts.uri.to_string(),
    }
}

fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
