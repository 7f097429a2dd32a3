//! Error taxonomy for the HTTP surface.
//!
//! Every failure renders as `{"message": <string>, "details"?: [...]}`.
//! Handlers return [`ApiError`] through `?`; the body is finalized here and
//! never rewritten by an outer layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

/// A single field-level error, `loc`/`msg`/`type` plus optional context.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldDetail {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Value>,
}

impl FieldDetail {
    pub fn new(loc: &str, msg: &str, kind: &str) -> Self {
        Self {
            loc: vec![loc.to_string()],
            msg: msg.to_string(),
            kind: kind.to_string(),
            ctx: None,
        }
    }

    pub fn with_ctx(mut self, ctx: Value) -> Self {
        self.ctx = Some(ctx);
        self
    }
}

/// Optional capability for errors that carry supplementary diagnostic data.
///
/// Absence is a normal, checked case; a `None` is recorded as null by the
/// logging layer, never treated as a failure.
pub trait DiagnosticProvider {
    fn diagnostic_extra(&self) -> Option<Value>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid Data")]
    InvalidData(Vec<FieldDetail>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Conflict")]
    Conflict { field: String },

    #[error("Request Entity Too Large")]
    ContentTooLarge,

    /// Caller-chosen status with a caller-chosen message (488, 499, 503...).
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// Unexpected failure. The client gets a fixed generic body; the full
    /// detail is preserved only in the structured log record.
    #[error("internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
        extra: Option<Value>,
    },
}

/// Marker attached to internal-error responses so the logging layer can
/// record `exception_extra` without re-inspecting the error.
#[derive(Debug, Clone)]
pub struct ExceptionExtra(pub Option<Value>);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        ApiError::Internal {
            source: source.into(),
            extra: None,
        }
    }

    /// Internal error with its diagnostic data captured at construction.
    pub fn internal_from<E>(source: E) -> Self
    where
        E: std::error::Error + DiagnosticProvider + Send + Sync + 'static,
    {
        let extra = source.diagnostic_extra();
        ApiError::Internal {
            source: source.into(),
            extra,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidData(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::ContentTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Status { status, .. } => *status,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Vec<FieldDetail>> {
        match self {
            ApiError::InvalidData(details) => Some(details.clone()),
            ApiError::Conflict { field } => Some(vec![FieldDetail::new(
                field,
                &format!("This value conflicts with an existing \"{field}\", try something else."),
                "value_error.conflict",
            )]),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(source: anyhow::Error) -> Self {
        ApiError::internal(source)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(source: sqlx::Error) -> Self {
        ApiError::internal(source)
    }
}

impl From<svckit_db::DbError> for ApiError {
    fn from(source: svckit_db::DbError) -> Self {
        ApiError::internal(source)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Internal { source, .. } => {
                tracing::error!(error = ?source, "unexpected internal error");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        let mut body = json!({ "message": message });
        if let Some(details) = self.details() {
            body["details"] = json!(details);
        }
        let mut resp = (status, Json(body)).into_response();
        if let ApiError::Internal { extra, .. } = self {
            resp.extensions_mut().insert(ExceptionExtra(extra));
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
