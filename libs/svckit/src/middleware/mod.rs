//! The request middleware pipeline.
//!
//! Per-request control flow: error/logging (which also enforces the body
//! size cap) -> CSRF -> scoped database -> handler, with the response
//! re-shaped only by the layer that produced it.

pub mod csrf;
pub mod db;
pub mod log;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, Router};

pub use csrf::{csrf_middleware, CsrfConfig};
pub use db::{db_middleware, DbCheck, DbLayerState};
pub use log::{log_middleware, LogLayerState, RequestLog, RequestLogger, TracingLogger};

/// Default cap on request body size.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Apply the standard pipeline to a router, outermost layer last.
pub fn apply(
    router: Router,
    log: LogLayerState,
    csrf: Arc<CsrfConfig>,
    db: DbLayerState,
    max_request_size: usize,
) -> Router {
    router
        .layer(from_fn_with_state(db, db_middleware))
        .layer(from_fn_with_state(csrf, csrf_middleware))
        .layer(from_fn_with_state(
            log.max_request_size(max_request_size),
            log_middleware,
        ))
}
