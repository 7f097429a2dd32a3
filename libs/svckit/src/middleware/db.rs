//! Scoped database checkout.
//!
//! One transaction per request, attached to request extensions as
//! [`ScopedDb`] and released on every exit path: committed when the final
//! status is below 400, rolled back otherwise. A per-application predicate
//! decides whether a request gets a connection at all; when it declines,
//! the extension is simply absent.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::scope::ScopedDb;

pub type DbCheck = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct DbLayerState {
    db: svckit_db::Db,
    check: DbCheck,
}

impl DbLayerState {
    /// Checkout for every request.
    pub fn new(db: svckit_db::Db) -> Self {
        Self {
            db,
            check: Arc::new(|_| true),
        }
    }

    pub fn with_check(db: svckit_db::Db, check: DbCheck) -> Self {
        Self { db, check }
    }
}

pub async fn db_middleware(
    State(state): State<DbLayerState>,
    mut req: Request,
    next: Next,
) -> Response {
    if !(state.check)(&req) {
        return next.run(req).await;
    }

    let tx = match state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let scoped = ScopedDb::new(tx);
    req.extensions_mut().insert(scoped.clone());

    let response = next.run(req).await;

    // Reclaim and release; drop-rollback covers the path where the
    // transaction was consumed some other way.
    if let Some(tx) = scoped.take().await {
        let released = if response.status().as_u16() < 400 {
            tx.commit().await
        } else {
            tx.rollback().await
        };
        if let Err(e) = released {
            tracing::error!(error = %e, "failed to release scoped transaction");
            return ApiError::internal(e).into_response();
        }
    }
    response
}
