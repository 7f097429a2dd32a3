//! Per-request mutable state.
//!
//! The logging layer inserts a [`RequestScope`] into request extensions at
//! the outermost point of the pipeline; inner layers and handlers attach
//! the authenticated identity to it, and the logging layer reads it back
//! once the response is known. The scoped database transaction travels as
//! its own extension ([`ScopedDb`]) so its absence can be observed as a
//! plain missing key.

use std::sync::Arc;

use parking_lot::Mutex;
use svckit_db::ScopedTx;

/// Authenticated identity attached by an auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

#[derive(Debug, Default)]
struct ScopeInner {
    identity: Option<Identity>,
}

/// Request-scoped context, owned exclusively by one request.
#[derive(Debug, Clone, Default)]
pub struct RequestScope(Arc<Mutex<ScopeInner>>);

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_identity(&self, identity: Identity) {
        self.0.lock().identity = Some(identity);
    }

    pub fn identity(&self) -> Option<Identity> {
        self.0.lock().identity.clone()
    }
}

/// The scoped database transaction for this request.
///
/// The middleware that checked it out takes it back after the handler runs;
/// the `Option` is `None` only in that brief window.
#[derive(Clone)]
pub struct ScopedDb(Arc<tokio::sync::Mutex<Option<ScopedTx>>>);

impl ScopedDb {
    pub fn new(tx: ScopedTx) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(Some(tx))))
    }

    /// Lock the transaction for the duration of a handler's work.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Option<ScopedTx>> {
        self.0.lock().await
    }

    /// Reclaim the transaction for release.
    pub async fn take(&self) -> Option<ScopedTx> {
        self.0.lock().await.take()
    }
}
