//! Reusable HTTP service building blocks.
//!
//! Two pieces with real machinery live here:
//!
//! - the BREAD engine ([`bread::Bread`]): five generic CRUD operations
//!   generated from a declared [`shape::Shape`], with pagination, conflict
//!   translation and OPTIONS introspection;
//! - the middleware pipeline ([`middleware`]): structured error/logging
//!   shaping, a rule-based CSRF gate and scoped database checkout.
//!
//! Everything else an application needs (process bootstrap, settings,
//! static files) is deliberately left to the application.

pub mod bread;
pub mod error;
pub mod middleware;
pub mod scope;
pub mod shape;

pub use bread::{Bread, BreadHook, Op, RouteDef};
pub use error::{ApiError, ApiResult, DiagnosticProvider, FieldDetail};
pub use scope::{Identity, RequestScope, ScopedDb};
pub use shape::{Field, FieldKind, Shape, ValidationMode};
