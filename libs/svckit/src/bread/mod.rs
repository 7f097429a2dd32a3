//! The BREAD engine: Browse/Read/Edit/Add/Delete over a declared shape.
//!
//! A [`Bread`] binds a [`Shape`] to a storage table and generates the five
//! generic operations plus OPTIONS introspection. Resources are declared
//! once at startup and hold no per-request state; every operation reads its
//! scoped transaction from request extensions.

mod handlers;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{request::Parts, Method},
    routing::{get, options, post, MethodRouter},
    Router,
};

use crate::error::ApiResult;
use crate::shape::Shape;

/// The generated operations. `Describe` is derived, not enabled directly:
/// it exists wherever the add or item routes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Browse,
    Read,
    Add,
    Edit,
    Delete,
    Describe,
}

/// Pre-operation hook. An `Err` short-circuits with the hook's status and
/// body before the generic implementation runs.
#[async_trait]
pub trait BreadHook: Send + Sync {
    async fn check(&self, op: Op, parts: &Parts) -> ApiResult<()> {
        let _ = (op, parts);
        Ok(())
    }
}

struct NoHook;

#[async_trait]
impl BreadHook for NoHook {}

/// One generated route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub op: Op,
    pub method: Method,
    pub path: String,
}

/// A declared CRUD resource.
#[derive(Clone)]
pub struct Bread {
    shape: Shape,
    table: String,
    pk_field: String,
    display_name: String,
    page_size: i64,
    ops: Vec<Op>,
    hook: Arc<dyn BreadHook>,
}

pub const DEFAULT_PAGE_SIZE: i64 = 5;

impl Bread {
    /// Declare a resource with no operations enabled.
    pub fn new(table: &str, shape: Shape) -> Self {
        Self {
            shape,
            table: table.to_string(),
            pk_field: "id".to_string(),
            display_name: default_display_name(table),
            page_size: DEFAULT_PAGE_SIZE,
            ops: Vec::new(),
            hook: Arc::new(NoHook),
        }
    }

    pub fn pk_field(mut self, name: &str) -> Self {
        self.pk_field = name.to_string();
        self
    }

    /// Name used in human-readable messages, e.g. `"Organisation 1 deleted"`.
    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn page_size(mut self, size: i64) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn BreadHook>) -> Self {
        self.hook = hook;
        self
    }

    fn enable(mut self, op: Op) -> Self {
        if !self.ops.contains(&op) {
            self.ops.push(op);
        }
        self
    }

    pub fn browse(self) -> Self {
        self.enable(Op::Browse)
    }

    pub fn read(self) -> Self {
        self.enable(Op::Read)
    }

    pub fn add(self) -> Self {
        self.enable(Op::Add)
    }

    pub fn edit(self) -> Self {
        self.enable(Op::Edit)
    }

    pub fn delete(self) -> Self {
        self.enable(Op::Delete)
    }

    pub fn enable_all(self) -> Self {
        self.browse().read().add().edit().delete()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    fn enabled(&self, op: Op) -> bool {
        self.ops.contains(&op)
    }

    /// The routes this resource generates under `prefix`. A resource with
    /// no enabled operations generates none.
    pub fn routes(&self, prefix: &str) -> Vec<RouteDef> {
        let prefix = prefix.trim_end_matches('/');
        let list = format!("{prefix}/");
        let add = format!("{prefix}/add/");
        let item = format!("{prefix}/{{pk}}/");
        let del = format!("{prefix}/{{pk}}/delete/");

        let mut defs = Vec::new();
        let mut push = |op, method, path: &str| {
            defs.push(RouteDef {
                op,
                method,
                path: path.to_string(),
            })
        };
        if self.enabled(Op::Browse) {
            push(Op::Browse, Method::GET, &list);
        }
        if self.enabled(Op::Read) {
            push(Op::Read, Method::GET, &item);
        }
        if self.enabled(Op::Add) {
            push(Op::Add, Method::POST, &add);
            push(Op::Describe, Method::OPTIONS, &add);
        }
        if self.enabled(Op::Edit) {
            push(Op::Edit, Method::POST, &item);
        }
        if self.enabled(Op::Delete) {
            push(Op::Delete, Method::POST, &del);
        }
        if self.enabled(Op::Read) || self.enabled(Op::Edit) {
            push(Op::Describe, Method::OPTIONS, &item);
        }
        defs
    }

    /// Build the router for this resource mounted at `prefix`.
    pub fn router(&self, prefix: &str) -> Router {
        let state = Arc::new(self.clone());
        let mut router: Router<Arc<Bread>> = Router::new();
        for def in self.routes(prefix) {
            let mr: MethodRouter<Arc<Bread>> = match def.op {
                Op::Browse => get(handlers::browse),
                Op::Read => get(handlers::read),
                Op::Add => post(handlers::add),
                Op::Edit => post(handlers::edit),
                Op::Delete => post(handlers::delete),
                Op::Describe => options(handlers::describe),
            };
            router = router.route(&def.path, mr);
        }
        router.with_state(state)
    }
}

/// "organisations" -> "Organisation"
fn default_display_name(table: &str) -> String {
    let singular = table.strip_suffix('s').unwrap_or(table);
    let mut chars = singular.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
