//! Shared harness: an assembled pipeline over an in-memory database, a
//! capturing log sink and request helpers.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Extension, Path, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use svckit::middleware::{self, CsrfConfig, DbCheck, DbLayerState, LogLayerState};
use svckit::middleware::{RequestLog, RequestLogger};
use svckit::{ApiError, ApiResult, Bread, BreadHook, Field, Identity, Op, RequestScope, Shape, ScopedDb};
use svckit_db::{ConnectOpts, Db};

pub struct CapturingLogger(pub Arc<Mutex<Vec<RequestLog>>>);

impl RequestLogger for CapturingLogger {
    fn log(&self, record: &RequestLog) {
        self.0.lock().push(record.clone());
    }
}

/// Rejects any request carrying `bad=1`, mimicking a permission hook.
pub struct DemoHook;

#[async_trait]
impl BreadHook for DemoHook {
    async fn check(&self, _op: Op, parts: &Parts) -> ApiResult<()> {
        if parts.uri.query().is_some_and(|q| q.contains("bad=1")) {
            return Err(ApiError::bad_request("very bad"));
        }
        Ok(())
    }
}

pub fn org_shape() -> Shape {
    Shape::new("Model")
        .field(Field::str("name"))
        .field(Field::str("slug").max_length(10))
}

pub fn org_bread() -> Bread {
    Bread::new("organisations", org_shape())
        .hook(Arc::new(DemoHook))
        .enable_all()
}

pub async fn test_db() -> Db {
    let db = Db::connect("sqlite::memory:", ConnectOpts::in_memory())
        .await
        .expect("in-memory database");
    db.execute_script(
        "CREATE TABLE organisations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT UNIQUE
        )",
    )
    .await
    .expect("schema");
    db
}

pub struct TestApp {
    pub router: Router,
    pub records: Arc<Mutex<Vec<RequestLog>>>,
    pub db: Db,
}

impl TestApp {
    pub async fn request(&self, req: Request) -> Response {
        self.router.clone().oneshot(req).await.expect("infallible")
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }
}

pub async fn build_app() -> TestApp {
    build_app_with_check(None).await
}

pub async fn build_app_with_check(check: Option<DbCheck>) -> TestApp {
    let db = test_db().await;
    let records = Arc::new(Mutex::new(Vec::new()));
    let log_state = LogLayerState::new(Arc::new(CapturingLogger(records.clone())));
    let csrf = Arc::new(CsrfConfig {
        upload_paths: vec!["/upload-path/".into()],
        cross_origin_paths: vec!["/exec/".into()],
        cross_origin_origins: vec!["http://other.example.com".into()],
        ..CsrfConfig::default()
    });
    let db_state = match check {
        Some(check) => DbLayerState::with_check(db.clone(), check),
        None => DbLayerState::new(db.clone()),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/errors/{do}", get(errors))
        .route("/status/{status}/", get(status_view))
        .route("/user/", get(user_view))
        .route("/exec/", post(ok_view))
        .route("/upload-path/", post(ok_view))
        .route("/request-context/", get(request_context))
        .merge(org_bread().router("/orgs"));
    let router = middleware::apply(
        router,
        log_state,
        csrf,
        db_state,
        middleware::DEFAULT_MAX_REQUEST_SIZE,
    );
    TestApp {
        router,
        records,
        db,
    }
}

async fn index() -> &'static str {
    "index"
}

#[derive(Debug, thiserror::Error)]
#[error("synthetic failure")]
struct SyntheticError;

impl svckit::DiagnosticProvider for SyntheticError {
    fn diagnostic_extra(&self) -> Option<Value> {
        None
    }
}

async fn errors(
    Path(what): Path<String>,
    Extension(scope): Extension<RequestScope>,
) -> ApiResult<Response> {
    match what.as_str() {
        "500" => {
            scope.set_identity(Identity {
                username: "foobar".into(),
            });
            Ok((StatusCode::INTERNAL_SERVER_ERROR, "custom 500 error").into_response())
        }
        "return_499" => Err(ApiError::Status {
            status: StatusCode::from_u16(499).expect("supported status"),
            message: "499".into(),
        }),
        "value_error" => {
            scope.set_identity(Identity {
                username: "foobar".into(),
            });
            Err(ApiError::internal_from(SyntheticError))
        }
        _ => Ok("ok".into_response()),
    }
}

async fn status_view(
    Path(status): Path<u16>,
    Extension(scope): Extension<RequestScope>,
) -> ApiResult<Response> {
    scope.set_identity(Identity {
        username: "foobar".into(),
    });
    let status =
        StatusCode::from_u16(status).map_err(|_| ApiError::bad_request("unknown status"))?;
    Err(ApiError::Status {
        status,
        message: format!("test response with status {}", status.as_u16()),
    })
}

async fn user_view(Extension(scope): Extension<RequestScope>) -> ApiResult<Response> {
    scope.set_identity(Identity {
        username: "foobar".into(),
    });
    Err(ApiError::Status {
        status: StatusCode::from_u16(488).expect("supported status"),
        message: "hello there".into(),
    })
}

async fn ok_view() -> &'static str {
    "ok"
}

async fn request_context(scoped: Option<Extension<ScopedDb>>) -> Json<Value> {
    let mut obj = serde_json::Map::new();
    if scoped.is_some() {
        obj.insert("conn".into(), json!(true));
    }
    Json(Value::Object(obj))
}

/// GET with the client address attached, the way a real listener would.
pub fn get_req(path: &str) -> Request {
    req_with_body("GET", path, Body::empty(), &[])
}

pub fn req_with_body(method: &str, path: &str, body: Body, headers: &[(&str, &str)]) -> Request {
    let mut builder = axum::http::Request::builder()
        .method(method)
        .uri(path)
        .header("host", "127.0.0.1");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut req = builder.body(body).expect("request");
    req.extensions_mut().insert(ConnectInfo(SocketAddr::from((
        [127, 0, 0, 1],
        52100,
    ))));
    req
}

/// POST a JSON document with the same-origin headers a browser would send.
pub fn post_json(path: &str, body: &str) -> Request {
    req_with_body(
        "POST",
        path,
        Body::from(body.to_string()),
        &[
            ("content-type", "application/json"),
            ("origin", "http://127.0.0.1"),
            ("referer", "http://127.0.0.1/page/"),
        ],
    )
}

pub async fn body_json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}
