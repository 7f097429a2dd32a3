//! Generic operation handlers. Each one runs the pre-operation hook, reads
//! the scoped transaction out of request extensions, and raises typed
//! [`ApiError`]s that the outer pipeline renders.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use sqlx::{sqlite::SqliteRow, Row};
use svckit_db::{unique_violation_column, ScopedTx};

use crate::error::{ApiError, ApiResult};
use crate::scope::ScopedDb;
use crate::shape::{FieldKind, ValidationMode};

use super::{Bread, Op};

/// Upper bound on a buffered JSON body; anything larger is not a BREAD
/// payload.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

pub(super) async fn browse(
    State(bread): State<Arc<Bread>>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> ApiResult<Response> {
    let (parts, _) = req.into_parts();
    bread.hook.check(Op::Browse, &parts).await?;
    let page = match params.get("page") {
        None => 1,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ApiError::bad_request(format!("invalid page '{raw}'")))?,
    };

    let db = scoped_db(&parts)?;
    let mut guard = db.lock().await;
    let tx = tx_mut(&mut guard)?;

    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", bread.table))
        .fetch_one(&mut **tx)
        .await?;
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT ? OFFSET ?",
        bread.columns_sql(),
        bread.table,
        bread.pk_field
    );
    // any page >= 1 is valid; far past the last row it selects nothing
    let offset = (page - 1).saturating_mul(bread.page_size);
    let rows = sqlx::query(&sql)
        .bind(bread.page_size)
        .bind(offset)
        .fetch_all(&mut **tx)
        .await?;
    let items = rows
        .iter()
        .map(|row| bread.row_json(row))
        .collect::<ApiResult<Vec<_>>>()?;
    let pages = if count == 0 {
        0
    } else {
        (count + bread.page_size - 1) / bread.page_size
    };
    Ok(Json(json!({ "items": items, "count": count, "pages": pages })).into_response())
}

pub(super) async fn read(
    State(bread): State<Arc<Bread>>,
    Path(pk): Path<i64>,
    req: Request,
) -> ApiResult<Response> {
    let (parts, _) = req.into_parts();
    bread.hook.check(Op::Read, &parts).await?;

    let db = scoped_db(&parts)?;
    let mut guard = db.lock().await;
    let tx = tx_mut(&mut guard)?;

    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?",
        bread.columns_sql(),
        bread.table,
        bread.pk_field
    );
    let row = sqlx::query(&sql)
        .bind(pk)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| bread.not_found())?;
    Ok(Json(bread.row_json(&row)?).into_response())
}

pub(super) async fn add(State(bread): State<Arc<Bread>>, req: Request) -> ApiResult<Response> {
    let (parts, body) = req.into_parts();
    bread.hook.check(Op::Add, &parts).await?;
    let data = decode_object(body).await?;
    let cleaned = bread
        .shape
        .validate(&data, ValidationMode::Full)
        .map_err(ApiError::InvalidData)?;

    let db = scoped_db(&parts)?;
    let mut guard = db.lock().await;
    let tx = tx_mut(&mut guard)?;

    let sql = if cleaned.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            bread.table, bread.pk_field
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            bread.table,
            cleaned
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; cleaned.len()].join(", "),
            bread.pk_field
        )
    };
    let mut q = sqlx::query(&sql);
    for (_, value) in &cleaned {
        q = bind_value(q, value);
    }
    let row = q.fetch_one(&mut **tx).await.map_err(translate_db_err)?;
    let pk: i64 = row.try_get(0)?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "ok", "pk": pk }))).into_response())
}

pub(super) async fn edit(
    State(bread): State<Arc<Bread>>,
    Path(pk): Path<i64>,
    req: Request,
) -> ApiResult<Response> {
    let (parts, body) = req.into_parts();
    bread.hook.check(Op::Edit, &parts).await?;
    let data = decode_object(body).await?;
    if data.is_empty() {
        return Err(ApiError::bad_request("no data to save"));
    }
    let cleaned = bread
        .shape
        .validate(&data, ValidationMode::Partial)
        .map_err(ApiError::InvalidData)?;
    if cleaned.is_empty() {
        return Err(ApiError::bad_request("no data to save"));
    }

    let db = scoped_db(&parts)?;
    let mut guard = db.lock().await;
    let tx = tx_mut(&mut guard)?;

    let assignments = cleaned
        .iter()
        .map(|(name, _)| format!("{name} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        bread.table, assignments, bread.pk_field
    );
    let mut q = sqlx::query(&sql);
    for (_, value) in &cleaned {
        q = bind_value(q, value);
    }
    let result = q.bind(pk).execute(&mut **tx).await.map_err(translate_db_err)?;
    if result.rows_affected() == 0 {
        return Err(bread.not_found());
    }
    Ok(Json(json!({ "status": "ok" })).into_response())
}

pub(super) async fn delete(
    State(bread): State<Arc<Bread>>,
    Path(pk): Path<i64>,
    req: Request,
) -> ApiResult<Response> {
    let (parts, _) = req.into_parts();
    bread.hook.check(Op::Delete, &parts).await?;

    let db = scoped_db(&parts)?;
    let mut guard = db.lock().await;
    let tx = tx_mut(&mut guard)?;

    let sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        bread.table, bread.pk_field
    );
    let result = sqlx::query(&sql).bind(pk).execute(&mut **tx).await?;
    if result.rows_affected() == 0 {
        return Err(bread.not_found());
    }
    Ok(Json(json!({
        "message": format!("{} {} deleted", bread.display_name, pk),
        "pk": pk,
    }))
    .into_response())
}

pub(super) async fn describe(State(bread): State<Arc<Bread>>, req: Request) -> ApiResult<Response> {
    let (parts, _) = req.into_parts();
    bread.hook.check(Op::Describe, &parts).await?;
    Ok(Json(bread.shape.json_schema()).into_response())
}

impl Bread {
    fn columns_sql(&self) -> String {
        let mut cols = vec![self.pk_field.clone()];
        cols.extend(self.shape.fields().iter().map(|f| f.name().to_string()));
        cols.join(", ")
    }

    fn not_found(&self) -> ApiError {
        ApiError::NotFound(format!("{} not found", self.display_name))
    }

    fn row_json(&self, row: &SqliteRow) -> ApiResult<Value> {
        let mut obj = Map::new();
        let pk: i64 = row.try_get(self.pk_field.as_str())?;
        obj.insert(self.pk_field.clone(), json!(pk));
        for field in self.shape.fields() {
            let value = match field.kind() {
                FieldKind::Str { .. } => row
                    .try_get::<Option<String>, _>(field.name())?
                    .map_or(Value::Null, Value::String),
                FieldKind::Int => row
                    .try_get::<Option<i64>, _>(field.name())?
                    .map_or(Value::Null, |v| json!(v)),
                FieldKind::Float => row
                    .try_get::<Option<f64>, _>(field.name())?
                    .map_or(Value::Null, |v| json!(v)),
                FieldKind::Bool => row
                    .try_get::<Option<bool>, _>(field.name())?
                    .map_or(Value::Null, |v| json!(v)),
            };
            obj.insert(field.name().to_string(), value);
        }
        Ok(Value::Object(obj))
    }
}

fn scoped_db(parts: &Parts) -> ApiResult<ScopedDb> {
    parts
        .extensions
        .get::<ScopedDb>()
        .cloned()
        .ok_or_else(|| ApiError::internal(anyhow!("no database connection in request scope")))
}

fn tx_mut<'a>(guard: &'a mut Option<ScopedTx>) -> ApiResult<&'a mut ScopedTx> {
    guard
        .as_mut()
        .ok_or_else(|| ApiError::internal(anyhow!("scoped transaction already released")))
}

async fn decode_object(body: Body) -> ApiResult<Map<String, Value>> {
    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|e| ApiError::internal(anyhow!("failed to read request body: {e}")))?;
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|_| ApiError::bad_request("Invalid JSON"))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::bad_request("data not a dictionary")),
    }
}

fn translate_db_err(err: sqlx::Error) -> ApiError {
    match unique_violation_column(&err) {
        Some(field) => ApiError::Conflict { field },
        None => ApiError::internal(err),
    }
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else {
                q.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => q.bind(s.clone()),
        other => q.bind(other.to_string()),
    }
}
