//! Reference item store HTTP server.
//!
//! A small SQLite-backed implementation of the item API that `csync sync`
//! talks to, so the tool can be used and tested end to end.
//!
//! # Endpoints
//!
//! | Method  | Path | Description |
//! |---------|------|-------------|
//! | `GET`   | `/health` | Health check (returns version) |
//! | `GET`   | `/items` | Paginated inventory summaries, tombstones included |
//! | `PATCH` | `/items` | Batch upsert, all-or-nothing |
//! | `GET`   | `/items/{name}` | One full item |
//!
//! # Pagination
//!
//! `GET /items?page_size=N&page_token=T` returns items ordered by name.
//! When more rows exist the response carries `X-Next-Page-Token`; the
//! token is the hex-encoded last name of the page.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "item 3 has an empty name" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::migrate::migrate_pool;
use crate::models::{Item, Properties, RemoteItem};
use crate::remote::{CORRELATION_HEADER, NEXT_PAGE_HEADER};

const DEFAULT_PAGE_SIZE: usize = 200;
const MAX_PAGE_SIZE: usize = 1000;
const MAX_BATCH_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
}

/// Starts the item server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("item server listening on http://{}", bind_addr);

    axum::serve(listener, router(pool)).await?;
    Ok(())
}

/// The full route table over an already-migrated pool.
pub fn router(pool: SqlitePool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/items", get(handle_list_items).patch(handle_upsert_items))
        .route("/items/{*name}", get(handle_get_item))
        .layer(DefaultBodyLimit::max(MAX_BATCH_BYTES))
        .layer(cors)
        .with_state(AppState { pool })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: impl std::fmt::Display) -> AppError {
    error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

fn correlation_id(headers: &HeaderMap) -> &str {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /items ============

#[derive(Deserialize)]
struct ListParams {
    page_size: Option<usize>,
    page_token: Option<String>,
}

type SummaryRow = (String, String, i64, Option<i64>, String, i64);

async fn handle_list_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<(HeaderMap, Json<Vec<RemoteItem>>), AppError> {
    let page_size = params
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let after = match params.page_token.as_deref() {
        Some(token) => decode_page_token(token)?,
        None => String::new(),
    };

    // One extra row tells us whether another page exists.
    let mut rows: Vec<SummaryRow> = sqlx::query_as(
        "SELECT name, hash, update_time, delete_time, display_name, create_time
         FROM items WHERE name > ? ORDER BY name LIMIT ?",
    )
    .bind(&after)
    .bind(page_size as i64 + 1)
    .fetch_all(&state.pool)
    .await
    .map_err(internal)?;

    let has_more = rows.len() > page_size;
    rows.truncate(page_size);

    let mut response_headers = HeaderMap::new();
    if has_more {
        if let Some((last, ..)) = rows.last() {
            let name = HeaderName::from_bytes(NEXT_PAGE_HEADER.as_bytes()).map_err(internal)?;
            let value = HeaderValue::from_str(&hex::encode(last)).map_err(internal)?;
            response_headers.insert(name, value);
        }
    }

    info!(
        correlation_id = correlation_id(&headers),
        count = rows.len(),
        has_more,
        "listed items"
    );

    let items = rows
        .into_iter()
        .map(
            |(name, hash, update_time, delete_time, display_name, create_time)| RemoteItem {
                name,
                hash,
                update_time: from_millis(update_time),
                delete_time: delete_time.map(from_millis),
                display_name: Some(display_name),
                create_time: Some(from_millis(create_time)),
            },
        )
        .collect();

    Ok((response_headers, Json(items)))
}

fn decode_page_token(token: &str) -> Result<String, AppError> {
    hex::decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| bad_request(format!("invalid page_token: '{}'", token)))
}

// ============ PATCH /items ============

#[derive(Serialize)]
struct UpsertResponse {
    applied: usize,
}

async fn handle_upsert_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(items): Json<Vec<Item>>,
) -> Result<Json<UpsertResponse>, AppError> {
    for (i, item) in items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(bad_request(format!("item {} has an empty name", i)));
        }
        if item.hash.trim().is_empty() {
            return Err(bad_request(format!("item '{}' has an empty hash", item.name)));
        }
    }

    let mut tx = state.pool.begin().await.map_err(internal)?;
    let mut tombstones = 0usize;

    for item in &items {
        let properties = serde_json::to_string(&item.properties).map_err(internal)?;
        let metadata = serde_json::to_string(&item.metadata).map_err(internal)?;

        if let Some(deleted) = item.delete_time {
            tombstones += 1;
            let updated = sqlx::query(
                "UPDATE items SET delete_time = ?, update_time = ? WHERE name = ?",
            )
            .bind(deleted.timestamp_millis())
            .bind(item.update_time.timestamp_millis())
            .bind(&item.name)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;

            if updated.rows_affected() > 0 {
                continue;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO items (name, display_name, content, hash, create_time, update_time,
                               delete_time, properties_json, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                display_name = excluded.display_name,
                content = excluded.content,
                hash = excluded.hash,
                create_time = excluded.create_time,
                update_time = excluded.update_time,
                delete_time = excluded.delete_time,
                properties_json = excluded.properties_json,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&item.name)
        .bind(&item.display_name)
        .bind(&item.content)
        .bind(&item.hash)
        .bind(item.create_time.timestamp_millis())
        .bind(item.update_time.timestamp_millis())
        .bind(item.delete_time.map(|t| t.timestamp_millis()))
        .bind(properties)
        .bind(metadata)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
    }

    tx.commit().await.map_err(internal)?;

    info!(
        correlation_id = correlation_id(&headers),
        count = items.len(),
        tombstones,
        "applied batch"
    );
    Ok(Json(UpsertResponse {
        applied: items.len(),
    }))
}

// ============ GET /items/{name} ============

type ItemRow = (String, String, String, String, i64, i64, Option<i64>, String, String);

async fn handle_get_item(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Item>, AppError> {
    let row: Option<ItemRow> = sqlx::query_as(
        "SELECT name, display_name, content, hash, create_time, update_time, delete_time,
                properties_json, metadata_json
         FROM items WHERE name = ?",
    )
    .bind(&name)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal)?;

    let (name, display_name, content, hash, create_time, update_time, delete_time, props, meta) =
        row.ok_or_else(|| not_found(format!("no item named '{}'", name)))?;

    let properties: Properties = serde_json::from_str(&props).map_err(internal)?;
    let metadata: Properties = serde_json::from_str(&meta).map_err(internal)?;

    Ok(Json(Item {
        name,
        display_name,
        content,
        hash,
        create_time: from_millis(create_time),
        update_time: from_millis(update_time),
        properties,
        metadata,
        delete_time: delete_time.map(from_millis),
    }))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
