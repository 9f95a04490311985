//! HTTP API.
//!
//! A thin JSON layer over the core: request validation happens here, the
//! core assumes validated input. The list/stats/search endpoints share their
//! implementation with the tool surface ([`crate::tools`]), so both return
//! identical shapes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Status and version |
//! | `GET` | `/api/knowledge-bases` | List knowledge bases |
//! | `GET` | `/api/knowledge-bases/{name}` | Stats for one knowledge base |
//! | `GET` | `/api/knowledge-bases/{name}/chunk-sets` | Chunk sets by ingestion timestamp |
//! | `POST` | `/api/knowledge-bases/{name}/rename` | Rename, body `{ "new_name" }` |
//! | `DELETE` | `/api/knowledge-bases/{name}` | Delete |
//! | `DELETE` | `/api/knowledge-bases/{name}/chunk-sets/{timestamp}` | Delete one chunk set |
//! | `POST` | `/api/ingest` | Ingest, body `{ "name", "root", "dry_run"? }` |
//! | `POST` | `/api/search` | Search, body `{ "query", "knowledge_base"?, "language"?, "max_results"? }` |
//! | `GET` | `/tools/list` | Tool descriptors |
//! | `POST` | `/tools/{name}` | Call a tool |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "knowledge base not found: docs" } }
//! ```
//!
//! Codes: `bad_request` (400), `embeddings_disabled` (400), `not_found` (404),
//! `conflict` (409), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::context::AppContext;
use crate::error::{EmbeddingError, InvalidRequest, StoreError};
use crate::ingest::{ingest, IngestOptions, IngestReport};
use crate::lifecycle::{ChunkSetInfo, RenameReport};
use crate::search::{SearchRequest, SearchResponse};
use crate::tools::{self, validate_name, ToolRegistry};

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    tools: Arc<ToolRegistry>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let state = AppState {
        ctx,
        tools: Arc::new(ToolRegistry::with_builtins()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/knowledge-bases", get(handle_list))
        .route(
            "/api/knowledge-bases/{name}",
            get(handle_stats).delete(handle_delete),
        )
        .route(
            "/api/knowledge-bases/{name}/chunk-sets",
            get(handle_chunk_sets),
        )
        .route(
            "/api/knowledge-bases/{name}/chunk-sets/{timestamp}",
            axum::routing::delete(handle_delete_chunk_set),
        )
        .route("/api/knowledge-bases/{name}/rename", post(handle_rename))
        .route("/api/ingest", post(handle_ingest))
        .route("/api/search", post(handle_search))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .layer(cors)
        .with_state(state)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");
    println!("docmem listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Map typed errors anywhere in the chain to a status; everything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<StoreError>() {
                match e {
                    StoreError::NotFound { .. } => {
                        return Self::new(StatusCode::NOT_FOUND, "not_found", message)
                    }
                    StoreError::AlreadyExists { .. } => {
                        return Self::new(StatusCode::CONFLICT, "conflict", message)
                    }
                    StoreError::Invalid(_) => return Self::bad_request(message),
                    _ => {}
                }
            }
            if cause.downcast_ref::<InvalidRequest>().is_some() {
                return Self::bad_request(message);
            }
            if let Some(EmbeddingError::Disabled) = cause.downcast_ref::<EmbeddingError>() {
                return Self::new(StatusCode::BAD_REQUEST, "embeddings_disabled", message);
            }
        }
        error!(error = %message, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<InvalidRequest> for AppError {
    fn from(err: InvalidRequest) -> Self {
        Self::bad_request(err.0)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_list(State(state): State<AppState>) -> ApiResult<Value> {
    Ok(Json(tools::list_knowledge_bases(&state.ctx).await?))
}

async fn handle_stats(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Value> {
    Ok(Json(tools::knowledge_base_stats(&state.ctx, &name).await?))
}

#[derive(Serialize)]
struct ChunkSetsResponse {
    knowledge_base: String,
    chunk_sets: Vec<ChunkSetInfo>,
}

async fn handle_chunk_sets(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ChunkSetsResponse> {
    validate_name("name", &name)?;
    let chunk_sets = state.ctx.lifecycle.chunk_sets(&name).await?;
    Ok(Json(ChunkSetsResponse {
        knowledge_base: name,
        chunk_sets,
    }))
}

#[derive(Deserialize)]
struct RenameBody {
    new_name: String,
}

async fn handle_rename(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<RenameBody>, JsonRejection>,
) -> ApiResult<RenameReport> {
    let Json(body) = body?;
    validate_name("new_name", &body.new_name)?;
    Ok(Json(state.ctx.lifecycle.rename(&name, &body.new_name).await?))
}

async fn handle_delete(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Value> {
    validate_name("name", &name)?;
    state.ctx.lifecycle.delete(&name).await?;
    Ok(Json(json!({ "deleted": name })))
}

async fn handle_delete_chunk_set(
    State(state): State<AppState>,
    Path((name, timestamp)): Path<(String, String)>,
) -> ApiResult<Value> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| AppError::bad_request(format!("timestamp must be an integer, got '{}'", timestamp)))?;
    let removed = state.ctx.lifecycle.delete_chunk_set(&name, ts).await?;
    Ok(Json(json!({
        "knowledge_base": name,
        "ingestion_timestamp": ts,
        "removed": removed,
    })))
}

#[derive(Deserialize)]
struct IngestBody {
    name: String,
    root: PathBuf,
    #[serde(default)]
    dry_run: bool,
}

async fn handle_ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestBody>, JsonRejection>,
) -> ApiResult<IngestReport> {
    let Json(body) = body?;
    validate_name("name", &body.name)?;
    if !body.root.is_dir() {
        return Err(AppError::bad_request(format!(
            "root is not a directory: {}",
            body.root.display()
        )));
    }
    let report = ingest(
        &state.ctx,
        &body.name,
        &body.root,
        &IngestOptions {
            dry_run: body.dry_run,
        },
    )
    .await?;
    Ok(Json(report))
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<SearchResponse> {
    let Json(request) = body?;
    Ok(Json(tools::search_knowledge_bases(&state.ctx, &request).await?))
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(state.tools.descriptors())
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let tool = state.tools.find(&name).ok_or_else(|| {
        AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no tool registered with name: {}", name),
        )
    })?;
    let Json(params) = body?;
    if !params.is_object() {
        return Err(AppError::bad_request("tool parameters must be a JSON object"));
    }
    let result = tool.execute(params, &state.ctx).await?;
    Ok(Json(json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn spawn(ctx: AppContext) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(ctx));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn docs_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("readme.md"),
            "# Readme\n\nDeploy with the release script.\n",
        )
        .unwrap();
        tmp
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn(AppContext::in_memory_for_tests()).await;
        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ingest_search_rename_delete() {
        let tree = docs_tree();
        let base = spawn(AppContext::in_memory_for_tests()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/ingest", base))
            .json(&json!({ "name": "docs", "root": tree.path() }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let report: Value = resp.json().await.unwrap();
        assert_eq!(report["files_indexed"], 1);

        let found: Value = client
            .post(format!("{}/api/search", base))
            .json(&json!({ "query": "release script", "knowledge_base": "docs" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(found["total_results"], 1);

        let resp = client
            .post(format!("{}/api/knowledge-bases/docs/rename", base))
            .json(&json!({ "new_name": "handbook" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let resp = client
            .get(format!("{}/api/knowledge-bases/docs", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");

        let resp = client
            .delete(format!("{}/api/knowledge-bases/handbook", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let listed: Value = client
            .get(format!("{}/api/knowledge-bases", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["knowledge_bases"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let base = spawn(AppContext::in_memory_for_tests()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/api/search", base))
            .json(&json!({ "query": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(format!("{}/api/search", base))
            .json(&json!({ "query": "x", "max_results": 1000 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .delete(format!("{}/api/knowledge-bases/docs/chunk-sets/yesterday", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(format!("{}/api/knowledge-bases/docs/rename", base))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_rename_conflict_is_409() {
        let tree = docs_tree();
        let ctx = AppContext::in_memory_for_tests();
        ingest(&ctx, "a", tree.path(), &IngestOptions::default()).await.unwrap();
        ingest(&ctx, "b", tree.path(), &IngestOptions::default()).await.unwrap();
        let base = spawn(ctx).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/knowledge-bases/a/rename", base))
            .json(&json!({ "new_name": "b" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
    }

    #[tokio::test]
    async fn test_tools_endpoints() {
        let base = spawn(AppContext::in_memory_for_tests()).await;
        let client = reqwest::Client::new();

        let listed: Value = client
            .get(format!("{}/tools/list", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["tools"].as_array().unwrap().len(), 3);

        let called: Value = client
            .post(format!("{}/tools/list_knowledge_bases", base))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(called["result"]["knowledge_bases"].is_array());

        let resp = client
            .post(format!("{}/tools/unknown", base))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }
}
