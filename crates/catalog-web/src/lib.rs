//! Axum JSON surface over the product query service and the reconciler.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use catalog_core::{PagedResult, Product, ProductForm};
use catalog_storage::{ProductQueryService, QueryError};
use catalog_sync::{Reconciler, SyncOutcome, SyncReport, SyncState};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "catalog-web";

#[derive(Clone)]
pub struct AppState {
    pub queries: ProductQueryService,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(queries: ProductQueryService, reconciler: Arc<Reconciler>) -> Self {
        Self {
            queries,
            reconciler,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Query(QueryError),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Query(QueryError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("product {id} not found"))
            }
            ApiError::Query(QueryError::Storage(err)) => {
                error!(error = %err, "storage error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "product store unavailable".to_string(),
                )
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    page: Option<i64>,
    size: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchQuery {
    title: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PageBody {
    #[serde(flatten)]
    page: PagedResult<Product>,
    total_pages: u64,
}

#[derive(Debug, Serialize)]
struct DeleteBody {
    id: i64,
    deleted: u64,
}

#[derive(Debug, Serialize)]
struct SyncStatusBody {
    #[serde(flatten)]
    state: SyncState,
    last_report: Option<SyncReport>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/products", get(list_handler).post(create_handler))
        .route("/products/search", get(search_handler))
        .route("/products/recent", get(recent_handler))
        .route(
            "/products/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route("/sync", post(sync_handler))
        .route("/sync/status", get(sync_status_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves. In-flight requests are drained before returning.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "catalog web listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<PageBody> {
    let page = state
        .queries
        .list_page(query.page.unwrap_or(0), query.size.unwrap_or(0))
        .await?;
    Ok(Json(PageBody {
        total_pages: page.total_pages(),
        page,
    }))
}

async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<Product>> {
    let results = state
        .queries
        .search(query.title.as_deref(), query.limit.unwrap_or(0))
        .await?;
    Ok(Json(results))
}

async fn recent_handler(State(state): State<AppState>) -> ApiResult<Vec<Product>> {
    Ok(Json(state.queries.recent().await?))
}

async fn get_handler(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Product> {
    Ok(Json(state.queries.get(id).await?))
}

async fn create_handler(
    State(state): State<AppState>,
    Json(form): Json<ProductForm>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = state.queries.create(form).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<ProductForm>,
) -> ApiResult<Product> {
    Ok(Json(state.queries.update(id, form).await?))
}

async fn delete_handler(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<DeleteBody> {
    let deleted = state.queries.delete(id).await?;
    Ok(Json(DeleteBody { id, deleted }))
}

/// Runs the cycle on its own task; dropping the request does not cancel it.
async fn sync_handler(State(state): State<AppState>) -> Response {
    let reconciler = state.reconciler.clone();
    let outcome = match tokio::spawn(async move { reconciler.run_cycle().await }).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "sync task did not complete");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "sync task did not complete" })),
            )
                .into_response();
        }
    };
    match outcome {
        SyncOutcome::Completed(report) => (StatusCode::OK, Json(report)).into_response(),
        SyncOutcome::Failed { run_id, error } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "run_id": run_id, "message": error.to_string() })),
        )
            .into_response(),
        SyncOutcome::Skipped => (
            StatusCode::CONFLICT,
            Json(json!({ "message": "a sync cycle is already running" })),
        )
            .into_response(),
    }
}

async fn sync_status_handler(State(state): State<AppState>) -> Json<SyncStatusBody> {
    Json(SyncStatusBody {
        state: state.reconciler.state(),
        last_report: state.reconciler.last_report(),
    })
}
