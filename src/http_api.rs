use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::logstore::{Bucket, LogSink, SearchFilter};
use crate::mapping::MappingStore;
use crate::metrics::ProxyMetrics;

/// HTTP adapter: read-only metrics plus the custom-mapping mutation
/// surface, built from the same component handles the DNS pipeline
/// uses so the two surfaces never drift. No dashboard UI or auth layer
/// sits in front of this router.
#[derive(Clone)]
struct AppState {
    mapping: Arc<MappingStore>,
    metrics: Arc<ProxyMetrics>,
    sink: Arc<dyn LogSink>,
}

pub fn router(mapping: Arc<MappingStore>, metrics: Arc<ProxyMetrics>, sink: Arc<dyn LogSink>) -> Router {
    let state = AppState {
        mapping,
        metrics,
        sink,
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/overview", get(overview))
        .route("/api/mappings", get(list_mappings).put(put_mapping))
        .route("/api/mappings/{domain}", delete(delete_mapping))
        .route("/api/logs/search", get(search_logs))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

async fn overview(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(snapshot) = state.sink.get_snapshot().await {
        return Json(json!({
            "overview": snapshot.overview,
            "time_series": {
                "requests_last_hour": snapshot.requests_last_hour,
                "requests_last_day": snapshot.requests_last_day,
                "requests_last_week": snapshot.requests_last_week,
                "requests_last_month": snapshot.requests_last_month,
            },
            "top_clients": snapshot.top_clients,
            "query_types": snapshot.query_types,
            "system_info": snapshot.system_info,
        }))
        .into_response();
    }

    // Cache miss or not yet seeded: recompute directly.
    let overview = state.sink.overview().await;
    let requests_last_hour = state.sink.time_series(Bucket::Minute, 75).await;
    Json(json!({
        "overview": overview,
        "time_series": { "requests_last_hour": requests_last_hour },
    }))
    .into_response()
}

async fn list_mappings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.mapping.get_all())
}

#[derive(Deserialize)]
struct PutMappingRequest {
    domain: String,
    ip: Ipv4Addr,
}

async fn put_mapping(
    State(state): State<AppState>,
    Json(request): Json<PutMappingRequest>,
) -> impl IntoResponse {
    state.mapping.put(&request.domain, request.ip);
    info!(domain = %request.domain, ip = %request.ip, "custom mapping updated via API");
    StatusCode::NO_CONTENT
}

async fn delete_mapping(State(state): State<AppState>, Path(domain): Path<String>) -> Response {
    match state.mapping.delete(&domain) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => (StatusCode::NOT_FOUND, Json(json!({"error": "mapping not found"}))).into_response(),
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    domain: Option<String>,
    client_ip: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn search_logs(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> impl IntoResponse {
    let filter = SearchFilter {
        domain: query.domain,
        client_ip: query.client_ip,
        since: None,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };

    let (records, total) = state.sink.search(filter).await;
    Json(json!({"records": records, "total": total}))
}

/// Bind address is an explicit config knob (`http_bind_addr`); `None`
/// disables the adapter entirely.
pub async fn serve(bind_addr: SocketAddr, router: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "HTTP API adapter listening");
    axum::serve(listener, router).await
}
