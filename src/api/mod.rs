//! Read-side HTTP API
//!
//! Latest prices, per-item history and engine health over JSON.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::{EngineStats, EngineStatsSnapshot};
use crate::query::{self, PriceView};
use crate::store::PriceStore;
use crate::types::ItemId;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// Standard response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn PriceStore>,
    pub stats: Arc<EngineStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine: EngineStatsSnapshot,
}

/// Create the API router with all endpoints
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/prices", get(get_prices))
        .route("/api/prices/:item/history", get(get_price_history))
        .route("/api/health", get(get_health))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// GET /api/prices - Latest price per item
async fn get_prices(State(state): State<ApiState>) -> impl IntoResponse {
    let latest = query::latest_prices(state.store.as_ref()).await;
    Json(ApiResponse::success(latest))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// GET /api/prices/:item/history?limit=50
async fn get_price_history(
    Path(item): Path<String>,
    Query(params): Query<HistoryQuery>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Json(ApiResponse::<Vec<PriceView>>::error(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }

    match query::price_history(state.store.as_ref(), &ItemId::new(item), limit).await {
        Ok(history) => Json(ApiResponse::success(history)),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

/// GET /api/health - Engine counters
async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        engine: state.stats.snapshot(),
    }))
}

/// Start the API server
pub async fn start_server(state: ApiState, bind: &str) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("Price API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::observation;
    use crate::store::InMemoryPriceStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    async fn state() -> ApiState {
        let store = Arc::new(InMemoryPriceStore::new());
        store.append(observation("Tata Salt 1kg", dec!(45.00), 1)).await.unwrap();
        store.append(observation("Tata Salt 1kg", dec!(42.50), 2)).await.unwrap();
        ApiState {
            store,
            stats: Arc::new(EngineStats::default()),
        }
    }

    async fn get_json(router: Router, uri: &str) -> serde_json::Value {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn prices_endpoint_returns_latest_as_strings() {
        let json = get_json(create_router(state().await), "/api/prices").await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["Tata Salt 1kg"]["price"], "42.50");
    }

    #[tokio::test]
    async fn history_endpoint_honours_limit_bounds() {
        let router = create_router(state().await);
        let json = get_json(router.clone(), "/api/prices/Tata%20Salt%201kg/history?limit=1").await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);

        let json = get_json(router, "/api/prices/Tata%20Salt%201kg/history?limit=501").await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn health_reports_engine_counters() {
        let json = get_json(create_router(state().await), "/api/health").await;
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["engine"]["dispatched"], 0);
    }
}
