use apm_alert::AlertService;
use apm_collector::{Collector, SUMMARY_PATH};
use apm_core::{ApmError, SummaryHandler};
use apm_notify::AlertHistory;
use apm_types::Point;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// 按角色装配的服务
#[derive(Clone, Default)]
pub struct AppState {
    pub alert: Option<Arc<AlertService>>,
    pub collector: Option<Arc<Collector>>,
    pub history: Option<Arc<AlertHistory>>,
}

/// 创建 API 路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // 告警端：接收采集端转发的分钟汇总
        .route(SUMMARY_PATH, post(receive_summary))
        // 采集端：接收原始数据点
        .route("/api/v1/points", post(receive_points))
        // 告警历史
        .route("/api/v1/alerts", get(list_alerts))
        .route("/api/v1/alerts/:alert_id", get(get_alert))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 健康检查
async fn health() -> &'static str {
    "OK"
}

fn unavailable(role: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": format!("{} role is not enabled on this instance", role) })),
    )
}

async fn receive_summary(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let Some(alert) = state.alert else {
        return unavailable("alert");
    };

    match alert.handle_summary(&body).await {
        Ok(queued) => (StatusCode::OK, Json(json!({ "queued": queued }))),
        Err(ApmError::Serialization(e)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e) => {
            warn!(error = %e, "Summary rejected");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn receive_points(
    State(state): State<AppState>,
    Json(points): Json<Vec<Point>>,
) -> impl IntoResponse {
    let Some(collector) = state.collector else {
        return unavailable("collector");
    };

    let received = points.len();
    let queued = collector.collect_all(points).await;
    (
        StatusCode::OK,
        Json(json!({ "received": received, "queued": queued })),
    )
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub app: Option<String>,
    pub limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> impl IntoResponse {
    let Some(history) = state.history else {
        return unavailable("alert");
    };

    let limit = query.limit.unwrap_or(100);
    let alerts = match query.app {
        Some(app) => {
            let mut alerts = history.by_app(&app).await;
            alerts.truncate(limit);
            alerts
        }
        None => history.recent(limit).await,
    };
    (StatusCode::OK, Json(json!({ "alerts": alerts })))
}

async fn get_alert(State(state): State<AppState>, Path(alert_id): Path<i64>) -> impl IntoResponse {
    let Some(history) = state.history else {
        return unavailable("alert");
    };

    match history.by_id(alert_id).await {
        Some(alert) => (StatusCode::OK, Json(json!(alert))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("alert {} not found", alert_id) })),
        ),
    }
}
