// HTTP request handlers
use crate::application::dashboard_service::RefreshWindow;
use crate::application::state_store::DashboardState;
use crate::domain::color_rule::{ColorRule, Operator};
use crate::domain::geo::GeoPoint;
use crate::domain::polygon::{DrawingDraft, Polygon, PolygonId};
use crate::domain::timeline::{QuickRange, Timeline};
use crate::infrastructure::chunked_events::stream_from_receiver;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use crate::presentation::error::ApiError;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Serialize)]
struct StateResponse {
    loading: bool,
    #[serde(flatten)]
    state: DashboardState,
}

#[derive(Deserialize)]
pub struct FinishDrawingRequest {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Deserialize, Default)]
pub struct RefreshQuery {
    #[serde(default)]
    pub window: RefreshWindow,
}

#[derive(Deserialize)]
pub struct SelectSourceRequest {
    pub id: String,
}

#[derive(Deserialize)]
pub struct RuleRequest {
    pub operator: Operator,
    pub threshold: f64,
    pub color: String,
}

#[derive(Deserialize)]
pub struct WindowRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct RangeModeRequest {
    pub range_mode: bool,
}

#[derive(Deserialize)]
pub struct QuickSelectRequest {
    pub range: QuickRange,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Full dashboard state snapshot
pub async fn get_state(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.dashboard_service.state();
    let body = StateResponse {
        loading: snapshot.loading(),
        state: snapshot,
    };

    match json_response(&body, accepts_brotli(&headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Progressive stream of state events
pub async fn stream_events(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.dashboard_service.subscribe();
    stream_from_receiver(rx, accepts_brotli(&headers)).await
}

pub async fn start_drawing(State(state): State<Arc<AppState>>) -> Result<Json<DrawingDraft>, ApiError> {
    Ok(Json(state.dashboard_service.start_drawing()?))
}

pub async fn add_drawing_point(
    State(state): State<Arc<AppState>>,
    Json(point): Json<GeoPoint>,
) -> Result<Json<DrawingDraft>, ApiError> {
    if !(-90.0..=90.0).contains(&point.latitude) || !(-180.0..=180.0).contains(&point.longitude) {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Coordinates out of range")
            .with_details(format!("{}, {}", point.latitude, point.longitude)));
    }
    Ok(Json(state.dashboard_service.add_drawing_point(point)?))
}

pub async fn undo_drawing_point(State(state): State<Arc<AppState>>) -> Result<Json<DrawingDraft>, ApiError> {
    Ok(Json(state.dashboard_service.undo_drawing_point()?))
}

pub async fn cancel_drawing(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.dashboard_service.cancel_drawing()?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn finish_drawing(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FinishDrawingRequest>,
) -> Result<(StatusCode, Json<Polygon>), ApiError> {
    let (polygon, _) = state.dashboard_service.finish_drawing(request.name)?;
    Ok((StatusCode::CREATED, Json(polygon)))
}

pub async fn rename_polygon(
    Path(id): Path<PolygonId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenameRequest>,
) -> Result<StatusCode, ApiError> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Name must not be empty"));
    }
    state.dashboard_service.rename_polygon(id, name)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_polygon(
    Path(id): Path<PolygonId>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.dashboard_service.delete_polygon(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn refresh_polygon(
    Path(id): Path<PolygonId>,
    Query(query): Query<RefreshQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let _ = state.dashboard_service.refresh_polygon(id, query.window)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn refresh_all(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    let _ = state.dashboard_service.refresh_all()?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn select_data_source(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectSourceRequest>,
) -> Result<StatusCode, ApiError> {
    let _ = state.dashboard_service.select_data_source(request.id)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn create_rule(
    Path(source_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<RuleRequest>,
) -> Result<(StatusCode, Json<ColorRule>), ApiError> {
    let rule = ColorRule::new(request.operator, request.threshold, request.color);
    let _ = state.dashboard_service.add_rule(source_id, rule.clone())?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
    Path((source_id, rule_id)): Path<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<RuleRequest>,
) -> Result<Json<ColorRule>, ApiError> {
    let rule = ColorRule {
        id: rule_id,
        operator: request.operator,
        threshold: request.threshold,
        color: request.color,
    };
    let _ = state.dashboard_service.update_rule(source_id, rule.clone())?;
    Ok(Json(rule))
}

pub async fn delete_rule(
    Path((source_id, rule_id)): Path<(String, Uuid)>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let _ = state.dashboard_service.delete_rule(source_id, rule_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn select_window(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WindowRequest>,
) -> Result<Json<Timeline>, ApiError> {
    let (timeline, _) = state
        .dashboard_service
        .select_window(request.start, request.end)?;
    Ok(Json(timeline))
}

pub async fn set_range_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RangeModeRequest>,
) -> Result<Json<Timeline>, ApiError> {
    let (timeline, _) = state.dashboard_service.set_range_mode(request.range_mode)?;
    Ok(Json(timeline))
}

pub async fn quick_select(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QuickSelectRequest>,
) -> Result<Json<Timeline>, ApiError> {
    let (timeline, _) = state.dashboard_service.quick_select(request.range)?;
    Ok(Json(timeline))
}
