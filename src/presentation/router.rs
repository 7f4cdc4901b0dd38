// Route table
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    add_drawing_point, cancel_drawing, create_rule, delete_polygon, delete_rule, finish_drawing,
    get_state, health_check, quick_select, refresh_all, refresh_polygon, rename_polygon,
    select_data_source, select_window, set_range_mode, start_drawing, stream_events,
    undo_drawing_point, update_rule,
};
use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/state", get(get_state))
        .route("/events", get(stream_events))
        .route("/drawing", post(start_drawing).delete(cancel_drawing))
        .route("/drawing/points", post(add_drawing_point))
        .route("/drawing/points/last", delete(undo_drawing_point))
        .route("/drawing/finish", post(finish_drawing))
        .route("/polygons/:id", patch(rename_polygon).delete(delete_polygon))
        .route("/polygons/:id/refresh", post(refresh_polygon))
        .route("/refresh", post(refresh_all))
        .route("/data-sources/selected", put(select_data_source))
        .route("/data-sources/:id/rules", post(create_rule))
        .route(
            "/data-sources/:id/rules/:rule_id",
            put(update_rule).delete(delete_rule),
        )
        .route("/timeline/selection", put(select_window))
        .route("/timeline/mode", put(set_range_mode))
        .route("/timeline/quick", post(quick_select))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
