// API error responses
use crate::application::error::DashboardError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        let status = match &err {
            DashboardError::PolygonNotFound(_)
            | DashboardError::DataSourceNotFound(_)
            | DashboardError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::NoDraft | DashboardError::InvalidWindow => StatusCode::BAD_REQUEST,
            DashboardError::TooFewVertices { .. } | DashboardError::InvalidRule(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };
        tracing::debug!(error = %err, %status, "Rejected dashboard command");
        Self::new(status, err.to_string())
    }
}
