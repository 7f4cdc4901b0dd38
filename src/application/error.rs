// Errors raised by application-level commands and refreshes
use crate::application::weather_source::FetchError;
use crate::domain::polygon::PolygonId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DashboardError {
    #[error("Polygon not found: {0}")]
    PolygonNotFound(PolygonId),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("Color rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("No polygon is being drawn")]
    NoDraft,

    #[error("A polygon needs at least 3 vertices, got {count}")]
    TooFewVertices { count: usize },

    #[error("Invalid color rule: {0}")]
    InvalidRule(String),

    #[error("Invalid time window: start is after end")]
    InvalidWindow,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Polygon {0} has no vertices")]
    EmptyPolygon(PolygonId),
}

impl RefreshError {
    pub fn user_message(&self) -> String {
        match self {
            RefreshError::Fetch(e) => e.user_message(),
            RefreshError::EmptyPolygon(_) => self.to_string(),
        }
    }
}
