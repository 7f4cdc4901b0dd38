// Port for the upstream historical weather archive
use crate::domain::series::RawSeries;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Hourly field identifier, e.g. `temperature_2m`
    pub field: String,
}

impl WeatherRequest {
    /// Coordinates as sent upstream, 4 decimal places
    pub fn latitude_param(&self) -> String {
        format!("{:.4}", self.latitude)
    }

    pub fn longitude_param(&self) -> String {
        format!("{:.4}", self.longitude)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("upstream rate limit reached")]
    RateLimited,

    #[error("upstream unavailable (status {status})")]
    UpstreamUnavailable { status: u16 },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("request failed: {0}")]
    NetworkOrUnknown(String),
}

impl FetchError {
    /// Text published to the shared error slot.
    pub fn user_message(&self) -> String {
        match self {
            FetchError::RateLimited => {
                "Weather service rate limit reached. Please try again later.".to_string()
            }
            FetchError::UpstreamUnavailable { status } => {
                format!("Weather service is temporarily unavailable (HTTP {status}).")
            }
            FetchError::Timeout { seconds } => {
                format!("Weather service did not respond within {seconds} seconds.")
            }
            FetchError::MalformedResponse(detail) => {
                format!("Weather service returned unexpected data: {detail}")
            }
            FetchError::NetworkOrUnknown(detail) => {
                format!("Failed to fetch weather data: {detail}")
            }
        }
    }
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch the hourly series for one location and date range
    async fn fetch_hourly(&self, request: &WeatherRequest) -> Result<RawSeries, FetchError>;
}
