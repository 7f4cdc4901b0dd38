// Open-Meteo archive client implementing the WeatherSource port
use crate::application::weather_source::{FetchError, WeatherRequest, WeatherSource};
use crate::domain::series::RawSeries;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    base_url: String,
    timeout: std::time::Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    utc_offset_seconds: i64,
    hourly: Option<HashMap<String, serde_json::Value>>,
}

impl OpenMeteoClient {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::NetworkOrUnknown(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    fn build_query_url(&self, request: &WeatherRequest) -> String {
        format!(
            "{}?latitude={}&longitude={}&start_date={}&end_date={}&hourly={}&timezone=auto",
            self.base_url,
            request.latitude_param(),
            request.longitude_param(),
            request.start_date.format("%Y-%m-%d"),
            request.end_date.format("%Y-%m-%d"),
            urlencoding::encode(&request.field)
        )
    }

    fn classify_send_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            FetchError::NetworkOrUnknown(e.to_string())
        }
    }
}

fn classify_status(status: StatusCode, body: &str) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::RateLimited
    } else if status.is_server_error() {
        FetchError::UpstreamUnavailable {
            status: status.as_u16(),
        }
    } else {
        FetchError::NetworkOrUnknown(format!("status {}: {}", status, body))
    }
}

/// Archive timestamps come back as local `YYYY-MM-DDTHH:MM` when
/// `timezone=auto`; shift them back to UTC with the reported offset.
fn parse_timestamp(raw: &str, utc_offset_seconds: i64) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let local = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    Some((local - Duration::seconds(utc_offset_seconds)).and_utc())
}

fn parse_archive_body(body: &str, field: &str) -> Result<RawSeries, FetchError> {
    let response: ArchiveResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let mut hourly = response
        .hourly
        .ok_or_else(|| FetchError::MalformedResponse("missing hourly block".to_string()))?;

    let times: Vec<String> = hourly
        .remove("time")
        .ok_or_else(|| FetchError::MalformedResponse("missing hourly.time".to_string()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| FetchError::MalformedResponse(format!("hourly.time: {}", e)))
        })?;

    let values: Vec<Option<f64>> = hourly
        .remove(field)
        .ok_or_else(|| FetchError::MalformedResponse(format!("missing hourly.{}", field)))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| FetchError::MalformedResponse(format!("hourly.{}: {}", field, e)))
        })?;

    if times.len() != values.len() {
        return Err(FetchError::MalformedResponse(format!(
            "hourly.time has {} entries but hourly.{} has {}",
            times.len(),
            field,
            values.len()
        )));
    }

    let timestamps = times
        .iter()
        .map(|t| {
            parse_timestamp(t, response.utc_offset_seconds)
                .ok_or_else(|| FetchError::MalformedResponse(format!("bad timestamp '{}'", t)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RawSeries::new(
        response.latitude,
        response.longitude,
        field.to_string(),
        timestamps,
        values,
    ))
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    async fn fetch_hourly(&self, request: &WeatherRequest) -> Result<RawSeries, FetchError> {
        let url = self.build_query_url(request);
        tracing::debug!(%url, "Requesting archive data");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        parse_archive_body(&body, &request.field)
    }
}
