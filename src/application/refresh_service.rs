// Refresh orchestrator - fetch, aggregate, classify and publish per polygon
use crate::application::clock::Clock;
use crate::application::error::RefreshError;
use crate::application::response_cache::ResponseCache;
use crate::application::state_store::{StateCommand, StateStore};
use crate::application::weather_source::{FetchError, WeatherRequest, WeatherSource};
use crate::domain::color_rule::{classify, DataSource};
use crate::domain::date_range::validate;
use crate::domain::polygon::{Polygon, PolygonId};
use crate::domain::series::RawSeries;
use crate::domain::timeline::TimeWindow;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

pub const DEFAULT_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const DEFAULT_LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Published { color: String, value: f64 },
    Failed(RefreshError),
    /// A newer refresh for the same polygon started while this one was running
    Superseded,
}

struct Classified {
    color: String,
    value: f64,
    series: RawSeries,
}

/// Archive window used when the caller gives none: the 7 days ending yesterday.
pub fn default_window(now: DateTime<Utc>) -> TimeWindow {
    let end = now - Duration::days(1);
    TimeWindow::ending_at(end, Duration::days(DEFAULT_LOOKBACK_DAYS))
}

/// A polygon snapshot paired with the generation claimed for it.
#[derive(Debug)]
struct RefreshTicket {
    polygon: Polygon,
    generation: u64,
}

pub struct RefreshService {
    source: Arc<dyn WeatherSource>,
    cache: Arc<ResponseCache>,
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    timeout: std::time::Duration,
    generations: Mutex<HashMap<PolygonId, u64>>,
}

impl RefreshService {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        cache: Arc<ResponseCache>,
        store: Arc<StateStore>,
        clock: Arc<dyn Clock>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            source,
            cache,
            store,
            clock,
            timeout,
            generations: Mutex::new(HashMap::new()),
        }
    }

    fn next_generation(&self, polygon_id: PolygonId) -> u64 {
        let mut generations = self
            .generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = generations.entry(polygon_id).or_insert(0);
        *generation += 1;
        *generation
    }

    fn is_current(&self, polygon_id: PolygonId, generation: u64) -> bool {
        let generations = self
            .generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        generations.get(&polygon_id) == Some(&generation)
    }

    /// Drop bookkeeping for a deleted polygon. Any refresh still in flight
    /// for it becomes stale.
    pub fn forget(&self, polygon_id: PolygonId) {
        self.generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&polygon_id);
    }

    fn publish(&self, command: StateCommand) {
        if let Err(e) = self.store.apply(command) {
            tracing::warn!(error = %e, "Failed to publish refresh state");
        }
    }

    /// Claim the next generation for a polygon. Only the most recently
    /// claimed ticket may publish a result or error.
    fn claim(&self, polygon: Polygon) -> RefreshTicket {
        let generation = self.next_generation(polygon.id);
        RefreshTicket {
            polygon,
            generation,
        }
    }

    /// Refresh one polygon. The generation is claimed when this is called,
    /// not when the returned future is first polled.
    pub fn refresh(
        self: Arc<Self>,
        polygon: Polygon,
        window: Option<TimeWindow>,
        data_source: DataSource,
    ) -> impl Future<Output = RefreshOutcome> {
        let ticket = self.claim(polygon);
        async move { self.run(ticket, window, &data_source).await }
    }

    /// Refresh every polygon concurrently; failures stay per polygon.
    /// Generations are claimed up front, as with `refresh`.
    pub fn refresh_all(
        self: Arc<Self>,
        polygons: Vec<Polygon>,
        window: Option<TimeWindow>,
        data_source: DataSource,
    ) -> impl Future<Output = Vec<RefreshOutcome>> {
        let tickets: Vec<RefreshTicket> = polygons
            .into_iter()
            .map(|polygon| self.claim(polygon))
            .collect();
        async move {
            join_all(
                tickets
                    .into_iter()
                    .map(|ticket| self.run(ticket, window, &data_source)),
            )
            .await
        }
    }

    /// Run a claimed refresh. Loading is always bracketed on/off.
    async fn run(
        &self,
        ticket: RefreshTicket,
        window: Option<TimeWindow>,
        data_source: &DataSource,
    ) -> RefreshOutcome {
        let RefreshTicket {
            polygon,
            generation,
        } = ticket;
        self.publish(StateCommand::BeginLoading(polygon.id));

        let result = self.classify_polygon(&polygon, window, data_source).await;

        let outcome = if !self.is_current(polygon.id, generation) {
            tracing::debug!(polygon_id = %polygon.id, generation, "Discarding superseded refresh");
            RefreshOutcome::Superseded
        } else {
            match result {
                Ok(classified) => {
                    tracing::debug!(
                        polygon_id = %polygon.id,
                        value = classified.value,
                        color = %classified.color,
                        "Polygon classified"
                    );
                    self.publish(StateCommand::PublishResult {
                        polygon_id: polygon.id,
                        color: classified.color.clone(),
                        value: classified.value,
                        series: classified.series,
                        at: self.clock.now(),
                    });
                    RefreshOutcome::Published {
                        color: classified.color,
                        value: classified.value,
                    }
                }
                Err(e) => {
                    tracing::warn!(polygon_id = %polygon.id, error = %e, "Refresh failed");
                    self.publish(StateCommand::PublishError(e.user_message()));
                    RefreshOutcome::Failed(e)
                }
            }
        };

        self.publish(StateCommand::EndLoading(polygon.id));
        outcome
    }

    async fn classify_polygon(
        &self,
        polygon: &Polygon,
        window: Option<TimeWindow>,
        data_source: &DataSource,
    ) -> Result<Classified, RefreshError> {
        let point = polygon
            .centroid()
            .ok_or(RefreshError::EmptyPolygon(polygon.id))?;

        let now = self.clock.now();
        let requested = window.unwrap_or_else(|| default_window(now));
        let range = validate(requested.start, requested.end, now);
        if let Some(reason) = range.adjustment {
            tracing::info!(
                polygon_id = %polygon.id,
                %reason,
                start = %range.start,
                end = %range.end,
                "Adjusted requested date range"
            );
        }

        let start_date = range.start.date_naive();
        let end_date = range.end.date_naive();

        // Cache keys ignore the field, so a hit for another source counts as a miss
        let cached = self
            .cache
            .get(point.latitude, point.longitude, start_date, end_date)
            .filter(|series| series.field == data_source.field);

        let series = match cached {
            Some(series) => series,
            None => {
                let request = WeatherRequest {
                    latitude: point.latitude,
                    longitude: point.longitude,
                    start_date,
                    end_date,
                    field: data_source.field.clone(),
                };
                let series = self.fetch_with_deadline(&request).await?;
                self.cache.put(
                    point.latitude,
                    point.longitude,
                    start_date,
                    end_date,
                    series.clone(),
                );
                tracing::debug!(polygon_id = %polygon.id, cache_size = self.cache.len(), "Cached upstream response");
                series
            }
        };

        let value = series.average_over(&requested);
        let color = classify(value, &data_source.color_rules);

        Ok(Classified {
            color,
            value,
            series,
        })
    }

    async fn fetch_with_deadline(&self, request: &WeatherRequest) -> Result<RawSeries, FetchError> {
        match tokio::time::timeout(self.timeout, self.source.fetch_hourly(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;
    use crate::application::clock::testing::ManualClock;
    use crate::application::response_cache::CachePolicy;
    use crate::application::state_store::{DashboardState, StateEvent};
    use crate::domain::color_rule::{ColorRule, Operator, DEFAULT_COLOR};
    use crate::domain::geo::GeoPoint;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn london() -> Vec<GeoPoint> {
        // Centroid (51.5, -0.09)
        vec![
            GeoPoint::new(51.4, -0.19),
            GeoPoint::new(51.6, -0.19),
            GeoPoint::new(51.6, 0.01),
            GeoPoint::new(51.4, 0.01),
        ]
    }

    fn source_with_rules() -> DataSource {
        let mut source = DataSource::default_temperature();
        source.color_rules = vec![
            ColorRule::new(Operator::LessThan, 10.0, "blue"),
            ColorRule::new(Operator::GreaterOrEqual, 10.0, "green"),
        ];
        source
    }

    /// Hourly samples for the last few hours before `now()`, straddling 10.
    fn straddling_series() -> RawSeries {
        let timestamps = (0..4).map(|h| now() - Duration::hours(3 - h)).collect();
        RawSeries::new(
            51.5,
            -0.09,
            "temperature_2m".to_string(),
            timestamps,
            vec![Some(4.0), Some(6.0), Some(11.0), Some(13.0)],
        )
    }

    struct Harness {
        service: Arc<RefreshService>,
        store: Arc<StateStore>,
        cache: Arc<ResponseCache>,
        upstream: Arc<ScriptedSource>,
        polygon: Polygon,
    }

    fn harness(upstream: ScriptedSource) -> Harness {
        let clock = Arc::new(ManualClock::new(now()));
        let mut state = DashboardState::new(vec![source_with_rules()], now());
        let polygon = Polygon::new("London".to_string(), london(), "temperature".to_string());
        state.polygons.push(polygon.clone());

        let store = Arc::new(StateStore::new(state));
        let cache = Arc::new(ResponseCache::new(CachePolicy::default(), clock.clone()));
        let upstream = Arc::new(upstream);
        let service = Arc::new(RefreshService::new(
            upstream.clone(),
            cache.clone(),
            store.clone(),
            clock,
            DEFAULT_FETCH_TIMEOUT,
        ));

        Harness {
            service,
            store,
            cache,
            upstream,
            polygon,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<StateEvent>) -> Vec<StateEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_refresh_publishes_windowed_classification() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let mut rx = h.store.subscribe();

        let window = TimeWindow::new(now() - Duration::hours(1), now()).unwrap();
        let outcome = h.service.clone().refresh(h.polygon.clone(), Some(window), source_with_rules()).await;

        // Samples at now-1h and now are 11 and 13
        assert_eq!(
            outcome,
            RefreshOutcome::Published {
                color: "green".to_string(),
                value: 12.0
            }
        );

        let polygon = h.store.read(|s| s.polygon(h.polygon.id).cloned()).unwrap();
        assert_eq!(polygon.current_color, "green");
        assert_eq!(polygon.current_value, Some(12.0));
        assert!(h.store.read(|s| s.raw_series.contains_key(&h.polygon.id)));

        let loading: Vec<bool> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                StateEvent::Loading { loading, .. } => Some(loading),
                _ => None,
            })
            .collect();
        assert_eq!(loading, vec![true, false]);
        assert!(!h.store.read(|s| s.loading()));

        let request = h.upstream.requests.lock().unwrap()[0].clone();
        assert_eq!(request.latitude_param(), "51.5000");
        assert_eq!(request.longitude_param(), "-0.0900");
        assert_eq!(request.field, "temperature_2m");
    }

    #[tokio::test]
    async fn test_window_below_threshold_is_blue() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let window = TimeWindow::new(now() - Duration::hours(3), now() - Duration::hours(2)).unwrap();

        let outcome = h.service.clone().refresh(h.polygon.clone(), Some(window), source_with_rules()).await;
        assert_eq!(
            outcome,
            RefreshOutcome::Published {
                color: "blue".to_string(),
                value: 5.0
            }
        );
    }

    #[tokio::test]
    async fn test_second_refresh_is_served_from_cache() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let window = TimeWindow::new(now() - Duration::hours(1), now()).unwrap();

        h.service.clone().refresh(h.polygon.clone(), Some(window), source_with_rules()).await;
        h.service.clone().refresh(h.polygon.clone(), Some(window), source_with_rules()).await;

        assert_eq!(h.upstream.request_count(), 1);
        assert_eq!(h.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_series_for_other_field_is_refetched() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let window = TimeWindow::new(now() - Duration::hours(1), now()).unwrap();
        h.service.clone().refresh(h.polygon.clone(), Some(window), source_with_rules()).await;

        let mut wind = source_with_rules();
        wind.id = "wind".to_string();
        wind.field = "wind_speed_10m".to_string();
        h.service.clone().refresh(h.polygon.clone(), Some(window), wind).await;

        assert_eq!(h.upstream.request_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_prior_color_and_sets_error() {
        let h = harness(ScriptedSource::new(vec![
            Ok(straddling_series()),
            Err(FetchError::RateLimited),
        ]));
        let first = TimeWindow::new(now() - Duration::hours(1), now()).unwrap();
        h.service.clone().refresh(h.polygon.clone(), Some(first), source_with_rules()).await;

        // Different dates, so the cache misses
        let second = TimeWindow::new(now() - Duration::days(3), now() - Duration::days(2)).unwrap();
        let outcome = h.service.clone().refresh(h.polygon.clone(), Some(second), source_with_rules()).await;
        assert_eq!(outcome, RefreshOutcome::Failed(FetchError::RateLimited.into()));

        let (polygon, error, loading) = h.store.read(|s| {
            (s.polygon(h.polygon.id).cloned(), s.error.clone(), s.loading())
        });
        let polygon = polygon.unwrap();
        assert_eq!(polygon.current_color, "green");
        assert_eq!(polygon.current_value, Some(12.0));
        assert_eq!(error, Some(FetchError::RateLimited.user_message()));
        assert!(!loading);
    }

    #[tokio::test]
    async fn test_empty_polygon_is_an_error() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let mut empty = h.polygon.clone();
        empty.vertices.clear();

        let outcome = h.service.clone().refresh(empty.clone(), None, source_with_rules()).await;
        assert_eq!(outcome, RefreshOutcome::Failed(RefreshError::EmptyPolygon(empty.id)));
        assert_eq!(h.upstream.request_count(), 0);
        assert_eq!(h.polygon.current_color, DEFAULT_COLOR);
    }

    #[tokio::test]
    async fn test_default_window_ends_yesterday() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let outcome = h.service.clone().refresh(h.polygon.clone(), None, source_with_rules()).await;

        let request = h.upstream.requests.lock().unwrap()[0].clone();
        assert_eq!(request.end_date, (now() - Duration::days(1)).date_naive());
        assert_eq!(request.start_date, (now() - Duration::days(8)).date_naive());

        // No samples in that window, so the last value of the series is used
        assert_eq!(
            outcome,
            RefreshOutcome::Published {
                color: "green".to_string(),
                value: 13.0
            }
        );
    }

    #[tokio::test]
    async fn test_future_window_is_clamped_before_fetch() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let window = TimeWindow::new(now() + Duration::days(1), now() + Duration::days(2)).unwrap();
        h.service.clone().refresh(h.polygon.clone(), Some(window), source_with_rules()).await;

        let request = h.upstream.requests.lock().unwrap()[0].clone();
        assert_eq!(request.start_date, (now() - Duration::hours(24)).date_naive());
        assert_eq!(request.end_date, now().date_naive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_upstream_times_out() {
        let h = harness(
            ScriptedSource::new(vec![Ok(straddling_series())])
                .with_delay(std::time::Duration::from_secs(30)),
        );

        let outcome = h.service.clone().refresh(h.polygon.clone(), None, source_with_rules()).await;
        assert_eq!(
            outcome,
            RefreshOutcome::Failed(FetchError::Timeout { seconds: 10 }.into())
        );
        assert_eq!(h.cache.len(), 0);
        assert!(h.store.read(|s| s.error.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_refresh_does_not_publish() {
        let h = harness(
            ScriptedSource::new(vec![Ok(straddling_series())])
                .with_delay(std::time::Duration::from_secs(1)),
        );
        let window = TimeWindow::new(now() - Duration::hours(1), now()).unwrap();
        let source = source_with_rules();

        let (older, newer) = tokio::join!(
            h.service.clone().refresh(h.polygon.clone(), Some(window), source.clone()),
            h.service.clone().refresh(h.polygon.clone(), Some(window), source.clone()),
        );

        assert_eq!(older, RefreshOutcome::Superseded);
        assert!(matches!(newer, RefreshOutcome::Published { .. }));
        assert!(!h.store.read(|s| s.loading()));
    }

    #[tokio::test]
    async fn test_latest_trigger_wins_when_polled_out_of_order() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let window = TimeWindow::new(now() - Duration::hours(1), now()).unwrap();
        let mut old_rules = source_with_rules();
        old_rules.color_rules = vec![ColorRule::new(Operator::GreaterOrEqual, 0.0, "old")];
        let mut new_rules = source_with_rules();
        new_rules.color_rules = vec![ColorRule::new(Operator::GreaterOrEqual, 0.0, "new")];

        let older = h.service.clone().refresh(h.polygon.clone(), Some(window), old_rules);
        let newer = h.service.clone().refresh(h.polygon.clone(), Some(window), new_rules);
        let (newer, older) = tokio::join!(newer, older);

        assert_eq!(
            newer,
            RefreshOutcome::Published {
                color: "new".to_string(),
                value: 12.0
            }
        );
        assert_eq!(older, RefreshOutcome::Superseded);
        assert_eq!(
            h.store.read(|s| s.polygon(h.polygon.id).map(|p| p.current_color.clone())),
            Some("new".to_string())
        );
        assert!(!h.store.read(|s| s.loading()));
    }

    #[tokio::test]
    async fn test_refresh_all_isolates_failures() {
        let h = harness(ScriptedSource::new(vec![Ok(straddling_series())]));
        let broken = Polygon::new("Broken".to_string(), Vec::new(), "temperature".to_string());

        let window = TimeWindow::new(now() - Duration::hours(1), now()).unwrap();
        let outcomes = h
            .service
            .clone()
            .refresh_all(vec![broken.clone(), h.polygon.clone()], Some(window), source_with_rules())
            .await;

        assert_eq!(outcomes[0], RefreshOutcome::Failed(RefreshError::EmptyPolygon(broken.id)));
        assert!(matches!(outcomes[1], RefreshOutcome::Published { .. }));
        assert_eq!(
            h.store.read(|s| s.polygon(h.polygon.id).map(|p| p.current_color.clone())),
            Some("green".to_string())
        );
    }
}
