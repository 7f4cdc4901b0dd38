// Application state, mutated only through commands under a single writer
use crate::application::error::DashboardError;
use crate::domain::color_rule::{ColorRule, DataSource};
use crate::domain::geo::GeoPoint;
use crate::domain::polygon::{DrawingDraft, Polygon, PolygonId};
use crate::domain::series::RawSeries;
use crate::domain::timeline::{QuickRange, TimeWindow, Timeline};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub polygons: Vec<Polygon>,
    pub data_sources: Vec<DataSource>,
    pub selected_source_id: String,
    pub timeline: Timeline,
    pub drawing: Option<DrawingDraft>,
    pub error: Option<String>,
    /// Last raw series per polygon, kept for inspection
    pub raw_series: HashMap<PolygonId, RawSeries>,
}

#[derive(Debug, Clone)]
pub enum StateCommand {
    BeginLoading(PolygonId),
    EndLoading(PolygonId),
    PublishResult {
        polygon_id: PolygonId,
        color: String,
        value: f64,
        series: RawSeries,
        at: DateTime<Utc>,
    },
    PublishError(String),
    RenamePolygon { polygon_id: PolygonId, name: String },
    DeletePolygon(PolygonId),
    StartDrawing,
    AddDrawingPoint(GeoPoint),
    UndoDrawingPoint,
    CancelDrawing,
    FinishDrawing { name: Option<String> },
    SelectDataSource(String),
    AddRule { source_id: String, rule: ColorRule },
    UpdateRule { source_id: String, rule: ColorRule },
    DeleteRule { source_id: String, rule_id: Uuid },
    RollTimeline(DateTime<Utc>),
    SelectWindow { window: TimeWindow, now: DateTime<Utc> },
    SetRangeMode { range_mode: bool, now: DateTime<Utc> },
    QuickSelect { range: QuickRange, now: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    Loading {
        polygon_id: PolygonId,
        loading: bool,
        any_loading: bool,
    },
    PolygonUpdated {
        polygon_id: PolygonId,
        color: String,
        value: f64,
    },
    Error {
        message: Option<String>,
    },
    PolygonAdded {
        polygon: Polygon,
    },
    PolygonRenamed {
        polygon_id: PolygonId,
        name: String,
    },
    PolygonDeleted {
        polygon_id: PolygonId,
    },
    DrawingChanged {
        draft: Option<DrawingDraft>,
    },
    DataSourceChanged {
        source: DataSource,
    },
    SelectedSourceChanged {
        source_id: String,
    },
    TimelineChanged {
        timeline: Timeline,
    },
}

impl DashboardState {
    pub fn new(mut data_sources: Vec<DataSource>, now: DateTime<Utc>) -> Self {
        if data_sources.is_empty() {
            data_sources.push(DataSource::default_temperature());
        }

        let selected_source_id = data_sources
            .iter()
            .find(|s| s.active)
            .unwrap_or(&data_sources[0])
            .id
            .clone();
        for source in &mut data_sources {
            source.active = source.id == selected_source_id;
        }

        Self {
            polygons: Vec::new(),
            data_sources,
            selected_source_id,
            timeline: Timeline::new(now),
            drawing: None,
            error: None,
            raw_series: HashMap::new(),
        }
    }

    pub fn loading(&self) -> bool {
        self.polygons.iter().any(Polygon::is_loading)
    }

    pub fn polygon(&self, id: PolygonId) -> Option<&Polygon> {
        self.polygons.iter().find(|p| p.id == id)
    }

    fn polygon_mut(&mut self, id: PolygonId) -> Option<&mut Polygon> {
        self.polygons.iter_mut().find(|p| p.id == id)
    }

    pub fn selected_source(&self) -> Option<&DataSource> {
        self.data_sources
            .iter()
            .find(|s| s.id == self.selected_source_id)
    }

    fn source_mut(&mut self, id: &str) -> Result<&mut DataSource, DashboardError> {
        self.data_sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| DashboardError::DataSourceNotFound(id.to_string()))
    }

    fn loading_event(&self, polygon_id: PolygonId) -> StateEvent {
        StateEvent::Loading {
            polygon_id,
            loading: self.polygon(polygon_id).is_some_and(Polygon::is_loading),
            any_loading: self.loading(),
        }
    }

    /// Apply one command and return the events it produced.
    pub fn apply(&mut self, command: StateCommand) -> Result<Vec<StateEvent>, DashboardError> {
        match command {
            StateCommand::BeginLoading(polygon_id) => {
                if let Some(polygon) = self.polygon_mut(polygon_id) {
                    polygon.pending_refreshes += 1;
                }
                Ok(vec![self.loading_event(polygon_id)])
            }
            StateCommand::EndLoading(polygon_id) => {
                if let Some(polygon) = self.polygon_mut(polygon_id) {
                    polygon.pending_refreshes = polygon.pending_refreshes.saturating_sub(1);
                }
                Ok(vec![self.loading_event(polygon_id)])
            }
            StateCommand::PublishResult {
                polygon_id,
                color,
                value,
                series,
                at,
            } => {
                // Deleted while the refresh was in flight
                let Some(polygon) = self.polygon_mut(polygon_id) else {
                    return Ok(Vec::new());
                };
                polygon.current_color = color.clone();
                polygon.current_value = Some(value);
                polygon.last_updated = Some(at);
                self.raw_series.insert(polygon_id, series);

                let mut events = vec![StateEvent::PolygonUpdated {
                    polygon_id,
                    color,
                    value,
                }];
                if self.error.take().is_some() {
                    events.push(StateEvent::Error { message: None });
                }
                Ok(events)
            }
            StateCommand::PublishError(message) => {
                self.error = Some(message.clone());
                Ok(vec![StateEvent::Error {
                    message: Some(message),
                }])
            }
            StateCommand::RenamePolygon { polygon_id, name } => {
                let polygon = self
                    .polygon_mut(polygon_id)
                    .ok_or(DashboardError::PolygonNotFound(polygon_id))?;
                polygon.name = name.clone();
                Ok(vec![StateEvent::PolygonRenamed { polygon_id, name }])
            }
            StateCommand::DeletePolygon(polygon_id) => {
                let before = self.polygons.len();
                self.polygons.retain(|p| p.id != polygon_id);
                if self.polygons.len() == before {
                    return Err(DashboardError::PolygonNotFound(polygon_id));
                }
                self.raw_series.remove(&polygon_id);
                Ok(vec![StateEvent::PolygonDeleted { polygon_id }])
            }
            StateCommand::StartDrawing => {
                self.drawing = Some(DrawingDraft::default());
                Ok(vec![StateEvent::DrawingChanged {
                    draft: self.drawing.clone(),
                }])
            }
            StateCommand::AddDrawingPoint(point) => {
                let draft = self.drawing.as_mut().ok_or(DashboardError::NoDraft)?;
                draft.add_point(point);
                Ok(vec![StateEvent::DrawingChanged {
                    draft: self.drawing.clone(),
                }])
            }
            StateCommand::UndoDrawingPoint => {
                let draft = self.drawing.as_mut().ok_or(DashboardError::NoDraft)?;
                draft.undo_last();
                Ok(vec![StateEvent::DrawingChanged {
                    draft: self.drawing.clone(),
                }])
            }
            StateCommand::CancelDrawing => {
                self.drawing.take().ok_or(DashboardError::NoDraft)?;
                Ok(vec![StateEvent::DrawingChanged { draft: None }])
            }
            StateCommand::FinishDrawing { name } => {
                let draft = self.drawing.take().ok_or(DashboardError::NoDraft)?;
                let name = name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| Polygon::default_name(self.polygons.len()));

                match draft.finish(name, self.selected_source_id.clone()) {
                    Ok(polygon) => {
                        self.polygons.push(polygon.clone());
                        Ok(vec![
                            StateEvent::DrawingChanged { draft: None },
                            StateEvent::PolygonAdded { polygon },
                        ])
                    }
                    Err(draft) => {
                        let count = draft.points.len();
                        self.drawing = Some(draft);
                        Err(DashboardError::TooFewVertices { count })
                    }
                }
            }
            StateCommand::SelectDataSource(source_id) => {
                if !self.data_sources.iter().any(|s| s.id == source_id) {
                    return Err(DashboardError::DataSourceNotFound(source_id));
                }
                for source in &mut self.data_sources {
                    source.active = source.id == source_id;
                }
                for polygon in &mut self.polygons {
                    polygon.color_source_id = source_id.clone();
                }
                self.selected_source_id = source_id.clone();
                Ok(vec![StateEvent::SelectedSourceChanged { source_id }])
            }
            StateCommand::AddRule { source_id, rule } => {
                Self::check_rule(&rule)?;
                let source = self.source_mut(&source_id)?;
                source.color_rules.push(rule);
                Ok(vec![StateEvent::DataSourceChanged {
                    source: source.clone(),
                }])
            }
            StateCommand::UpdateRule { source_id, rule } => {
                Self::check_rule(&rule)?;
                let source = self.source_mut(&source_id)?;
                let existing = source
                    .color_rules
                    .iter_mut()
                    .find(|r| r.id == rule.id)
                    .ok_or(DashboardError::RuleNotFound(rule.id))?;
                *existing = rule;
                Ok(vec![StateEvent::DataSourceChanged {
                    source: source.clone(),
                }])
            }
            StateCommand::DeleteRule { source_id, rule_id } => {
                let source = self.source_mut(&source_id)?;
                let before = source.color_rules.len();
                source.color_rules.retain(|r| r.id != rule_id);
                if source.color_rules.len() == before {
                    return Err(DashboardError::RuleNotFound(rule_id));
                }
                Ok(vec![StateEvent::DataSourceChanged {
                    source: source.clone(),
                }])
            }
            StateCommand::RollTimeline(now) => {
                if !self.timeline.roll_forward(now) {
                    return Ok(Vec::new());
                }
                Ok(vec![self.timeline_event()])
            }
            StateCommand::SelectWindow { window, now } => {
                self.timeline.select(window, now);
                Ok(vec![self.timeline_event()])
            }
            StateCommand::SetRangeMode { range_mode, now } => {
                self.timeline.set_range_mode(range_mode, now);
                Ok(vec![self.timeline_event()])
            }
            StateCommand::QuickSelect { range, now } => {
                self.timeline.quick_select(range, now);
                Ok(vec![self.timeline_event()])
            }
        }
    }

    fn timeline_event(&self) -> StateEvent {
        StateEvent::TimelineChanged {
            timeline: self.timeline.clone(),
        }
    }

    fn check_rule(rule: &ColorRule) -> Result<(), DashboardError> {
        if rule.is_valid() {
            Ok(())
        } else {
            Err(DashboardError::InvalidRule(
                "threshold must be finite and color non-empty".to_string(),
            ))
        }
    }
}

/// Owns the dashboard state and fans applied events out to subscribers.
pub struct StateStore {
    state: RwLock<DashboardState>,
    events: broadcast::Sender<StateEvent>,
}

impl StateStore {
    pub fn new(state: DashboardState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(state),
            events,
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, DashboardState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, DashboardState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn apply(&self, command: StateCommand) -> Result<Vec<StateEvent>, DashboardError> {
        let mut state = self.write_guard();
        let events = state.apply(command)?;
        // Sent under the write lock so subscribers see events in apply order
        for event in &events {
            let _ = self.events.send(event.clone());
        }
        Ok(events)
    }

    pub fn read<R>(&self, f: impl FnOnce(&DashboardState) -> R) -> R {
        f(&self.read_guard())
    }

    pub fn snapshot(&self) -> DashboardState {
        self.read_guard().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::color_rule::{Operator, DEFAULT_COLOR};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn sources() -> Vec<DataSource> {
        let mut wind = DataSource::default_temperature();
        wind.id = "wind".to_string();
        wind.field = "wind_speed_10m".to_string();
        wind.active = false;
        vec![DataSource::default_temperature(), wind]
    }

    fn with_triangle() -> (DashboardState, PolygonId) {
        let mut state = DashboardState::new(sources(), now());
        state.apply(StateCommand::StartDrawing).unwrap();
        for (lat, lng) in [(51.5, -0.1), (51.6, -0.1), (51.6, 0.0)] {
            state
                .apply(StateCommand::AddDrawingPoint(GeoPoint::new(lat, lng)))
                .unwrap();
        }
        state
            .apply(StateCommand::FinishDrawing { name: None })
            .unwrap();
        let id = state.polygons[0].id;
        (state, id)
    }

    fn series() -> RawSeries {
        RawSeries::new(51.5, -0.1, "temperature_2m".to_string(), vec![now()], vec![Some(4.0)])
    }

    #[test]
    fn test_first_active_source_is_selected() {
        let state = DashboardState::new(sources(), now());
        assert_eq!(state.selected_source_id, "temperature");

        let empty = DashboardState::new(Vec::new(), now());
        assert_eq!(empty.data_sources.len(), 1);
        assert_eq!(empty.selected_source().unwrap().field, "temperature_2m");
    }

    #[test]
    fn test_finish_drawing_adds_polygon() {
        let (state, id) = with_triangle();
        let polygon = state.polygon(id).unwrap();
        assert_eq!(polygon.name, "Polygon 1");
        assert_eq!(polygon.color_source_id, "temperature");
        assert_eq!(polygon.current_color, DEFAULT_COLOR);
        assert!(state.drawing.is_none());
    }

    #[test]
    fn test_finish_with_too_few_vertices_keeps_draft() {
        let mut state = DashboardState::new(sources(), now());
        state.apply(StateCommand::StartDrawing).unwrap();
        state
            .apply(StateCommand::AddDrawingPoint(GeoPoint::new(1.0, 1.0)))
            .unwrap();

        let err = state
            .apply(StateCommand::FinishDrawing { name: None })
            .unwrap_err();
        assert_eq!(err, DashboardError::TooFewVertices { count: 1 });
        assert_eq!(state.drawing.as_ref().unwrap().points.len(), 1);
        assert!(state.polygons.is_empty());
    }

    #[test]
    fn test_loading_is_counted_per_polygon() {
        let (mut state, id) = with_triangle();
        state.apply(StateCommand::BeginLoading(id)).unwrap();
        state.apply(StateCommand::BeginLoading(id)).unwrap();
        let events = state.apply(StateCommand::EndLoading(id)).unwrap();
        assert_eq!(
            events,
            vec![StateEvent::Loading {
                polygon_id: id,
                loading: true,
                any_loading: true
            }]
        );
        state.apply(StateCommand::EndLoading(id)).unwrap();
        assert!(!state.loading());
    }

    #[test]
    fn test_success_clears_error_slot() {
        let (mut state, id) = with_triangle();
        state
            .apply(StateCommand::PublishError("boom".to_string()))
            .unwrap();
        assert_eq!(state.error.as_deref(), Some("boom"));

        let events = state
            .apply(StateCommand::PublishResult {
                polygon_id: id,
                color: "red".to_string(),
                value: 4.0,
                series: series(),
                at: now(),
            })
            .unwrap();

        assert!(state.error.is_none());
        assert!(events.contains(&StateEvent::Error { message: None }));
        let polygon = state.polygon(id).unwrap();
        assert_eq!(polygon.current_color, "red");
        assert_eq!(polygon.current_value, Some(4.0));
        assert!(state.raw_series.contains_key(&id));
    }

    #[test]
    fn test_result_for_deleted_polygon_is_ignored() {
        let (mut state, id) = with_triangle();
        state.apply(StateCommand::DeletePolygon(id)).unwrap();

        let events = state
            .apply(StateCommand::PublishResult {
                polygon_id: id,
                color: "red".to_string(),
                value: 1.0,
                series: series(),
                at: now(),
            })
            .unwrap();
        assert!(events.is_empty());
        assert!(state.raw_series.is_empty());
    }

    #[test]
    fn test_rule_upsert_and_delete() {
        let mut state = DashboardState::new(sources(), now());
        let mut rule = ColorRule::new(Operator::GreaterOrEqual, 10.0, "green");
        state
            .apply(StateCommand::AddRule {
                source_id: "temperature".to_string(),
                rule: rule.clone(),
            })
            .unwrap();

        rule.color = "orange".to_string();
        state
            .apply(StateCommand::UpdateRule {
                source_id: "temperature".to_string(),
                rule: rule.clone(),
            })
            .unwrap();
        let rules = &state.selected_source().unwrap().color_rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].color, "orange");

        state
            .apply(StateCommand::DeleteRule {
                source_id: "temperature".to_string(),
                rule_id: rule.id,
            })
            .unwrap();
        assert!(state.selected_source().unwrap().color_rules.is_empty());

        let err = state
            .apply(StateCommand::DeleteRule {
                source_id: "temperature".to_string(),
                rule_id: rule.id,
            })
            .unwrap_err();
        assert_eq!(err, DashboardError::RuleNotFound(rule.id));

        // An update racing a delete must not bring the rule back
        let err = state
            .apply(StateCommand::UpdateRule {
                source_id: "temperature".to_string(),
                rule: rule.clone(),
            })
            .unwrap_err();
        assert_eq!(err, DashboardError::RuleNotFound(rule.id));
        assert!(state.selected_source().unwrap().color_rules.is_empty());
    }

    #[test]
    fn test_timeline_intents_compose() {
        let mut state = DashboardState::new(sources(), now());
        let window = TimeWindow::new(now() - Duration::hours(6), now() - Duration::hours(2)).unwrap();

        state
            .apply(StateCommand::SelectWindow { window, now: now() })
            .unwrap();
        state
            .apply(StateCommand::SetRangeMode {
                range_mode: false,
                now: now(),
            })
            .unwrap();

        // Both intents land; neither overwrites the other
        assert!(!state.timeline.range_mode);
        assert_eq!(state.timeline.selected, TimeWindow::instant(window.end));
    }

    #[test]
    fn test_roll_timeline_only_reports_movement() {
        let mut state = DashboardState::new(sources(), now());
        assert!(state.apply(StateCommand::RollTimeline(now())).unwrap().is_empty());

        let later = now() + Duration::days(2);
        let events = state.apply(StateCommand::RollTimeline(later)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(state.timeline.bounds.end, later);
    }

    #[test]
    fn test_select_source_repoints_polygons() {
        let (mut state, id) = with_triangle();
        state
            .apply(StateCommand::SelectDataSource("wind".to_string()))
            .unwrap();
        assert_eq!(state.polygon(id).unwrap().color_source_id, "wind");
        assert!(state.data_sources.iter().filter(|s| s.active).count() == 1);

        let err = state
            .apply(StateCommand::SelectDataSource("nope".to_string()))
            .unwrap_err();
        assert_eq!(err, DashboardError::DataSourceNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_store_broadcasts_events() {
        let store = StateStore::new(DashboardState::new(sources(), now()));
        let mut rx = store.subscribe();

        store.apply(StateCommand::StartDrawing).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            StateEvent::DrawingChanged {
                draft: Some(DrawingDraft::default())
            }
        );
    }
}
