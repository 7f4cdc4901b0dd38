// Dashboard service - User-facing commands and the refreshes they trigger
use crate::application::clock::Clock;
use crate::application::error::DashboardError;
use crate::application::refresh_service::{RefreshOutcome, RefreshService};
use crate::application::state_store::{DashboardState, StateCommand, StateEvent, StateStore};
use crate::domain::color_rule::{ColorRule, DataSource};
use crate::domain::geo::GeoPoint;
use crate::domain::polygon::{DrawingDraft, Polygon, PolygonId};
use crate::domain::timeline::{QuickRange, TimeWindow, Timeline};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Background refresh batch; callers may await it or let it run detached.
pub type RefreshHandle = JoinHandle<Vec<RefreshOutcome>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshWindow {
    /// Current timeline selection
    #[default]
    Timeline,
    /// The 7 days ending yesterday
    ArchiveDefault,
}

#[derive(Clone)]
pub struct DashboardService {
    store: Arc<StateStore>,
    refresher: Arc<RefreshService>,
    clock: Arc<dyn Clock>,
}

impl DashboardService {
    pub fn new(store: Arc<StateStore>, refresher: Arc<RefreshService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            refresher,
            clock,
        }
    }

    pub fn state(&self) -> DashboardState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.store.subscribe()
    }

    fn draft(&self) -> Option<DrawingDraft> {
        self.store.read(|s| s.drawing.clone())
    }

    pub fn start_drawing(&self) -> Result<DrawingDraft, DashboardError> {
        self.store.apply(StateCommand::StartDrawing)?;
        Ok(self.draft().unwrap_or_default())
    }

    pub fn add_drawing_point(&self, point: GeoPoint) -> Result<DrawingDraft, DashboardError> {
        self.store.apply(StateCommand::AddDrawingPoint(point))?;
        self.draft().ok_or(DashboardError::NoDraft)
    }

    pub fn undo_drawing_point(&self) -> Result<DrawingDraft, DashboardError> {
        self.store.apply(StateCommand::UndoDrawingPoint)?;
        self.draft().ok_or(DashboardError::NoDraft)
    }

    pub fn cancel_drawing(&self) -> Result<(), DashboardError> {
        self.store.apply(StateCommand::CancelDrawing)?;
        Ok(())
    }

    /// Finalize the draft and start its first classification.
    pub fn finish_drawing(&self, name: Option<String>) -> Result<(Polygon, RefreshHandle), DashboardError> {
        let events = self.store.apply(StateCommand::FinishDrawing { name })?;
        let polygon = events
            .into_iter()
            .find_map(|event| match event {
                StateEvent::PolygonAdded { polygon } => Some(polygon),
                _ => None,
            })
            .ok_or(DashboardError::NoDraft)?;

        tracing::info!(polygon_id = %polygon.id, name = %polygon.name, "Polygon created");
        let selected = self.current_selection();
        let source = self
            .store
            .read(|s| {
                s.data_sources
                    .iter()
                    .find(|source| source.id == polygon.color_source_id)
                    .cloned()
            })
            .ok_or_else(|| DashboardError::DataSourceNotFound(polygon.color_source_id.clone()))?;
        let handle = self.spawn_single(polygon.clone(), Some(selected), source);
        Ok((polygon, handle))
    }

    pub fn rename_polygon(&self, polygon_id: PolygonId, name: String) -> Result<(), DashboardError> {
        self.store
            .apply(StateCommand::RenamePolygon { polygon_id, name })?;
        Ok(())
    }

    pub fn delete_polygon(&self, polygon_id: PolygonId) -> Result<(), DashboardError> {
        self.store.apply(StateCommand::DeletePolygon(polygon_id))?;
        self.refresher.forget(polygon_id);
        tracing::info!(polygon_id = %polygon_id, "Polygon deleted");
        Ok(())
    }

    pub fn refresh_polygon(
        &self,
        polygon_id: PolygonId,
        window: RefreshWindow,
    ) -> Result<RefreshHandle, DashboardError> {
        let selected = self.current_selection();
        let (polygon, source) = self
            .store
            .read(|s| (s.polygon(polygon_id).cloned(), s.selected_source().cloned()));
        let polygon = polygon.ok_or(DashboardError::PolygonNotFound(polygon_id))?;
        let source = source.ok_or_else(|| self.missing_selected_source())?;

        let window = match window {
            RefreshWindow::Timeline => Some(selected),
            RefreshWindow::ArchiveDefault => None,
        };
        Ok(self.spawn_single(polygon, window, source))
    }

    pub fn refresh_all(&self) -> Result<RefreshHandle, DashboardError> {
        let source = self
            .store
            .read(|s| s.selected_source().cloned())
            .ok_or_else(|| self.missing_selected_source())?;
        Ok(self.refresh_source(source))
    }

    pub fn select_data_source(&self, source_id: String) -> Result<RefreshHandle, DashboardError> {
        self.store
            .apply(StateCommand::SelectDataSource(source_id.clone()))?;
        tracing::info!(source_id = %source_id, "Data source selected");
        self.refresh_all()
    }

    pub fn add_rule(&self, source_id: String, rule: ColorRule) -> Result<RefreshHandle, DashboardError> {
        let events = self.store.apply(StateCommand::AddRule { source_id, rule })?;
        Ok(self.refresh_changed_sources(events))
    }

    /// Replace an existing rule; fails with `RuleNotFound` if it is gone.
    pub fn update_rule(&self, source_id: String, rule: ColorRule) -> Result<RefreshHandle, DashboardError> {
        let events = self.store.apply(StateCommand::UpdateRule { source_id, rule })?;
        Ok(self.refresh_changed_sources(events))
    }

    pub fn delete_rule(&self, source_id: String, rule_id: Uuid) -> Result<RefreshHandle, DashboardError> {
        let events = self
            .store
            .apply(StateCommand::DeleteRule { source_id, rule_id })?;
        Ok(self.refresh_changed_sources(events))
    }

    pub fn select_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(Timeline, RefreshHandle), DashboardError> {
        let window = TimeWindow::new(start, end).ok_or(DashboardError::InvalidWindow)?;
        let now = self.clock.now();
        self.change_timeline(StateCommand::SelectWindow { window, now })
    }

    pub fn set_range_mode(&self, range_mode: bool) -> Result<(Timeline, RefreshHandle), DashboardError> {
        let now = self.clock.now();
        self.change_timeline(StateCommand::SetRangeMode { range_mode, now })
    }

    pub fn quick_select(&self, range: QuickRange) -> Result<(Timeline, RefreshHandle), DashboardError> {
        let now = self.clock.now();
        self.change_timeline(StateCommand::QuickSelect { range, now })
    }

    fn change_timeline(&self, command: StateCommand) -> Result<(Timeline, RefreshHandle), DashboardError> {
        let events = self.store.apply(command)?;
        let timeline = events
            .into_iter()
            .find_map(|event| match event {
                StateEvent::TimelineChanged { timeline } => Some(timeline),
                _ => None,
            })
            .unwrap_or_else(|| self.store.read(|s| s.timeline.clone()));
        Ok((timeline, self.refresh_all()?))
    }

    /// Roll the timeline up to now and return the selected window.
    fn current_selection(&self) -> TimeWindow {
        if let Err(e) = self
            .store
            .apply(StateCommand::RollTimeline(self.clock.now()))
        {
            tracing::warn!(error = %e, "Failed to roll timeline forward");
        }
        self.store.read(|s| s.timeline.selected)
    }

    fn missing_selected_source(&self) -> DashboardError {
        DashboardError::DataSourceNotFound(self.store.read(|s| s.selected_source_id.clone()))
    }

    fn refresh_changed_sources(&self, events: Vec<StateEvent>) -> RefreshHandle {
        let source = events.into_iter().find_map(|event| match event {
            StateEvent::DataSourceChanged { source } => Some(source),
            _ => None,
        });
        match source {
            Some(source) => self.refresh_source(source),
            None => tokio::spawn(async { Vec::new() }),
        }
    }

    /// Re-classify every polygon that takes its colors from `source`.
    fn refresh_source(&self, source: DataSource) -> RefreshHandle {
        let selected = self.current_selection();
        let polygons: Vec<Polygon> = self.store.read(|s| {
            s.polygons
                .iter()
                .filter(|p| p.color_source_id == source.id)
                .cloned()
                .collect()
        });
        self.spawn_refresh(polygons, Some(selected), source)
    }

    /// Generations are claimed before spawning, so trigger order decides
    /// which result survives regardless of how the tasks get scheduled.
    fn spawn_refresh(
        &self,
        polygons: Vec<Polygon>,
        window: Option<TimeWindow>,
        source: DataSource,
    ) -> RefreshHandle {
        tracing::debug!(count = polygons.len(), source_id = %source.id, "Scheduling refresh batch");
        tokio::spawn(self.refresher.clone().refresh_all(polygons, window, source))
    }

    fn spawn_single(&self, polygon: Polygon, window: Option<TimeWindow>, source: DataSource) -> RefreshHandle {
        tracing::debug!(polygon_id = %polygon.id, source_id = %source.id, "Scheduling refresh");
        let refresh = self.refresher.clone().refresh(polygon, window, source);
        tokio::spawn(async move { vec![refresh.await] })
    }
}
