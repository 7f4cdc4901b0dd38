// Polygon domain model and the in-progress drawing draft
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::color_rule::DEFAULT_COLOR;
use super::geo::{centroid, GeoPoint};

pub const MIN_VERTICES: usize = 3;

pub type PolygonId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub id: PolygonId,
    pub name: String,
    pub vertices: Vec<GeoPoint>,
    pub color_source_id: String,
    pub current_color: String,
    pub current_value: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Number of refreshes in flight for this polygon
    #[serde(skip)]
    pub pending_refreshes: u32,
}

impl Polygon {
    pub fn new(name: String, vertices: Vec<GeoPoint>, color_source_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            vertices,
            color_source_id,
            current_color: DEFAULT_COLOR.to_string(),
            current_value: None,
            last_updated: None,
            pending_refreshes: 0,
        }
    }

    pub fn centroid(&self) -> Option<GeoPoint> {
        centroid(&self.vertices)
    }

    pub fn is_loading(&self) -> bool {
        self.pending_refreshes > 0
    }

    pub fn default_name(existing: usize) -> String {
        format!("Polygon {}", existing + 1)
    }
}

/// Points placed so far for a polygon that has not been finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawingDraft {
    pub points: Vec<GeoPoint>,
}

impl DrawingDraft {
    pub fn add_point(&mut self, point: GeoPoint) {
        self.points.push(point);
    }

    pub fn undo_last(&mut self) -> Option<GeoPoint> {
        self.points.pop()
    }

    pub fn can_finish(&self) -> bool {
        self.points.len() >= MIN_VERTICES
    }

    /// Consumes the draft. Returns it back unchanged if it has too few vertices.
    pub fn finish(self, name: String, color_source_id: String) -> Result<Polygon, DrawingDraft> {
        if !self.can_finish() {
            return Err(self);
        }
        Ok(Polygon::new(name, self.points, color_source_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_name() {
        assert_eq!(Polygon::default_name(0), "Polygon 1");
        assert_eq!(Polygon::default_name(4), "Polygon 5");
    }

    #[test]
    fn test_draft_requires_three_vertices() {
        let mut draft = DrawingDraft::default();
        draft.add_point(GeoPoint::new(51.5, -0.1));
        draft.add_point(GeoPoint::new(51.6, -0.1));

        let draft = draft
            .finish("Park".to_string(), "temperature".to_string())
            .unwrap_err();
        assert_eq!(draft.points.len(), 2);

        let mut draft = draft;
        draft.add_point(GeoPoint::new(51.6, 0.0));
        let polygon = draft
            .finish("Park".to_string(), "temperature".to_string())
            .unwrap();

        assert_eq!(polygon.vertices.len(), 3);
        assert_eq!(polygon.current_color, DEFAULT_COLOR);
        assert!(polygon.current_value.is_none());
        assert!(!polygon.is_loading());
    }

    #[test]
    fn test_undo_last_point() {
        let mut draft = DrawingDraft::default();
        draft.add_point(GeoPoint::new(1.0, 1.0));
        draft.add_point(GeoPoint::new(2.0, 2.0));
        assert_eq!(draft.undo_last(), Some(GeoPoint::new(2.0, 2.0)));
        assert_eq!(draft.points.len(), 1);
    }
}
