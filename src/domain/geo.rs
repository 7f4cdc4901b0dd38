// Geographic primitives
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Query point for a polygon: plain mean of the vertex coordinates.
/// No projection correction, so this drifts for very large polygons.
pub fn centroid(vertices: &[GeoPoint]) -> Option<GeoPoint> {
    if vertices.is_empty() {
        return None;
    }

    let count = vertices.len() as f64;
    let (lat_sum, lng_sum) = vertices.iter().fold((0.0, 0.0), |(lat, lng), p| {
        (lat + p.latitude, lng + p.longitude)
    });

    Some(GeoPoint::new(lat_sum / count, lng_sum / count))
}
