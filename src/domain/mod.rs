// Domain layer - Pure models and calculations
pub mod color_rule;
pub mod date_range;
pub mod geo;
pub mod polygon;
pub mod series;
pub mod timeline;
