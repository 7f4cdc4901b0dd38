// Color rules and the value-to-color classifier
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Color used until a polygon is first classified, and when no rule matches.
pub const DEFAULT_COLOR: &str = "#3388ff";

/// Absolute tolerance for the `=` operator.
const EQUALITY_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
}

impl Operator {
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::LessThan => value < threshold,
            Operator::LessOrEqual => value <= threshold,
            Operator::Equal => (value - threshold).abs() <= EQUALITY_TOLERANCE,
            Operator::GreaterOrEqual => value >= threshold,
            Operator::GreaterThan => value > threshold,
        }
    }

    // Tie-break between rules sharing a threshold
    fn rank(&self) -> u8 {
        match self {
            Operator::LessThan => 0,
            Operator::LessOrEqual => 1,
            Operator::Equal => 2,
            Operator::GreaterOrEqual => 3,
            Operator::GreaterThan => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRule {
    pub id: Uuid,
    pub operator: Operator,
    pub threshold: f64,
    pub color: String,
}

impl ColorRule {
    pub fn new(operator: Operator, threshold: f64, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operator,
            threshold,
            color: color.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.threshold.is_finite() && !self.color.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    /// Upstream hourly field, e.g. `temperature_2m`
    pub field: String,
    pub unit: String,
    pub color_rules: Vec<ColorRule>,
    pub active: bool,
}

impl DataSource {
    /// Used when no data sources are configured
    pub fn default_temperature() -> Self {
        Self {
            id: "temperature".to_string(),
            name: "Temperature".to_string(),
            field: "temperature_2m".to_string(),
            unit: "°C".to_string(),
            color_rules: Vec::new(),
            active: true,
        }
    }
}

/// Maps a value to a color.
///
/// Rules are evaluated in ascending threshold order and every matching rule
/// overwrites the result, so the highest matching threshold wins. With
/// `[>=10 green, >=25 red]` a value of 30 is red and 15 is green.
pub fn classify(value: f64, rules: &[ColorRule]) -> String {
    if rules.is_empty() {
        return DEFAULT_COLOR.to_string();
    }

    let mut ordered: Vec<&ColorRule> = rules.iter().collect();
    ordered.sort_by(|a, b| {
        a.threshold
            .total_cmp(&b.threshold)
            .then_with(|| a.operator.rank().cmp(&b.operator.rank()))
            .then_with(|| a.color.cmp(&b.color))
    });

    let mut color: &str = DEFAULT_COLOR;
    for rule in ordered {
        if rule.operator.matches(value, rule.threshold) {
            color = rule.color.as_str();
        }
    }

    color.to_string()
}
