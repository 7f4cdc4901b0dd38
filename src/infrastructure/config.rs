use crate::application::response_cache::CachePolicy;
use crate::domain::color_rule::{ColorRule, DataSource, Operator};
use serde::Deserialize;

pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    pub ttl_secs: i64,
    pub max_entries: usize,
    pub evict_batch_size: usize,
}

impl CacheSettings {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: chrono::Duration::seconds(self.ttl_secs),
            max_entries: self.max_entries,
            evict_batch_size: self.evict_batch_size,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataSourcesConfig {
    #[serde(default)]
    pub sources: Vec<DataSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataSourceConfig {
    pub id: String,
    pub name: String,
    pub field: String,
    pub unit: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    pub operator: Operator,
    pub threshold: f64,
    pub color: String,
}

impl DataSourceConfig {
    /// Rules seeded from configuration pass the same checks as rules
    /// created at runtime.
    pub fn into_data_source(self) -> anyhow::Result<DataSource> {
        let mut color_rules = Vec::with_capacity(self.rules.len());
        for (index, r) in self.rules.into_iter().enumerate() {
            let rule = ColorRule::new(r.operator, r.threshold, r.color);
            anyhow::ensure!(
                rule.is_valid(),
                "data source '{}' rule #{}: threshold must be finite and color non-empty",
                self.id,
                index + 1
            );
            color_rules.push(rule);
        }

        Ok(DataSource {
            id: self.id,
            name: self.name,
            field: self.field,
            unit: self.unit,
            color_rules,
            active: self.active,
        })
    }
}

fn parse_data_sources(parsed: DataSourcesConfig) -> anyhow::Result<Vec<DataSource>> {
    if parsed.sources.is_empty() {
        tracing::warn!("No data sources configured, using built-in temperature source");
        return Ok(vec![DataSource::default_temperature()]);
    }

    parsed
        .sources
        .into_iter()
        .map(DataSourceConfig::into_data_source)
        .collect()
}

fn settings_builder() -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(config::Config::builder()
        .set_default("server.bind_addr", "0.0.0.0:8080")?
        .set_default("upstream.base_url", DEFAULT_ARCHIVE_URL)?
        .set_default("upstream.timeout_secs", 10)?
        .set_default("cache.ttl_secs", 300)?
        .set_default("cache.max_entries", 50)?
        .set_default("cache.evict_batch_size", 10)?)
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = settings_builder()?
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(
            config::Environment::with_prefix("POLYGON_WEATHER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_data_sources() -> anyhow::Result<Vec<DataSource>> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/data_sources").required(false))
        .build()?;

    let parsed: DataSourcesConfig = settings.try_deserialize()?;
    parse_data_sources(parsed)
}
