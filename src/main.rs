// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::EnvFilter;

use crate::application::clock::{Clock, SystemClock};
use crate::application::dashboard_service::DashboardService;
use crate::application::refresh_service::RefreshService;
use crate::application::response_cache::ResponseCache;
use crate::application::state_store::{DashboardState, StateStore};
use crate::infrastructure::config::{load_data_sources, load_settings};
use crate::infrastructure::open_meteo::OpenMeteoClient;
use crate::presentation::app_state::AppState;
use crate::presentation::router::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,polygon_weather=debug")),
        )
        .init();

    // Load configuration
    let settings = load_settings()?;
    let data_sources = load_data_sources()?;
    let timeout = std::time::Duration::from_secs(settings.upstream.timeout_secs);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Upstream client (infrastructure layer)
    let upstream = Arc::new(OpenMeteoClient::new(settings.upstream.base_url.clone(), timeout)?);

    // Shared state, cache and services (application layer)
    let store = Arc::new(StateStore::new(DashboardState::new(data_sources, clock.now())));
    let cache = Arc::new(ResponseCache::new(settings.cache.policy(), clock.clone()));
    let refresher = Arc::new(RefreshService::new(
        upstream,
        cache,
        store.clone(),
        clock.clone(),
        timeout,
    ));
    let dashboard_service = DashboardService::new(store, refresher, clock);

    let state = Arc::new(AppState { dashboard_service });

    // Build router (presentation layer)
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = settings.server.bind_addr.parse()?;
    tracing::info!(%addr, upstream = %settings.upstream.base_url, "Starting polygon-weather service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
