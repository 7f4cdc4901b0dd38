// Application layer - Use cases, ports and shared state
pub mod clock;
pub mod dashboard_service;
pub mod error;
pub mod refresh_service;
pub mod response_cache;
pub mod state_store;
pub mod weather_source;
