// Infrastructure layer - External dependencies and adapters
pub mod chunked_events;
pub mod config;
pub mod http_response;
pub mod open_meteo;
