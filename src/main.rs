mod utils;
mod collectors;
mod core;
mod predictors;
mod api;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use tracing::info;

#[tokio::main]
async fn main() {
    utils::logging::init();

    let config = match utils::config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return;
        }
    };
    info!(
        db = %config.db_path.display(),
        provider = %config.forecast.base_url,
        timestamps = ?config.forecast.timestamp_mode,
        "astro_planner initialized"
    );

    // Fail early on an unusable database rather than on the first request
    if let Err(e) = utils::db::open_or_init(&config.db_path) {
        tracing::error!(error = %e, "Failed to initialize database");
        return;
    }

    let client = match collectors::open_meteo::OpenMeteoClient::new(config.forecast.clone()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build forecast client");
            return;
        }
    };

    let state = api::server::AppState { db_path: Arc::new(config.db_path), client };
    if let Err(e) = api::server::run_server(state, config.bind_addr).await {
        tracing::error!(error = %e, "API server stopped");
    }
}
