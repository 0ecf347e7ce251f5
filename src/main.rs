pub mod api;
pub mod config;
pub mod data_structures;
pub mod engine;
pub mod error;
pub mod research_service;
pub mod utils;

use crate::data_structures::ResearchSettings;
use crate::engine::SharedEngineFactory;
use axum::extract::FromRef;
use std::net::SocketAddr;
use std::process::ExitCode;

#[derive(Clone)]
pub struct AppState {
    pub engines: SharedEngineFactory,
    pub settings: ResearchSettings,
}

impl FromRef<AppState> for SharedEngineFactory {
    fn from_ref(app_state: &AppState) -> SharedEngineFactory {
        app_state.engines.clone()
    }
}

impl FromRef<AppState> for ResearchSettings {
    fn from_ref(app_state: &AppState) -> ResearchSettings {
        app_state.settings.clone()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let app_config = match config::AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    // Set a global span with node_name for all subsequent logs
    let _span = tracing::info_span!("node", name = %app_config.node_name).entered();

    tracing::info!("Starting tradingagents-gateway");
    tracing::info!(
        environment = %app_config.environment,
        port = app_config.port,
        engine_timeout = ?app_config.engine_timeout,
        as_of_timezone = ?app_config.as_of_timezone,
        "Loaded configuration"
    );

    let engines = match engine::factory_from_config(&app_config.engine) {
        Ok(engines) => engines,
        Err(e) => {
            tracing::error!(error = %e, "Failed to set up analysis engine");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(engine = app_config.engine_kind(), "Analysis engine ready");

    let app_state = AppState {
        engines,
        settings: ResearchSettings {
            engine_timeout: app_config.engine_timeout,
            as_of_timezone: app_config.as_of_timezone,
        },
    };
    let app = api::router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind listener");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Server stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
