//! Main Entrypoint for the Dealcoach API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Loading the technique catalog and initializing shared services.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use dealcoach_api::{config::Config, db::Db, router::create_router, state::AppState};
use dealcoach_core::{
    evaluation::{EvaluationAggregator, LlmTurnEvaluator, PhasePolicy},
    generator::{OpenAICompatibleClient, TextGenerator},
    state_machine::EndIntentLexicon,
    technique::TechniqueCatalog,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Load Catalog and Initialize Shared Services ---
    let catalog = Arc::new(
        TechniqueCatalog::load(&config.catalog_path).context("Failed to load technique catalog")?,
    );
    info!(
        techniques = catalog.ordered_ids().len(),
        "Technique catalog loaded."
    );

    let mut openai_config = OpenAIConfig::new().with_api_key(&config.openai_api_key);
    if let Some(base_url) = &config.openai_base_url {
        openai_config = openai_config.with_api_base(base_url);
    }
    let generator: Arc<dyn TextGenerator> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));
    let aggregator = Arc::new(EvaluationAggregator::new(
        Arc::new(LlmTurnEvaluator::new(generator.clone())),
        PhasePolicy::default(),
    ));

    let app_state = Arc::new(AppState {
        db,
        generator,
        aggregator,
        catalog,
        lexicon: Arc::new(EndIntentLexicon::default()),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
