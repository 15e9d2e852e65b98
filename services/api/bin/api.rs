//! Main Entrypoint for the Voice Agent API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing shared services (speech providers, LLM client, order assistant).
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use voice_agent_api::{
    assistant::OrderAssistant,
    config::Config,
    router::create_router,
    state::AppState,
    ws::provider,
};
use voice_agent_core::{
    DEFAULT_SYSTEM_PROMPT, VoicePipeline,
    llm_client::{LLMSettings, OpenAICompatibleClient},
};

/// How long shutdown waits for live sessions to release their collaborators.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = ?e, "Failed to listen for Ctrl+C; shutting down.");
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads the system prompt override, falling back to the built-in prompt.
fn load_system_prompt(config: &Config) -> anyhow::Result<String> {
    match &config.system_prompt_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Could not read system prompt from {}", path.display())),
        None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 2. Initialize Shared Services ---
    let system_prompt = Arc::new(load_system_prompt(&config)?);
    let llm_config = OpenAIConfig::new()
        .with_api_key(&config.groq_api_key)
        .with_api_base(&config.groq_api_base);
    let llm_client = Arc::new(OpenAICompatibleClient::new(
        llm_config,
        LLMSettings {
            model: config.groq_model.clone(),
            temperature: config.groq_temperature,
            max_tokens: config.groq_max_tokens,
        },
    ));
    let assistant = Arc::new(OrderAssistant::new(llm_client, system_prompt));

    let pipeline = VoicePipeline::new(
        provider::speech_to_text(&config)?,
        provider::text_to_speech(&config),
        assistant,
    );

    let app_state = Arc::new(AppState::new(pipeline, Arc::new(config.clone())));
    let shutdown = app_state.shutdown.clone();
    let session_tasks = app_state.session_tasks.clone();

    // --- 3. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 4. Start Server ---
    info!(
        stt_provider = ?config.stt_provider,
        model = %config.groq_model,
        bind_address = %config.bind_address,
        static_dir = ?config.static_dir,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Upgraded sockets outlive the HTTP connection; close their sessions explicitly.
        shutdown.cancel();
    })
    .await?;

    session_tasks.close();
    info!(remaining = session_tasks.len(), "Waiting for voice sessions to close...");
    if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, session_tasks.wait())
        .await
        .is_err()
    {
        warn!(remaining = session_tasks.len(), "Voice sessions did not close in time.");
    }

    info!("Server has shut down.");
    Ok(())
}
