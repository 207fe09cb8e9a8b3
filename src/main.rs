//! Callflow - scripted phone conversations over a call-control webhook
//!
//! Answers incoming calls, walks the caller through a ruleset of questions,
//! and mails the collected answers and recordings once the call ends.

mod aggregator;
mod api;
mod client_state;
mod config;
mod db;
mod dispatcher;
mod email;
mod engine;
mod models;
mod services;
mod telephony;
#[cfg(test)]
mod testing;
mod validator;

use aggregator::{ProductionAggregator, RecordingAggregator};
use api::{create_router, AppState};
use config::Config;
use db::Database;
use dispatcher::EventDispatcher;
use email::HttpMailer;
use engine::{ConversationEngine, ProductionEngine};
use services::DatabaseStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use telephony::CommandClient;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::LlmAnswerValidator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callflow=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    if config.telephony.api_key.is_empty() {
        tracing::warn!("TELNYX_API_KEY is not set, commands will be rejected by the platform");
    }

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;
    let store = Arc::new(DatabaseStore::new(db));

    let commands = Arc::new(CommandClient::new(&config.telephony)?);
    let validator = Arc::new(LlmAnswerValidator::new(&config.validator)?);
    let mailer = Arc::new(HttpMailer::new(&config.mailer)?);

    let engine: Arc<ProductionEngine> = Arc::new(ConversationEngine::new(
        Arc::clone(&store),
        Arc::clone(&commands),
        validator,
        config.speech.clone(),
    ));
    let aggregator: Arc<ProductionAggregator> = Arc::new(RecordingAggregator::new(
        Arc::clone(&store),
        commands,
        mailer,
        config.aggregator,
        config.mailer.fallback_recipient.clone(),
    ));
    let dispatcher = Arc::new(EventDispatcher::new(
        engine,
        aggregator,
        config.default_ruleset.clone(),
    ));

    tracing::info!(
        default_ruleset = %config.default_ruleset,
        api_url = %config.telephony.api_url,
        "Call handling initialized"
    );

    let state = AppState::new(dispatcher, store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Callflow server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
