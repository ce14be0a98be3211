//! Bilingual tutor chat API
//!

use tokio_tutor_chat_api::api;
use tokio_tutor_chat_api::config::Settings;
use tokio_tutor_chat_api::core::prompt::PromptBuilder;
use tokio_tutor_chat_api::core::services::{MyChatService, MyConversationService};
use tokio_tutor_chat_api::infrastructure::inference::OllamaClient;
use tokio_tutor_chat_api::infrastructure::store::ConversationStore;

use anyhow::anyhow;
use axum::http::{HeaderValue, Method};
use di::{Injectable, ServiceCollection, existing_as_self};
use di_axum::RouterServiceProviderExtensions;
use log::{error, info};
use tokio::runtime::{Builder, Runtime};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // initialize tracing, `log` records included
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(web_server_task(settings))
}

async fn web_server_task(settings: Settings) -> anyhow::Result<()> {
    let store = ConversationStore::connect(&settings).await;
    let prompts = PromptBuilder::tutor(&settings)?;
    let cors = cors_layer(&settings.cors_origins)?;
    let bind_address = settings.bind_address.clone();

    info!(
        "Inference at {} with model {}, store backend {:?}",
        settings.inference_url,
        settings.model,
        store.mode()
    );

    let provider = ServiceCollection::new()
        .add(existing_as_self(settings))
        .add(existing_as_self(store))
        .add(existing_as_self(prompts))
        .add(OllamaClient::singleton())
        .add(MyConversationService::scoped())
        .add(MyChatService::scoped())
        .build_provider()
        .map_err(|e| anyhow!("invalid service registrations: {e}"))?;

    let app = api::router()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Shutting down...");

    Ok(())
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(AllowOrigin::list(origins)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
}
