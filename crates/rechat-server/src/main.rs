#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use rechat_core::llm::OpenAiClient;
use rechat_core::{AppCore, GenerationConfig};
use rechat_server::config::ServerConfig;
use rechat_server::build_router;

#[tokio::main]
async fn main() {
    // Initialize tracing logger
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rechat_server=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting rechat server");

    let config = ServerConfig::load().expect("Failed to load configuration");
    if config.llm.api_key.is_empty() {
        tracing::warn!("No API key configured, set RECHAT_API_KEY or [llm].api_key");
    }

    let llm = Arc::new(
        OpenAiClient::new(config.llm.api_key.clone())
            .with_model(config.llm.model.clone())
            .with_base_url(config.llm.base_url.clone()),
    );

    let core = Arc::new(
        AppCore::new(
            &config.db_path,
            llm,
            GenerationConfig {
                workers: config.workers,
                system_prompt: config.llm.system_prompt.clone(),
                ..Default::default()
            },
        )
        .expect("Failed to initialize app core"),
    );

    let app = build_router(core);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("rechat running on http://{addr}");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
