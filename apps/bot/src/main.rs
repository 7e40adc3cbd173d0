mod config;
mod conversation;
mod dispatcher;
mod errors;
mod extract;
mod llm_client;
mod render;
mod rewrite;
mod routes;
mod state;
mod transport;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::conversation::{InMemorySessionStore, SessionStore};
use crate::dispatcher::Dispatcher;
use crate::llm_client::GeminiClient;
use crate::render::PageConfig;
use crate::routes::build_router;
use crate::state::AppState;
use crate::transport::telegram::{run_polling, TelegramTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing secrets)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resume Bot v{}", env!("CARGO_PKG_VERSION"));

    // Initialize generator
    let generator = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )?);
    info!("Generator initialized (model: {})", generator.model());

    // Initialize chat transport
    let telegram = Arc::new(TelegramTransport::new(
        config.telegram_bot_token.clone(),
        config.poll_timeout_secs,
    )?);

    // Initialize session store
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    if let Some(ttl) = config.session_ttl {
        tokio::spawn(sweep_idle_sessions(store.clone(), ttl));
        info!("Idle sessions expire after {}s", ttl.as_secs());
    }

    let page_config = PageConfig::default();
    info!(
        "Page config: {} chars per line, {} lines per page",
        page_config.chars_per_line(),
        page_config.lines_per_page()
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        store,
        generator,
        transport: telegram.clone(),
        page_config,
    };

    let dispatcher = Dispatcher::new(state.clone());

    // Health endpoint
    let app = build_router(state).layer(TraceLayer::new_for_http());
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health endpoint listening on {addr}");
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    tokio::select! {
        result = run_polling(&telegram, &dispatcher) => result?,
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    server.await??;
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Periodically drops sessions that have been idle longer than `ttl`.
async fn sweep_idle_sessions(store: Arc<dyn SessionStore>, ttl: Duration) {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(600));
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            warn!("Session TTL out of range; sweeper stopped");
            return;
        };
        match store.purge_idle(chrono::Utc::now() - ttl).await {
            Ok(0) => {}
            Ok(purged) => info!("Purged {purged} idle sessions"),
            Err(e) => warn!("Session sweep failed: {e}"),
        }
    }
}
