use anyhow::Context;
use brokerx_wallet::eventbus::{event_channel, LoggingPublisher, WebhookPublisher};
use brokerx_wallet::orchestration::{IdempotencyStore, SqliteIdempotencyStore};
use brokerx_wallet::{api, config::Config, db::init_db, EventPublisher, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const EVENT_QUEUE_CAPACITY: usize = 1024;
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let publisher: Arc<dyn EventPublisher> = match &config.settled_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Publishing settlements to webhook");
            Arc::new(WebhookPublisher::new(url.clone()))
        }
        None => Arc::new(LoggingPublisher),
    };
    let idempotency_store: Arc<dyn IdempotencyStore> =
        Arc::new(SqliteIdempotencyStore::new(repo.clone()));

    let (sender, source) = event_channel(EVENT_QUEUE_CAPACITY, REDELIVERY_DELAY);
    let state = api::AppState::new(repo, config, publisher, idempotency_store)
        .with_event_sender(sender);

    let intake = state.intake.clone();
    tokio::spawn(async move {
        if let Err(e) = intake.run(&source).await {
            tracing::error!(error = %e, "Event intake stopped with error");
        }
    });

    if let Err(e) = serve(state, port).await {
        eprintln!("Server error: {:#}", e);
        std::process::exit(1);
    }
}

async fn serve(state: api::AppState, port: u16) -> anyhow::Result<()> {
    let app = api::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server crashed")?;
    Ok(())
}
