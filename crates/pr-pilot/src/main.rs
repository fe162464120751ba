#[macro_use]
extern crate tracing;

use std::sync::Arc;

use anyhow::Context as _;
use pr_pilot::analysis::Analyst;
use pr_pilot::config::Config;
use pr_pilot::server::{self, AppState};
use pr_pilot::session::SessionBuilder;
use pr_pilot::tools::{BackendClient, RetryPolicy};
use pr_pilot_core::ModelClient;
use pr_pilot_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine, the environment may already be set.
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_pilot=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(?config, "starting pr-pilot");

    let provider_config = OpenAIConfigBuilder::with_api_key(&config.api_key)
        .with_base_url(&config.model_base_url)
        .with_model(&config.model)
        .build();
    let model_client = ModelClient::new(OpenAIProvider::new(provider_config)?);
    let backend =
        BackendClient::new(&config.backend_url, RetryPolicy::default())?;

    let analyst = Analyst::new(model_client.clone(), config.model_timeout);
    let session = SessionBuilder::with_model_client(model_client, backend)
        .with_limits(config.agent)
        .build()?;

    let cors = match &config.proxy_url {
        Some(origin) => Some(
            server::cors_layer(origin)
                .with_context(|| format!("invalid PROXY_URL {origin}"))?,
        ),
        None => {
            warn!("PROXY_URL is not set, cross-origin requests are refused");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        analyst,
        session,
        shutdown: shutdown.clone(),
    });
    let router = server::router(state, cors);

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("server is running on {bind_addr}");

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {err}");
                return;
            }
            info!("shutting down");
            shutdown.cancel();
        }
    });

    server::serve(listener, router, shutdown).await?;
    Ok(())
}
