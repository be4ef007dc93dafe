mod app_state;
mod crypto;
mod error;
mod fetch;
mod handlers;
mod metrics;

use axum::middleware;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::fetch::Fetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(3001);
    let decrypt_content_type = std::env::var("DECRYPT_CONTENT_TYPE")
        .unwrap_or_else(|_| fetch::DEFAULT_CONTENT_TYPE.to_string());

    let fetcher = Fetcher::new()?;
    let state = AppState::new(fetcher, decrypt_content_type);

    let app = handlers::router(state)
        .merge(metrics::metrics_app())
        .layer(middleware::from_fn(metrics::record_metrics));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}
