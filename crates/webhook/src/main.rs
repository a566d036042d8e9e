//! billclock Webhook Receiver
//!
//! Listens for signed Stripe deliveries and logs subscription lifecycle events.

use std::net::SocketAddr;

use billclock_billing::{WebhookConfig, WebhookVerifier};
use billclock_webhook::{create_router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "billclock_webhook=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting billclock webhook v{}", env!("CARGO_PKG_VERSION"));

    let config = WebhookConfig::from_env()?;
    let app = create_router(AppState::new(WebhookVerifier::new(
        config.endpoint_secret,
    )));

    let port = config.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Running on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
