//! billclock Demo Runner
//!
//! Runs one subscription lifecycle demo against Stripe test mode:
//!
//! ```text
//! billclock-demo CancelSubscriptionWithSchedule
//! ```
//!
//! Without an argument the schedule resume demo runs. `CreateProducts` sets up
//! the catalog the other demos subscribe to.

use std::sync::Arc;

use billclock_billing::{Demo, DemoRunner, SimulationSettings, StripeClient, TokioSleeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let demo = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<Demo>().map_err(anyhow::Error::msg)?,
        None => Demo::default(),
    };

    let client = StripeClient::from_env()?;
    let settings = SimulationSettings::from_env()?;
    tracing::info!(demo = %demo, ?settings, "Starting billclock demo");

    let runner = DemoRunner::new(Arc::new(client), Arc::new(TokioSleeper), settings);
    let outcome = runner.run(demo).await?;

    tracing::info!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
