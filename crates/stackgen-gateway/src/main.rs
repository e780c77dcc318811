//! StackGen gateway - main entry point

use stackgen_gateway::GatewaySettings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = GatewaySettings::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("StackGen gateway v{}", env!("CARGO_PKG_VERSION"));

    stackgen_gateway::serve(settings).await
}
