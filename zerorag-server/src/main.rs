use tracing_subscriber::EnvFilter;
use zerorag_core::AppConfig;
use zerorag_server::{serve, App};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ZERORAG_LOG")
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let app = App::build(config).await?;
    serve(app).await
}
