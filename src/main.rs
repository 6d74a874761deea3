use anyhow::Result;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// All three backing services need credentials before anything starts;
/// report every missing variable at once instead of failing one at a time.
fn require_env() -> Result<()> {
    let missing: Vec<&str> = ["TMDB_API_KEY", "IDENTITY_API_KEY", "FAVORITES_PROJECT_ID"]
        .into_iter()
        .filter(|key| env::var(key).is_err())
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("Missing required environment variables: {}", missing.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the filter reads RUST_LOG; log the outcome after the
    // subscriber exists.
    let dotenv_path = dotenvy::dotenv().ok();
    init_tracing();
    match dotenv_path {
        Some(path) => info!("Environment loaded from {}", path.display()),
        None => warn!("No .env file found - relying on the process environment"),
    }
    require_env()?;
    mireserva::app::run_server().await
}
