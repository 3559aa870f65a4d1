mod account;
mod api;
mod auth;
mod authority;
mod bootstrap;
mod config;
mod context;
mod db;
mod error;
mod mailer;
mod rbac;
mod server;
mod subscription;
mod tenant;
mod token;

use config::ServerConfig;
use context::AppContext;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsdesk=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Opsdesk back office v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration loaded for {}:{}",
        config.service.hostname, config.service.port
    );

    // Assemble application context (pool, migrations, services)
    let ctx = match AppContext::new(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to initialize application context: {}", e);
            std::process::exit(1);
        }
    };

    // Provision roles, permissions and the trial plan
    if let Err(e) = bootstrap::provision(&ctx).await {
        error!("Startup provisioning failed: {}", e);
        std::process::exit(1);
    }

    // Start serving
    if let Err(e) = server::serve(ctx).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
