use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use comfyui_job_gateway::{api, config, service};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    config::Config::dotenv_load();
    let config = config::Config::new().expect("Failed to load configuration");
    config.print_env_vars();

    let gateway = match service::Gateway::from_config(&config) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            tracing::error!("failed to initialise gateway: {}", e);
            std::process::exit(1);
        }
    };
    match gateway.templates().await {
        Ok(names) if names.is_empty() => {
            tracing::warn!("no workflow templates found in {}", config.workflows_dir.display())
        }
        Ok(names) => tracing::info!("templates: {}", names.join(", ")),
        Err(e) => tracing::warn!("could not list templates: {}", e),
    }

    gateway.spawn_janitor();
    let app = api::router(gateway);

    // Run our application with safe parsing
    let ip: std::net::IpAddr = config.api_host.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid API_HOST '{}', falling back to 127.0.0.1", config.api_host);
        std::net::IpAddr::from([127, 0, 0, 1])
    });
    let socket_address = SocketAddr::new(ip, config.api_port);
    tracing::info!("listening on {}", socket_address);
    if let Err(e) = axum::Server::bind(&socket_address)
        .serve(app.into_make_service())
        .await
    {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}
