use std::time::Duration;

use clap::Parser;
use log::{error, info};

use docker_registry_manager::cli::Args;
use docker_registry_manager::manager::RegistryManager;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .init();

    let manager = RegistryManager::new();
    let refresh_interval = Duration::from_secs(args.refresh_rate);

    for raw in args.registries.iter().filter(|raw| !raw.is_empty()) {
        match manager.add_registry_url(raw, refresh_interval, args.skip_tls) {
            Ok(record) => info!("watching {}", record.identity()),
            Err(err) => {
                error!("failed to add registry {raw}: {err}");
                std::process::exit(1);
            }
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
    }
    info!("shutting down");
    manager.shutdown().await;
}
