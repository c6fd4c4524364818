use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::ReceiverConfig;
use crate::core::runtask::client::PlatformClient;
use crate::core::runtask::dispatcher::StageDispatcher;
use crate::core::terminal::{print_banner, print_link, print_status, print_step, print_warn};
use crate::interfaces::web::ReceiverServer;
use crate::logging;

pub async fn run_serve(args: &[String], start: usize) -> Result<()> {
    let mut config = ReceiverConfig::from_env().context("invalid environment configuration")?;
    config
        .apply_flags(args, start)
        .context("invalid command line flag")?;

    logging::init(config.log_level);
    print_summary(&config);

    if config.uses_default_key() {
        warn!("HMAC_KEY is not set; using the placeholder key. Do not run like this in production.");
    }

    let platform = PlatformClient::new(config.redirects).context("failed to build HTTP client")?;
    let dispatcher = StageDispatcher::new(Arc::new(platform), &config);
    let server = ReceiverServer::new(&config, Arc::new(dispatcher));

    info!("Starting run task receiver...");
    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
}

fn print_summary(config: &ReceiverConfig) {
    print_banner();
    print_link("Listening", &format!("http://{}", config.bind_addr()));
    print_status("Download dir", &config.download_dir.display().to_string());
    print_status(
        "Redirects",
        &format!(
            "config ≤ {}, plan ≤ {}, callback none",
            config.redirects.config_max_hops, config.redirects.plan_max_hops
        ),
    );
    print_status("Log level", &config.log_level.to_string());
    if config.uses_default_key() {
        print_warn("Using the placeholder HMAC key. Set HMAC_KEY before exposing this receiver.");
    }
    print_step("Press Ctrl+C to stop.");
    println!();
}
