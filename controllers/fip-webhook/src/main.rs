//! Floating IP Admission Webhook
//!
//! Validates FloatingIP and FloatingIPPool resources before the API server
//! persists them:
//! - FloatingIP: pool existence, requested address or pool capacity, project quota
//! - FloatingIPPool: subnet, range and exclusion consistency
//!
//! The webhook obtains and renews its own serving certificate through the
//! cluster's certificate signing request API.

mod config;
mod controller;
mod error;
mod handlers;
mod registration;
mod server;
mod validation;

use crate::config::WebhookConfig;
use crate::error::WebhookError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), WebhookError> {
    let config = WebhookConfig::from_env()?;

    let filter =
        EnvFilter::try_new(config.log_directive()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting floating IP admission webhook");

    // Both ring and aws-lc-rs are linked; pick ring explicitly.
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Configuration:");
    info!("  Service: {}/{}", config.webhook_namespace, config.webhook_name);
    info!("  Webhook configuration: {}", config.webhook_config_name);
    info!("  Port: {}", config.port);
    info!("  Renewal window: {} minutes", config.renewal_window_minutes);
    info!("  TLS directory: {}", config.tls_dir.display());

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
