//! Top-level lifecycle owner.
//!
//! Bootstrap order: serving identity, webhook registration, HTTPS server,
//! renewal scheduler. Any bootstrap failure is fatal. Afterwards the
//! controller waits for a shutdown signal or for the scheduler to fail.

use crate::config::WebhookConfig;
use crate::error::WebhookError;
use crate::handlers;
use crate::registration::WebhookRegistration;
use crate::server::WebhookServer;
use crate::validation::{FloatingIPValidator, KubeLookup};
use kube::Client;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use webhook_tls::{
    CertificateManager, KubeCsrClient, KubeSecretStore, LocalTlsFiles, RenewalScheduler,
    ServiceIdentity, ServingEndpoint,
};

/// Webhook process controller.
pub struct Controller {
    config: WebhookConfig,
    client: Client,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller with a client built from `config`.
    pub async fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        info!("Initializing webhook controller");
        let client = kube_client(&config).await?;
        Ok(Self { config, client })
    }

    /// Bootstraps all components and serves until shutdown.
    pub async fn run(self) -> Result<(), WebhookError> {
        let config = &self.config;
        let window = config.renewal_window_minutes;

        let identity = ServiceIdentity::new(&config.webhook_name, &config.webhook_namespace);
        let files = LocalTlsFiles::in_dir(&config.tls_dir);
        let manager = CertificateManager::new(
            identity.clone(),
            Box::new(KubeCsrClient::new(self.client.clone())),
            Box::new(KubeSecretStore::new(
                self.client.clone(),
                identity.namespace(),
                identity.secret_name(),
            )),
            files.clone(),
        );

        let outcome = manager.ensure_fresh(window).await.map_err(|e| {
            error!("Cannot obtain a serving certificate: {}", e);
            WebhookError::Tls(e)
        })?;
        let expiration = manager.expiration().await?;
        info!(?outcome, expiration = %expiration, "Serving certificate ready");

        WebhookRegistration::new(config)
            .ensure(self.client.clone())
            .await
            .map_err(|e| {
                error!("Cannot register webhooks: {}", e);
                e
            })?;

        let lookup = Arc::new(KubeLookup::new(self.client.clone()));
        let validator = Arc::new(FloatingIPValidator::new(lookup.clone(), lookup));
        let server = Arc::new(WebhookServer::new(
            config.port,
            files,
            handlers::router(validator),
        ));
        server
            .start()
            .await
            .map_err(|e| WebhookError::Server(e.to_string()))?;

        let scheduler = RenewalScheduler::new(Arc::new(manager), Arc::clone(&server), window);
        let mut renewals = scheduler.start();
        info!("{} is running", config.webhook_name);

        let result = tokio::select! {
            result = renewals.join() => {
                let reason = match result {
                    Ok(()) => "renewal scheduler exited".to_string(),
                    Err(e) => e.to_string(),
                };
                error!("Renewal scheduler stopped: {}", reason);
                Err(WebhookError::Scheduler(reason))
            }
            () = shutdown_signal() => {
                info!("Received shutdown signal, gracefully shutting down");
                if let Err(e) = renewals.shutdown().await {
                    error!("Renewal scheduler ended with error: {}", e);
                }
                Ok(())
            }
        };

        if let Err(e) = server.stop().await {
            error!("Failed to stop webhook server: {}", e);
        }
        result
    }
}

/// Builds a client from the kubeconfig file if it exists, else from the in-cluster environment.
async fn kube_client(config: &WebhookConfig) -> Result<Client, WebhookError> {
    let kube_config = if config.kubeconfig_path.exists() {
        info!("Using kubeconfig {}", config.kubeconfig_path.display());
        let kubeconfig = Kubeconfig::read_from(&config.kubeconfig_path)
            .map_err(|e| WebhookError::KubeConfig(e.to_string()))?;
        let options = KubeConfigOptions {
            context: config.kube_context.clone(),
            ..Default::default()
        };
        Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| WebhookError::KubeConfig(e.to_string()))?
    } else {
        info!("Using in-cluster configuration");
        Config::incluster().map_err(|e| WebhookError::KubeConfig(e.to_string()))?
    };

    Ok(Client::try_from(kube_config)?)
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
