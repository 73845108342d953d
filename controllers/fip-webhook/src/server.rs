//! HTTPS server for the admission endpoints.
//!
//! The server reads the mirrored key and certificate each time it starts, so a
//! stop/start cycle after renewal is enough to serve the new identity.

use async_trait::async_trait;
use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};
use webhook_tls::{LocalTlsFiles, ServingEndpoint, TlsError};

/// Grace period for in-flight requests on stop
const DRAIN_PERIOD: Duration = Duration::from_secs(10);

struct Running {
    handle: Handle,
    task: JoinHandle<()>,
}

/// Restartable TLS server
pub struct WebhookServer {
    addr: SocketAddr,
    files: LocalTlsFiles,
    router: Router,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookServer")
            .field("addr", &self.addr)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

impl WebhookServer {
    /// Creates a server for `router` on `0.0.0.0:<port>`.
    pub fn new(port: u16, files: LocalTlsFiles, router: Router) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            files,
            router,
            running: Mutex::new(None),
        }
    }

    /// Address the server is listening on, if running
    #[cfg(test)]
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let running = self.running.lock().await;
        match running.as_ref() {
            Some(running) => running.handle.listening().await,
            None => None,
        }
    }
}

#[async_trait]
impl ServingEndpoint for WebhookServer {
    async fn start(&self) -> Result<(), TlsError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let config = RustlsConfig::from_pem_file(self.files.cert_path(), self.files.key_path())
            .await
            .map_err(|e| TlsError::Endpoint(format!("cannot load TLS files: {e}")))?;

        let handle = Handle::new();
        let server = axum_server::bind_rustls(self.addr, config)
            .handle(handle.clone())
            .serve(self.router.clone().into_make_service());
        let addr = self.addr;
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("HTTPS server on {} failed: {}", addr, e);
            }
        });

        let Some(bound) = handle.listening().await else {
            let _ = task.await;
            return Err(TlsError::Endpoint(format!("cannot listen on {}", self.addr)));
        };
        info!(addr = %bound, "Webhook server listening with TLS");

        *running = Some(Running { handle, task });
        Ok(())
    }

    async fn stop(&self) -> Result<(), TlsError> {
        let Some(Running { handle, task }) = self.running.lock().await.take() else {
            return Ok(());
        };

        handle.graceful_shutdown(Some(DRAIN_PERIOD));
        task.await
            .map_err(|e| TlsError::Endpoint(format!("server task failed: {e}")))?;
        info!("Webhook server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use webhook_tls::MockCluster;

    fn install_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        install_provider();
        let dir = tempfile::tempdir().unwrap();
        let files = LocalTlsFiles::in_dir(dir.path());
        let identity = MockCluster::new().issue_identity("fip-webhook", "fip-system");
        files.write(&identity).await.unwrap();

        let server = WebhookServer::new(
            0,
            files,
            Router::new().route("/readyz", get(|| async { "ok" })),
        );

        server.start().await.unwrap();
        assert!(server.local_addr().await.is_some());
        // Starting twice is a no-op.
        server.start().await.unwrap();

        server.stop().await.unwrap();
        assert!(server.local_addr().await.is_none());

        server.start().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_without_files_fails() {
        install_provider();
        let dir = tempfile::tempdir().unwrap();
        let server = WebhookServer::new(0, LocalTlsFiles::in_dir(dir.path()), Router::new());

        assert!(matches!(server.start().await, Err(TlsError::Endpoint(_))));
        server.stop().await.unwrap();
    }
}
