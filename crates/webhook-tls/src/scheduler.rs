//! Renewal scheduling and serving endpoint restarts.
//!
//! The scheduler is a single background task. Each cycle derives the next
//! renewal point from the stored certificate, sleeps until then, refreshes the
//! identity and restarts the serving endpoint so it picks up the new files.

use crate::csr::{CsrApprover, CsrRequester};
use crate::error::Result;
use crate::manager::CertificateManager;
use crate::secret::SecretStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Minutes to wait before the next renewal.
///
/// Renewal is due `window_minutes` before expiry; the result is never below one
/// minute so an expired or nearly expired certificate still gets a timer.
pub fn renewal_delay_minutes(
    expiration: DateTime<Utc>,
    now: DateTime<Utc>,
    window_minutes: i64,
) -> i64 {
    let remaining = (expiration - now).num_minutes();
    remaining
        .saturating_sub(window_minutes)
        .saturating_add(1)
        .max(1)
}

/// Server that serves with the mirrored TLS files and can be bounced.
#[async_trait]
pub trait ServingEndpoint: Send + Sync {
    /// Stops serving
    async fn stop(&self) -> Result<()>;

    /// Starts serving with the current TLS files
    async fn start(&self) -> Result<()>;
}

/// Times renewals for one [`CertificateManager`].
pub struct RenewalScheduler<C: ?Sized, S: ?Sized, E: ?Sized> {
    manager: Arc<CertificateManager<C, S>>,
    endpoint: Arc<E>,
    window_minutes: i64,
    restart_settle: Duration,
}

impl<C: ?Sized, S: ?Sized, E: ?Sized> Clone for RenewalScheduler<C, S, E> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            endpoint: Arc::clone(&self.endpoint),
            window_minutes: self.window_minutes,
            restart_settle: self.restart_settle,
        }
    }
}

impl<C, S, E> RenewalScheduler<C, S, E>
where
    C: CsrRequester + CsrApprover + ?Sized + 'static,
    S: SecretStore + ?Sized + 'static,
    E: ServingEndpoint + ?Sized + 'static,
{
    /// Creates a scheduler with a two second restart settle delay.
    pub fn new(
        manager: Arc<CertificateManager<C, S>>,
        endpoint: Arc<E>,
        window_minutes: i64,
    ) -> Self {
        Self {
            manager,
            endpoint,
            window_minutes,
            restart_settle: Duration::from_secs(2),
        }
    }

    /// Overrides the wait between stopping and starting the endpoint.
    pub fn with_restart_settle(mut self, settle: Duration) -> Self {
        self.restart_settle = settle;
        self
    }

    /// Spawns the renewal loop.
    pub fn start(&self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { scheduler.run(token).await });
        SchedulerHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn run(self, cancel: CancellationToken) -> Result<()> {
        loop {
            let expiration = match self.manager.expiration().await {
                Ok(expiration) => expiration,
                Err(e) => {
                    error!("Cannot read certificate expiration, renewal stopped: {}", e);
                    return Err(e);
                }
            };

            let delay = renewal_delay_minutes(expiration, Utc::now(), self.window_minutes);
            info!(
                delay_minutes = delay,
                expiration = %expiration,
                "Next certificate renewal scheduled"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Renewal scheduler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_secs(delay.unsigned_abs() * 60)) => {}
            }

            match self.manager.ensure_fresh(self.window_minutes).await {
                Ok(outcome) => info!(?outcome, "Certificate refresh finished"),
                Err(e) => error!("Certificate renewal failed: {}", e),
            }
            self.restart_endpoint().await?;
        }
    }

    async fn restart_endpoint(&self) -> Result<()> {
        info!("Restarting serving endpoint");
        if let Err(e) = self.endpoint.stop().await {
            warn!("Failed to stop serving endpoint: {}", e);
        }
        tokio::time::sleep(self.restart_settle).await;
        self.endpoint.start().await?;
        info!("Serving endpoint restarted");
        Ok(())
    }
}

/// Owned handle to a running renewal loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl SchedulerHandle {
    /// Requests the loop to stop; a restart in progress is completed first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True once the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the loop to exit and returns its result.
    ///
    /// Safe to use in `select!`; once it has returned, later calls return `Ok(())`.
    pub async fn join(&mut self) -> Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let outcome = task.await;
        self.task = None;

        match outcome {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop();
        self.join().await
    }

    /// Stops this loop and starts `scheduler` in its place.
    pub async fn replace<C, S, E>(
        self,
        scheduler: &RenewalScheduler<C, S, E>,
    ) -> SchedulerHandle
    where
        C: CsrRequester + CsrApprover + ?Sized + 'static,
        S: SecretStore + ?Sized + 'static,
        E: ServingEndpoint + ?Sized + 'static,
    {
        if let Err(e) = self.shutdown().await {
            warn!("Previous renewal scheduler ended with error: {}", e);
        }
        scheduler.start()
    }
}
