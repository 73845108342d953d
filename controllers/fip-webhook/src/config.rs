//! Runtime configuration read from the environment.

use crate::error::WebhookError;
use std::path::PathBuf;

/// Default renewal window: 30 days, in minutes
pub const DEFAULT_RENEWAL_WINDOW_MINUTES: i64 = 30 * 24 * 60;

/// Default HTTPS port
pub const DEFAULT_PORT: u16 = 8443;

/// Webhook configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Log level or filter directives
    pub log_level: String,
    /// Minutes before expiry at which the certificate is renewed
    pub renewal_window_minutes: i64,
    /// Kubeconfig file; the in-cluster config is used when it does not exist
    pub kubeconfig_path: PathBuf,
    /// Kubeconfig context override
    pub kube_context: Option<String>,
    /// Service name, also the base of the certificate identity
    pub webhook_name: String,
    /// Namespace of the service and its TLS secret
    pub webhook_namespace: String,
    /// Name of the ValidatingWebhookConfiguration
    pub webhook_config_name: String,
    /// HTTPS listen port
    pub port: u16,
    /// Directory of the mirrored key and certificate files
    pub tls_dir: PathBuf,
}

impl WebhookConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, WebhookError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WebhookError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let home = PathBuf::from(get("HOME").unwrap_or_else(|| "/".to_string()));

        let renewal_window_minutes = get("CERTRENEWALPERIOD")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|minutes| *minutes > 0)
            .unwrap_or(DEFAULT_RENEWAL_WINDOW_MINUTES);

        let port = match get("WEBHOOK_PORT") {
            Some(value) => value.trim().parse::<u16>().map_err(|e| {
                WebhookError::InvalidConfig(format!("WEBHOOK_PORT {value:?} is not a port: {e}"))
            })?,
            None => DEFAULT_PORT,
        };
        if port == 0 {
            return Err(WebhookError::InvalidConfig(
                "WEBHOOK_PORT must not be 0".to_string(),
            ));
        }

        Ok(Self {
            log_level: get("LOGLEVEL").unwrap_or_else(|| "INFO".to_string()),
            renewal_window_minutes,
            kubeconfig_path: get("KUBECONFIG")
                .map_or_else(|| home.join(".kube").join("config"), PathBuf::from),
            kube_context: get("KUBECONTEXT"),
            webhook_name: get("WEBHOOK_NAME")
                .unwrap_or_else(|| "rancher-fip-manager-webhook".to_string()),
            webhook_namespace: get("WEBHOOK_NAMESPACE")
                .unwrap_or_else(|| "rancher-fip-manager".to_string()),
            webhook_config_name: get("WEBHOOK_CONFIG_NAME")
                .unwrap_or_else(|| "rancher-fip-manager-validator".to_string()),
            port,
            tls_dir: get("TLS_DIR").map_or(home, PathBuf::from),
        })
    }

    /// Translates `log_level` into a tracing filter directive.
    ///
    /// Accepts plain level names in any case (`warning`, `fatal` and `panic`
    /// included) as well as full filter directives.
    pub fn log_directive(&self) -> String {
        let level = self.log_level.trim().to_lowercase();
        match level.as_str() {
            "warning" => "warn".to_string(),
            "fatal" | "panic" => "error".to_string(),
            _ => level,
        }
    }
}
