//! ValidatingWebhookConfiguration bootstrap.

use crate::config::WebhookConfig;
use crate::error::WebhookError;
use crate::handlers::{VALIDATE_FLOATING_IP_PATH, VALIDATE_FLOATING_IP_POOL_PATH};
use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    RuleWithOperations, ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration,
    WebhookClientConfig,
};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::info;

/// Namespace of the cluster CA config map
const CA_CONFIG_MAP_NAMESPACE: &str = "kube-system";

/// Config map published in every namespace with the cluster root CA
const CA_CONFIG_MAP_NAME: &str = "kube-root-ca.crt";

/// Key of the CA bundle inside the config map
const CA_CONFIG_MAP_KEY: &str = "ca.crt";

/// Registers the admission endpoints with the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRegistration {
    service_name: String,
    service_namespace: String,
    configuration_name: String,
    port: u16,
}

impl WebhookRegistration {
    /// Creates the registration for the configured service.
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            service_name: config.webhook_name.clone(),
            service_namespace: config.webhook_namespace.clone(),
            configuration_name: config.webhook_config_name.clone(),
            port: config.port,
        }
    }

    /// Creates the configuration unless one with the same name exists.
    ///
    /// Returns true if it was created.
    pub async fn ensure(&self, client: Client) -> Result<bool, WebhookError> {
        let configurations: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
        if configurations.get_opt(&self.configuration_name).await?.is_some() {
            info!(
                "ValidatingWebhookConfiguration {} already exists",
                self.configuration_name
            );
            return Ok(false);
        }

        let ca_bundle = cluster_ca_bundle(client).await?;
        configurations
            .create(&PostParams::default(), &self.build_configuration(ca_bundle))
            .await?;
        info!(
            "Created ValidatingWebhookConfiguration {}",
            self.configuration_name
        );
        Ok(true)
    }

    /// Builds the configuration with both webhooks trusting `ca_bundle`.
    pub fn build_configuration(&self, ca_bundle: Vec<u8>) -> ValidatingWebhookConfiguration {
        let floating_ip = self.webhook(
            "floatingip",
            "floatingips",
            &["CREATE"],
            "Namespaced",
            VALIDATE_FLOATING_IP_PATH,
            ca_bundle.clone(),
        );
        let floating_ip_pool = self.webhook(
            "floatingippool",
            "floatingippools",
            &["CREATE", "UPDATE"],
            "Cluster",
            VALIDATE_FLOATING_IP_POOL_PATH,
            ca_bundle,
        );

        ValidatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(self.configuration_name.clone()),
                ..Default::default()
            },
            webhooks: Some(vec![floating_ip, floating_ip_pool]),
        }
    }

    fn webhook(
        &self,
        prefix: &str,
        resource: &str,
        operations: &[&str],
        scope: &str,
        path: &str,
        ca_bundle: Vec<u8>,
    ) -> ValidatingWebhook {
        ValidatingWebhook {
            name: format!(
                "{prefix}-{}.{}.svc",
                self.service_name, self.service_namespace
            ),
            namespace_selector: Some(LabelSelector::default()),
            rules: Some(vec![RuleWithOperations {
                api_groups: Some(vec![crds::API_GROUP.to_string()]),
                api_versions: Some(vec![crds::API_VERSION.to_string()]),
                operations: Some(operations.iter().map(ToString::to_string).collect()),
                resources: Some(vec![resource.to_string()]),
                scope: Some(scope.to_string()),
            }]),
            side_effects: "None".to_string(),
            client_config: WebhookClientConfig {
                ca_bundle: Some(ByteString(ca_bundle)),
                service: Some(ServiceReference {
                    name: self.service_name.clone(),
                    namespace: self.service_namespace.clone(),
                    path: Some(path.to_string()),
                    port: Some(i32::from(self.port)),
                }),
                url: None,
            },
            admission_review_versions: vec!["v1".to_string()],
            ..Default::default()
        }
    }
}

/// Reads the cluster root CA that signs kubelet-serving certificates.
async fn cluster_ca_bundle(client: Client) -> Result<Vec<u8>, WebhookError> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client, CA_CONFIG_MAP_NAMESPACE);
    let config_map = config_maps.get_opt(CA_CONFIG_MAP_NAME).await?.ok_or_else(|| {
        WebhookError::Registration(format!(
            "config map {CA_CONFIG_MAP_NAMESPACE}/{CA_CONFIG_MAP_NAME} not found"
        ))
    })?;

    config_map
        .data
        .and_then(|mut data| data.remove(CA_CONFIG_MAP_KEY))
        .filter(|ca| !ca.is_empty())
        .map(String::into_bytes)
        .ok_or_else(|| {
            WebhookError::Registration(format!(
                "{CA_CONFIG_MAP_KEY} missing in config map {CA_CONFIG_MAP_NAMESPACE}/{CA_CONFIG_MAP_NAME}"
            ))
        })
}
