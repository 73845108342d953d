//! Floating IP manager CRD Definitions
//!
//! Kubernetes Custom Resource Definitions read by the admission webhook.
//! The resources are owned and reconciled by the floating IP manager
//! controller; the webhook only reads them.

pub mod floating_ip;
pub mod floating_ip_pool;
pub mod floating_ip_project_quota;

pub use floating_ip::*;
pub use floating_ip_pool::*;
pub use floating_ip_project_quota::*;

/// API group shared by all floating IP manager resources
pub const API_GROUP: &str = "rancher.k8s.binbash.org";

/// API version shared by all floating IP manager resources
pub const API_VERSION: &str = "v1beta1";
