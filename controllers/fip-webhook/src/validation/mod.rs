//! Admission Validation Engine
//!
//! Two decisions:
//! - [`FloatingIPValidator::validate_floating_ip`]: pool existence, requested
//!   address checks or pool capacity, then project quota
//! - [`validate_floating_ip_pool`]: internal consistency of a pool definition
//!
//! Checks run in a fixed order and the first failure is reported.

mod address;
pub mod floating_ip;
pub mod lookup;
pub mod pool;

pub use floating_ip::FloatingIPValidator;
pub use lookup::KubeLookup;
pub use pool::validate_floating_ip_pool;

/// Result of a validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the object is admitted
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
        }
    }
}
